use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;

use crate::error::{BridgeError, TransportError};
use crate::transport::Token;

/// Cancellation and deadline state for one call. Clones share the same state.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Arc<watch::Sender<bool>>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// A context with no deadline.
    pub fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            deadline: None,
            cancelled: Arc::new(cancelled),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Build a context from the `grpc-timeout` request header, if present and well formed.
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        let ctx = Self::new();
        match metadata
            .get("grpc-timeout")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
        {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<BridgeError> {
        if self.is_cancelled() {
            return Some(BridgeError::ContextCancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(BridgeError::ContextExpired),
            _ => None,
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> BridgeError {
        let mut cancelled = self.cancelled.subscribe();
        let cancel = async move {
            // The sender lives in `self`, so this only returns once the flag flips.
            let _ = cancelled.wait_for(|c| *c).await;
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancel => BridgeError::ContextCancelled,
                _ = tokio::time::sleep_until(deadline) => BridgeError::ContextExpired,
            },
            None => {
                cancel.await;
                BridgeError::ContextCancelled
            }
        }
    }
}

/// Wait on a transport acknowledgment, bounded by the call context.
///
/// Returns `Some(result)` when the acknowledgment completed, in which case its
/// result is authoritative. Returns `None` when the deadline elapsed or the call
/// was cancelled first; the caller must then report the context error instead.
pub async fn wait_context(
    ctx: &CallContext,
    token: Token,
) -> Option<Result<(), TransportError>> {
    if ctx.err().is_some() {
        return None;
    }
    tokio::select! {
        biased;
        result = token.wait() => Some(result),
        _ = ctx.done() => None,
    }
}

fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grpc_timeout() {
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("100m"), Some(Duration::from_millis(100)));
        assert_eq!(parse_grpc_timeout("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_grpc_timeout("3M"), Some(Duration::from_secs(180)));
        assert_eq!(parse_grpc_timeout("7u"), Some(Duration::from_micros(7)));
        assert_eq!(parse_grpc_timeout("9n"), Some(Duration::from_nanos(9)));
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("10x"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
    }

    #[test]
    fn test_from_metadata() {
        let mut metadata = MetadataMap::new();
        assert!(CallContext::from_metadata(&metadata).deadline().is_none());

        metadata.insert("grpc-timeout", "250m".parse().unwrap());
        let ctx = CallContext::from_metadata(&metadata);
        let remaining = ctx.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_millis(250));
    }

    #[test]
    fn test_clones_share_cancellation() {
        let ctx = CallContext::new();
        let clone = ctx.clone();
        assert!(ctx.err().is_none());
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.err(), Some(BridgeError::ContextCancelled)));
    }

    #[tokio::test]
    async fn test_done_on_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(10));
        assert!(matches!(ctx.done().await, BridgeError::ContextExpired));
    }

    #[tokio::test]
    async fn test_done_on_cancel() {
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });
        assert!(matches!(ctx.done().await, BridgeError::ContextCancelled));
    }

    #[tokio::test]
    async fn test_wait_completes_naturally() {
        let ctx = CallContext::new();
        let token = Token::ready(Err(TransportError::NotConnected));
        assert_eq!(
            wait_context(&ctx, token).await,
            Some(Err(TransportError::NotConnected))
        );
    }

    #[tokio::test]
    async fn test_wait_with_elapsed_deadline_returns_immediately() {
        let ctx = CallContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        let (_completer, token) = Token::pending();

        let started = std::time::Instant::now();
        assert_eq!(wait_context(&ctx, token).await, None);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_times_out_on_pending_token() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(20));
        let (_completer, token) = Token::pending();
        assert_eq!(wait_context(&ctx, token).await, None);
    }

    #[tokio::test]
    async fn test_wait_without_deadline_waits_for_token() {
        let ctx = CallContext::new();
        let (completer, token) = Token::pending();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete(Ok(()));
        });
        assert_eq!(wait_context(&ctx, token).await, Some(Ok(())));
    }
}

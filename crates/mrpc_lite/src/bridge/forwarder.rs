use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::connection::CallInbound;
use crate::context::{CallContext, wait_context};
use crate::error::{BridgeError, TransportError};
use crate::frame::{END_OF_STREAM, Frame};
use crate::transport::{QoS, Token, Transport};

/// The request topic of one call.
///
/// The end-of-stream sentinel is published at most once, by whichever of the
/// forwarder or the call's cleanup gets there first, and no frame follows it.
pub(crate) struct RequestStream<T> {
    transport: Arc<T>,
    topic: String,
    qos: QoS,
    closed: Mutex<bool>,
}

impl<T: Transport> RequestStream<T> {
    pub fn new(transport: Arc<T>, topic: String, qos: QoS) -> Self {
        Self {
            transport,
            topic,
            qos,
            closed: Mutex::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, frame: Frame) -> Token {
        let Ok(closed) = self.closed.lock() else {
            return Token::ready(Err(TransportError::Closed));
        };
        if *closed {
            return Token::ready(Err(TransportError::Closed));
        }
        self.transport
            .publish(&self.topic, self.qos, false, frame.into_bytes())
    }

    /// Publish the end-of-stream sentinel unless it was already sent.
    ///
    /// Fire and forget: nobody waits on this acknowledgment. Returns true if
    /// this call sent it.
    pub fn close(&self) -> bool {
        let Ok(mut closed) = self.closed.lock() else {
            return false;
        };
        if *closed {
            return false;
        }
        *closed = true;
        drop(self.transport.publish(
            &self.topic,
            self.qos,
            false,
            Bytes::from_static(END_OF_STREAM),
        ));
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|closed| *closed).unwrap_or(true)
    }
}

/// Drain the caller's frames onto the request topic, then close it.
///
/// Failures here stop forwarding but never end the call: only the reply side
/// or the call context decide how the call finishes. If the call ends first,
/// the dispatcher aborts this task and closes the stream itself.
pub(crate) async fn forward_requests<T: Transport>(
    ctx: CallContext,
    requests: Arc<RequestStream<T>>,
    mut inbound: CallInbound,
) {
    let topic = requests.topic();
    let mut forwarded = 0usize;

    loop {
        let frame = match inbound.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(status) => {
                debug!(topic = %topic, error = %status, "Caller stream failed");
                break;
            }
        };

        match wait_context(&ctx, requests.publish(frame)).await {
            Some(Ok(())) => forwarded += 1,
            Some(Err(err)) => {
                let err = BridgeError::Publish(err);
                warn!(topic = %topic, error = %err, "Stopped forwarding");
                break;
            }
            None => {
                debug!(topic = %topic, "Call context ended while publishing");
                break;
            }
        }
    }

    requests.close();

    debug!(topic = %topic, forwarded, "Forwarder finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;
    use std::time::Duration;

    const TOPIC: &str = "/mrpc/request/pkg.Svc/Method/1";

    fn requests(broker: &Arc<MemoryBroker>) -> Arc<RequestStream<MemoryBroker>> {
        Arc::new(RequestStream::new(
            Arc::clone(broker),
            TOPIC.to_string(),
            QoS::AtMostOnce,
        ))
    }

    #[tokio::test]
    async fn test_frames_then_sentinel() {
        let broker = Arc::new(MemoryBroker::new());
        let inbound = CallInbound::from_frames([Frame::from("a"), Frame::from("b")]);

        forward_requests(CallContext::new(), requests(&broker), inbound).await;

        assert_eq!(
            broker.published_to(TOPIC),
            vec![
                Bytes::from("a"),
                Bytes::from("b"),
                Bytes::from_static(END_OF_STREAM)
            ]
        );
    }

    #[tokio::test]
    async fn test_read_error_still_ends_stream() {
        let broker = Arc::new(MemoryBroker::new());
        let inbound = CallInbound::new(futures::stream::iter([
            Ok(Frame::from("a")),
            Err(tonic::Status::aborted("client went away")),
            Ok(Frame::from("never")),
        ]));

        forward_requests(CallContext::new(), requests(&broker), inbound).await;

        assert_eq!(
            broker.published_to(TOPIC),
            vec![Bytes::from("a"), Bytes::from_static(END_OF_STREAM)]
        );
    }

    #[tokio::test]
    async fn test_publish_failure_stops_forwarding() {
        let broker = Arc::new(MemoryBroker::new());
        broker.disconnect();
        let inbound = CallInbound::from_frames([Frame::from("a"), Frame::from("b")]);

        forward_requests(CallContext::new(), requests(&broker), inbound).await;

        assert!(broker.published_to(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_stalled_publish_bounded_by_deadline() {
        let broker = Arc::new(MemoryBroker::new());
        broker.stall(true);
        let ctx = CallContext::new().with_timeout(Duration::from_millis(20));
        let inbound = CallInbound::from_frames([Frame::from("a")]);

        let finished = tokio::time::timeout(
            Duration::from_secs(1),
            forward_requests(ctx, requests(&broker), inbound),
        )
        .await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_close_sends_sentinel_once() {
        let broker = Arc::new(MemoryBroker::new());
        let requests = requests(&broker);

        assert!(!requests.is_closed());
        assert!(requests.close());
        assert!(!requests.close());
        assert!(requests.is_closed());

        let late = requests.publish(Frame::from("late")).wait().await;
        assert_eq!(late, Err(TransportError::Closed));
        assert_eq!(
            broker.published_to(TOPIC),
            vec![Bytes::from_static(END_OF_STREAM)]
        );
    }

    #[tokio::test]
    async fn test_aborted_forwarder_leaves_close_to_owner() {
        let broker = Arc::new(MemoryBroker::new());
        let requests = requests(&broker);
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(Frame::from("a")).await.unwrap();

        let task = tokio::spawn(forward_requests(
            CallContext::new(),
            Arc::clone(&requests),
            CallInbound::from_receiver(rx),
        ));
        while broker.published_to(TOPIC).is_empty() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert!(!requests.is_closed());
        assert!(requests.close());
        assert_eq!(
            broker.published_to(TOPIC),
            vec![Bytes::from("a"), Bytes::from_static(END_OF_STREAM)]
        );
        drop(tx);
    }
}

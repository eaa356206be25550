use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tonic::Code;
use tracing::{debug, warn};

use crate::connection::CallOutbound;
use crate::error::BridgeError;
use crate::frame::{Frame, hex};
use crate::status::{RpcStatus, code_from_token};
use crate::topic::CallTopics;
use crate::transport::{Message, MessageHandler};

pub(crate) type CallResult = Result<(), BridgeError>;

/// One-shot hand-off from the listener to the dispatcher.
///
/// At most one result is ever delivered. After `close`, signals are dropped.
pub(crate) struct Completion {
    tx: Mutex<Option<oneshot::Sender<CallResult>>>,
}

impl Completion {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            tx: Mutex::new(Some(tx)),
        };
        (Arc::new(completion), rx)
    }

    /// Deliver the call result. Returns false if a result was already delivered
    /// or the dispatcher has gone away.
    pub fn signal(&self, result: CallResult) -> bool {
        let tx = self.tx.lock().ok().and_then(|mut tx| tx.take());
        match tx {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    pub fn is_done(&self) -> bool {
        self.tx.lock().map(|tx| tx.is_none()).unwrap_or(true)
    }
}

/// Handles status-tagged replies for one call.
pub(crate) struct Listener {
    topics: CallTopics,
    outbound: CallOutbound,
    completion: Arc<Completion>,
}

impl Listener {
    pub fn new(topics: CallTopics, outbound: CallOutbound, completion: Arc<Completion>) -> Self {
        Self {
            topics,
            outbound,
            completion,
        }
    }

    pub fn into_handler(self) -> MessageHandler {
        Arc::new(move |msg: Message| self.on_message(msg))
    }

    fn on_message(&self, msg: Message) {
        let outcome = if self.completion.is_done() {
            debug!(topic = %msg.topic(), "Dropping reply for finished call");
            None
        } else {
            self.handle(msg.topic(), msg.payload())
        };

        msg.ack();

        if let Some(result) = outcome {
            self.completion.signal(result);
        }
    }

    /// Process one reply. `Some` ends the call with that result.
    fn handle(&self, topic: &str, payload: &Bytes) -> Option<CallResult> {
        let Some(token) = self.topics.status_token(topic) else {
            debug!(
                topic = %topic,
                response = %self.topics.response,
                "Ignoring reply for another call"
            );
            return None;
        };

        let Some(code) = code_from_token(token) else {
            warn!(topic = %topic, "Reply with unknown status token");
            return Some(Err(BridgeError::MalformedStatusToken {
                token: token.to_owned(),
                payload: hex(payload),
            }));
        };

        if code == Code::Ok {
            let frame = Frame::new(payload.clone());
            if frame.is_end_of_stream() {
                return Some(Ok(()));
            }
            return match self.outbound.send(frame) {
                Ok(()) => None,
                Err(err) => {
                    warn!(topic = %topic, error = %err, "Failed to forward reply frame");
                    Some(Err(err))
                }
            };
        }

        let result = match RpcStatus::decode_with_code(code, payload) {
            Ok(status) => Err(BridgeError::Remote(status.into_status())),
            Err(err) => {
                warn!(topic = %topic, error = %err, "Failed to decode status payload");
                Err(BridgeError::MalformedStatusPayload(err))
            }
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::END_OF_STREAM;
    use crate::topic::MethodPath;
    use prost::Message as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        topics: CallTopics,
        handler: MessageHandler,
        frames: UnboundedReceiver<Frame>,
        done: oneshot::Receiver<CallResult>,
        acks: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            let method = MethodPath::parse("/pkg.Svc/Method").unwrap();
            let topics = CallTopics::new("/req", "/resp", Some("svc1"), &method, "/12345");
            let (outbound, frames) = CallOutbound::channel();
            let (completion, done) = Completion::new();
            let handler = Listener::new(topics.clone(), outbound, completion).into_handler();
            Self {
                topics,
                handler,
                frames,
                done,
                acks: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn deliver(&self, token: &str, payload: impl Into<Bytes>) {
            let acks = Arc::clone(&self.acks);
            let msg = Message::new(self.topics.status_topic(token), payload).with_ack(move || {
                acks.fetch_add(1, Ordering::SeqCst);
            });
            (self.handler)(msg);
        }
    }

    #[test]
    fn test_ok_frames_forwarded_until_sentinel() {
        let mut h = Harness::new();
        h.deliver("OK", "abc");
        h.deliver("OK", "def");
        assert!(h.done.try_recv().is_err());

        h.deliver("OK", Bytes::from_static(END_OF_STREAM));
        assert!(matches!(h.done.try_recv(), Ok(Ok(()))));

        assert_eq!(h.frames.try_recv().unwrap(), Frame::from("abc"));
        assert_eq!(h.frames.try_recv().unwrap(), Frame::from("def"));
        assert!(h.frames.try_recv().is_err());
        assert_eq!(h.acks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_error_status_overrides_payload_code() {
        let mut h = Harness::new();
        let payload = RpcStatus::new(Code::Internal, "drone not registered")
            .with_detail("type.example.com/Hint", vec![7])
            .encode_to_vec();
        h.deliver("NOT_FOUND", payload);

        let Ok(Err(BridgeError::Remote(status))) = h.done.try_recv() else {
            panic!("expected a remote status");
        };
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "drone not registered");
        let record = RpcStatus::decode(status.details()).unwrap();
        assert_eq!(record.code, Code::NotFound as i32);
        assert_eq!(record.details[0].value, vec![7]);
        assert_eq!(h.acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_token_is_internal_with_hex_payload() {
        let mut h = Harness::new();
        h.deliver("BOGUS", vec![0xde, 0xad]);

        let Ok(Err(BridgeError::MalformedStatusToken { token, payload })) = h.done.try_recv()
        else {
            panic!("expected a malformed token error");
        };
        assert_eq!(token, "BOGUS");
        assert_eq!(payload, "dead");
        assert_eq!(h.acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_status_payload() {
        let mut h = Harness::new();
        h.deliver("ABORTED", vec![0xff, 0xff, 0xff]);
        assert!(matches!(
            h.done.try_recv(),
            Ok(Err(BridgeError::MalformedStatusPayload(_)))
        ));
        assert_eq!(h.acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forward_failure_ends_call() {
        let mut h = Harness::new();
        let (_, frames) = tokio::sync::mpsc::unbounded_channel();
        drop(std::mem::replace(&mut h.frames, frames));

        h.deliver("OK", "abc");
        assert!(matches!(
            h.done.try_recv(),
            Ok(Err(BridgeError::StreamForward(_)))
        ));
    }

    #[test]
    fn test_signals_at_most_once() {
        let mut h = Harness::new();
        h.deliver("UNAVAILABLE", RpcStatus::new(Code::Unavailable, "first").encode_to_vec());
        h.deliver("OK", "late");
        h.deliver("INTERNAL", RpcStatus::new(Code::Internal, "second").encode_to_vec());

        let Ok(Err(BridgeError::Remote(status))) = h.done.try_recv() else {
            panic!("expected the first status");
        };
        assert_eq!(status.message(), "first");
        assert!(h.frames.try_recv().is_err());
        assert_eq!(h.acks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_foreign_topic_is_acked_and_ignored() {
        let mut h = Harness::new();
        let acks = Arc::clone(&h.acks);
        let msg = Message::new("/resp/svc1/pkg.Svc/Method/99999/OK", "stray").with_ack(move || {
            acks.fetch_add(1, Ordering::SeqCst);
        });
        (h.handler)(msg);

        assert!(h.done.try_recv().is_err());
        assert!(h.frames.try_recv().is_err());
        assert_eq!(h.acks.load(Ordering::SeqCst), 1);

        h.deliver("OK", Bytes::from_static(END_OF_STREAM));
        assert!(matches!(h.done.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_closed_completion_drops_signals() {
        let (completion, mut done) = Completion::new();
        completion.close();
        assert!(completion.is_done());
        assert!(!completion.signal(Ok(())));
        assert!(done.try_recv().is_err());
    }
}

//! The publish/subscribe transport seam.
//!
//! The bridge talks to its broker through [`Transport`], an MQTT-style client
//! where every operation hands back an acknowledgment [`Token`]. Subscription
//! handlers are plain callbacks driven by the transport's own dispatch loop.

mod memory;

pub use memory::{MemoryBroker, RECORD_LIMIT};

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Delivery assurance requested for a publish or subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A pending acknowledgment for a transport operation.
#[derive(Debug)]
pub struct Token {
    rx: oneshot::Receiver<Result<(), TransportError>>,
}

impl Token {
    /// A token that has already completed.
    pub fn ready(result: Result<(), TransportError>) -> Self {
        let (completer, token) = Token::pending();
        completer.complete(result);
        token
    }

    /// A token completed later through the returned [`TokenCompleter`].
    pub fn pending() -> (TokenCompleter, Token) {
        let (tx, rx) = oneshot::channel();
        (TokenCompleter { tx }, Token { rx })
    }

    /// Wait for the operation to complete, without any time bound.
    pub async fn wait(self) -> Result<(), TransportError> {
        self.rx.await.unwrap_or(Err(TransportError::Closed))
    }
}

/// The completing side of a [`Token`]. Dropping it completes the token with
/// [`TransportError::Closed`].
#[derive(Debug)]
pub struct TokenCompleter {
    tx: oneshot::Sender<Result<(), TransportError>>,
}

impl TokenCompleter {
    pub fn complete(self, result: Result<(), TransportError>) {
        let _ = self.tx.send(result);
    }
}

type AckFn = Box<dyn FnOnce() + Send>;

/// A message delivered to a subscription handler.
pub struct Message {
    topic: String,
    payload: Bytes,
    ack: Option<AckFn>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            ack: None,
        }
    }

    /// Attach the hook run by [`Message::ack`].
    pub fn with_ack<F>(mut self, ack: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.ack = Some(Box::new(ack));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Acknowledge receipt so the transport does not redeliver.
    pub fn ack(mut self) {
        if let Some(ack) = self.ack.take() {
            ack();
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// A subscription callback. Runs on the transport's dispatch loop and must not block.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// An MQTT-style publish/subscribe client.
pub trait Transport: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn connect(&self) -> Token;

    /// Subscribe `handler` to every topic matching `filter` (`+` and `#` wildcards).
    fn subscribe(&self, filter: &str, qos: QoS, handler: MessageHandler) -> Token;

    fn unsubscribe(&self, filter: &str) -> Token;

    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: Bytes) -> Token;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn connect(&self) -> Token {
        (**self).connect()
    }

    fn subscribe(&self, filter: &str, qos: QoS, handler: MessageHandler) -> Token {
        (**self).subscribe(filter, qos, handler)
    }

    fn unsubscribe(&self, filter: &str) -> Token {
        (**self).unsubscribe(filter)
    }

    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: Bytes) -> Token {
        (**self).publish(topic, qos, retained, payload)
    }
}

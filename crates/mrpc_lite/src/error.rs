use thiserror::Error;
use tonic::{Code, Status};

/// Errors reported by a publish/subscribe transport through its acknowledgment tokens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The transport could not establish a connection to the broker.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The operation requires a live connection.
    #[error("not connected")]
    NotConnected,

    /// The broker rejected a subscription.
    #[error("subscription to '{0}' rejected")]
    SubscribeRejected(String),

    /// The broker rejected a publish.
    #[error("publish to '{0}' rejected")]
    PublishRejected(String),

    /// The token was dropped before the operation completed.
    #[error("acknowledgment token closed before completion")]
    Closed,
}

/// Errors that can end a bridged call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// Connecting the transport failed.
    #[error("transport connect failed: {0}")]
    Connect(#[source] TransportError),

    /// Subscribing to the response topic failed.
    #[error("subscribe failed: {0}")]
    Subscribe(#[source] TransportError),

    /// Publishing a request frame failed. Only the forwarder sees this one.
    #[error("publish failed: {0}")]
    Publish(#[source] TransportError),

    /// The call deadline elapsed.
    #[error("context deadline exceeded")]
    ContextExpired,

    /// The call was cancelled.
    #[error("context cancelled")]
    ContextCancelled,

    /// A reply arrived on a status topic with an unrecognised token.
    #[error("unknown status token '{token}' with payload {payload}")]
    MalformedStatusToken { token: String, payload: String },

    /// A non-OK reply carried a payload that is not a status-details record.
    #[error("malformed status payload: {0}")]
    MalformedStatusPayload(#[from] prost::DecodeError),

    /// The outbound half of the call is gone.
    #[error("failed to forward frame to caller: {0}")]
    StreamForward(String),

    /// The remote side finished the call with a non-OK status.
    #[error("remote status: {0}")]
    Remote(Status),

    /// A local handler finished the call with an error.
    #[error("local handler failed: {0}")]
    Handler(Status),

    /// The method name cannot be mapped onto a topic.
    #[error("invalid method path: {0}")]
    InvalidMethod(String),
}

impl From<BridgeError> for Status {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Remote(status) | BridgeError::Handler(status) => status,
            BridgeError::Connect(_) | BridgeError::Subscribe(_) | BridgeError::Publish(_) => {
                Status::unavailable(err.to_string())
            }
            BridgeError::ContextExpired => Status::deadline_exceeded(err.to_string()),
            BridgeError::ContextCancelled | BridgeError::StreamForward(_) => {
                Status::cancelled(err.to_string())
            }
            BridgeError::MalformedStatusToken { .. } | BridgeError::MalformedStatusPayload(_) => {
                Status::internal(err.to_string())
            }
            BridgeError::InvalidMethod(_) => Status::new(Code::Unimplemented, err.to_string()),
        }
    }
}

//! # mrpc_lite
//!
//! Bridges bidirectional streaming gRPC calls over a publish/subscribe transport
//! (MQTT-style topics), for peers that cannot be reached directly.
//!
//! A [`Bridge`] sits in front of a gRPC server. Calls with a registered local
//! handler are served as usual; every other call is carried over the transport:
//!
//! ```ignore
//! use mrpc_lite::{Bridge, BridgeConfig, BridgeServer};
//!
//! let config = BridgeConfig::builder().target("drone-123").build();
//! let bridge = Arc::new(Bridge::new(Arc::new(mqtt_client), config));
//!
//! // Serve any unknown method through the bridge.
//! let fallback = BridgeServer::new(bridge);
//! ```
//!
//! ## Topic Format
//!
//! Each call draws a session id (`/` plus a random number) and uses:
//! - Requests: `{request_prefix}[/{target}]/{package}.{service}/{method}{session}`
//! - Replies: `{response_prefix}[/{target}]/{package}.{service}/{method}{session}/{STATUS}`
//!
//! Example with the default prefixes and target `svc1`:
//! - Requests: `/mrpc/request/svc1/pkg.Svc/Method/12345`
//! - Replies: `/mrpc/response/svc1/pkg.Svc/Method/12345/OK`
//!
//! ## Wire Protocol
//!
//! - The bridge publishes each caller frame to the request topic as raw bytes,
//!   then a single `0x00` byte once the caller's stream ends.
//! - The remote side replies on `{response}/OK` with one application frame per
//!   message, and finishes successfully by sending `0x00` on `{response}/OK`.
//! - Any other status token finishes the call with an error; the payload is an
//!   encoded `google.rpc.Status` whose code is replaced by the token's code.

// Shared modules at root level
mod connection;
mod context;
mod error;
mod frame;
mod pool;
mod topic;

pub mod bridge;
pub mod status;
pub mod transport;

// Re-export shared types
pub use connection::{CallInbound, CallOutbound, ServerCall};
pub use context::{CallContext, wait_context};
pub use error::{BridgeError, TransportError};
pub use frame::{END_OF_STREAM, Frame, RawCodec, RawDecoder, RawEncoder};
pub use pool::{SessionId, SessionPool};
pub use topic::{CallTopics, MethodPath, topic_matches};

// Convenience re-exports for common use
pub use bridge::{Bridge, BridgeConfig, BridgeServer, BridgedResponse, Route};
pub use status::{RpcStatus, code_from_token, token_from_code};
pub use transport::{MemoryBroker, Message, MessageHandler, QoS, Token, TokenCompleter, Transport};

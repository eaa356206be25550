//! Mapping between the status tokens carried in reply topics and gRPC codes,
//! plus the status-details record carried by non-OK replies.

use bytes::Bytes;
use prost::Message;
use tonic::{Code, Status};

/// The token that tags application frames and successful completion.
pub const OK_TOKEN: &str = "OK";

/// Every status token, indexed by its numeric gRPC code.
pub const STATUS_TOKENS: [&str; 17] = [
    "OK",
    "CANCELLED",
    "UNKNOWN",
    "INVALID_ARGUMENT",
    "DEADLINE_EXCEEDED",
    "NOT_FOUND",
    "ALREADY_EXISTS",
    "PERMISSION_DENIED",
    "RESOURCE_EXHAUSTED",
    "FAILED_PRECONDITION",
    "ABORTED",
    "OUT_OF_RANGE",
    "UNIMPLEMENTED",
    "INTERNAL",
    "UNAVAILABLE",
    "DATA_LOSS",
    "UNAUTHENTICATED",
];

/// Decode a status token. Matching is case-sensitive; anything outside the
/// canonical set yields `None`.
pub fn code_from_token(token: &str) -> Option<Code> {
    let code = match token {
        "OK" => Code::Ok,
        "CANCELLED" => Code::Cancelled,
        "UNKNOWN" => Code::Unknown,
        "INVALID_ARGUMENT" => Code::InvalidArgument,
        "DEADLINE_EXCEEDED" => Code::DeadlineExceeded,
        "NOT_FOUND" => Code::NotFound,
        "ALREADY_EXISTS" => Code::AlreadyExists,
        "PERMISSION_DENIED" => Code::PermissionDenied,
        "RESOURCE_EXHAUSTED" => Code::ResourceExhausted,
        "FAILED_PRECONDITION" => Code::FailedPrecondition,
        "ABORTED" => Code::Aborted,
        "OUT_OF_RANGE" => Code::OutOfRange,
        "UNIMPLEMENTED" => Code::Unimplemented,
        "INTERNAL" => Code::Internal,
        "UNAVAILABLE" => Code::Unavailable,
        "DATA_LOSS" => Code::DataLoss,
        "UNAUTHENTICATED" => Code::Unauthenticated,
        _ => return None,
    };
    Some(code)
}

/// Encode a gRPC code as its status token.
pub fn token_from_code(code: Code) -> &'static str {
    STATUS_TOKENS[code as usize]
}

/// The `google.rpc.Status` wire record.
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<StatusDetail>,
}

/// A `google.protobuf.Any` entry in [`RpcStatus::details`].
#[derive(Clone, PartialEq, Message)]
pub struct StatusDetail {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

impl RpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_detail(mut self, type_url: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.details.push(StatusDetail {
            type_url: type_url.into(),
            value: value.into(),
        });
        self
    }

    /// Decode a reply payload, taking the code from the reply topic instead of
    /// the payload.
    pub fn decode_with_code(code: Code, payload: &[u8]) -> Result<Self, prost::DecodeError> {
        let mut status = Self::decode(payload)?;
        status.code = code as i32;
        Ok(status)
    }

    /// Convert into a `tonic::Status`, carrying the encoded record as the details blob.
    pub fn into_status(self) -> Status {
        let code = Code::from_i32(self.code);
        let details = Bytes::from(self.encode_to_vec());
        Status::with_details(code, self.message, details)
    }
}

use bon::Builder;

use crate::topic::{CallTopics, MethodPath};
use crate::transport::QoS;

pub const DEFAULT_REQUEST_PREFIX: &str = "/mrpc/request";
pub const DEFAULT_RESPONSE_PREFIX: &str = "/mrpc/response";

/// Configuration for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, Builder)]
pub struct BridgeConfig {
    /// Prefix for topics carrying caller frames to the remote side.
    #[builder(into, default = DEFAULT_REQUEST_PREFIX.to_string())]
    pub request_prefix: String,

    /// Prefix for topics carrying status-tagged replies back.
    #[builder(into, default = DEFAULT_RESPONSE_PREFIX.to_string())]
    pub response_prefix: String,

    /// Optional namespace placed between the prefix and the method, so several
    /// remote endpoints can share one transport connection.
    #[builder(into)]
    pub target: Option<String>,

    /// Delivery assurance for publishes and subscriptions.
    #[builder(default)]
    pub qos: QoS,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BridgeConfig {
    /// The topics for one call of `method` under `session`.
    pub fn topics(&self, method: &MethodPath, session: &str) -> CallTopics {
        CallTopics::new(
            &self.request_prefix,
            &self.response_prefix,
            self.target.as_deref(),
            method,
            session,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.request_prefix, "/mrpc/request");
        assert_eq!(config.response_prefix, "/mrpc/response");
        assert_eq!(config.target, None);
        assert_eq!(config.qos, QoS::AtMostOnce);
    }

    #[test]
    fn test_builder_with_target() {
        let config = BridgeConfig::builder()
            .target("svc1")
            .request_prefix("/rpc/in")
            .build();
        let method = MethodPath::parse("/pkg.Svc/Method").unwrap();
        let topics = config.topics(&method, "/12345");
        assert_eq!(topics.request, "/rpc/in/svc1/pkg.Svc/Method/12345");
        assert_eq!(topics.response, "/mrpc/response/svc1/pkg.Svc/Method/12345");
    }
}

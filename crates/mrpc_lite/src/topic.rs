use crate::error::BridgeError;

/// A parsed gRPC method path: `/[{package}.]{service}/{method}`
///
/// Example: `/drone.EchoService/Echo`
/// - `package`: `Some("drone")`
/// - `service`: `EchoService`
/// - `method`: `Echo`
///
/// Services declared without a proto package, like `/Greeter/SayHello`, have
/// no package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    pub package: Option<String>,
    pub service: String,
    pub method: String,
}

impl MethodPath {
    /// Parse a full method name. The leading slash is optional.
    pub fn parse(path: &str) -> Result<Self, BridgeError> {
        let path = path.strip_prefix('/').unwrap_or(path);

        let (service_path, method) = path.rsplit_once('/').ok_or_else(|| {
            BridgeError::InvalidMethod(format!("method path must contain '/': '{path}'"))
        })?;

        let (package, service) = match service_path.rsplit_once('.') {
            Some((package, service)) => (Some(package), service),
            None => (None, service_path),
        };

        if package.is_some_and(str::is_empty) || service.is_empty() || method.is_empty() {
            return Err(BridgeError::InvalidMethod(format!(
                "package, service, and method must not be empty: '{path}'"
            )));
        }

        // Wildcards and extra levels would let one call's topics overlap another's.
        if path.contains(['+', '#']) || service_path.contains('/') {
            return Err(BridgeError::InvalidMethod(format!(
                "method path must not contain topic wildcards or extra levels: '{path}'"
            )));
        }

        Ok(MethodPath {
            package: package.map(str::to_owned),
            service: service.to_owned(),
            method: method.to_owned(),
        })
    }

    /// Returns the full service name: `{package}.{service}`, or just the
    /// service when there is no package.
    pub fn full_service(&self) -> String {
        match &self.package {
            Some(package) => format!("{package}.{}", self.service),
            None => self.service.clone(),
        }
    }

    /// Returns the full method name with its leading slash: `/{full_service}/{method}`
    pub fn full_method(&self) -> String {
        format!("/{}/{}", self.full_service(), self.method)
    }
}

/// The pair of topics that carry one bridged call.
///
/// - request: `{request_prefix}[/{target}]{full_method}{session}`
/// - response: `{response_prefix}[/{target}]{full_method}{session}`
/// - status frames: `{response}/{STATUS_TOKEN}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTopics {
    pub request: String,
    pub response: String,
}

impl CallTopics {
    pub fn new(
        request_prefix: &str,
        response_prefix: &str,
        target: Option<&str>,
        method: &MethodPath,
        session: &str,
    ) -> Self {
        let suffix = match target {
            Some(target) => format!("/{target}{}{session}", method.full_method()),
            None => format!("{}{session}", method.full_method()),
        };
        Self {
            request: format!("{request_prefix}{suffix}"),
            response: format!("{response_prefix}{suffix}"),
        }
    }

    /// The filter that catches every status-tagged reply for this call.
    pub fn response_filter(&self) -> String {
        format!("{}/+", self.response)
    }

    pub fn status_topic(&self, token: &str) -> String {
        format!("{}/{token}", self.response)
    }

    /// Extract the status token from a reply topic, if it belongs to this call.
    pub fn status_token<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic.strip_prefix(self.response.as_str())?.strip_prefix('/')
    }
}

/// MQTT-style filter matching: `+` matches one level, a trailing `#` matches
/// the remaining levels including none.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

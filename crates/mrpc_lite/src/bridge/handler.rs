use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tonic::Status;

use crate::connection::ServerCall;

/// A service implementation that answers a method locally instead of bridging it.
///
/// The handler reads caller frames from `call.inbound`, writes replies to
/// `call.outbound`, and returns the final status.
pub type LocalHandler =
    Arc<dyn Fn(ServerCall) -> BoxFuture<'static, Result<(), Status>> + Send + Sync + 'static>;

/// The routing decision for one call, made once when the call arrives.
#[derive(Clone)]
pub enum Route {
    /// A local handler owns the method; the bridge stays out of the way.
    Local(LocalHandler),
    /// No local handler; the call is carried over the transport.
    Remote,
}

impl Route {
    pub fn is_remote(&self) -> bool {
        matches!(self, Route::Remote)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Local(_) => f.write_str("Local"),
            Route::Remote => f.write_str("Remote"),
        }
    }
}

/// Helper to create a boxed handler from an async closure.
pub fn make_handler<F, Fut>(f: F) -> LocalHandler
where
    F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    Arc::new(move |call| Box::pin(f(call)))
}

//! The bridge dispatcher.
//!
//! Every incoming call is routed once: methods with a registered local handler
//! are served directly, everything else is carried over the transport. A bridged
//! call owns a session id, a response subscription, and a forwarder task for as
//! long as it runs; all three are released on every exit path.

mod config;
mod forwarder;
mod handler;
mod listener;
mod service;

pub use config::{BridgeConfig, DEFAULT_REQUEST_PREFIX, DEFAULT_RESPONSE_PREFIX};
pub use handler::{LocalHandler, Route, make_handler};
pub use service::{BridgeServer, BridgedResponse};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tonic::Status;
use tracing::{debug, info};

use crate::connection::ServerCall;
use crate::context::{CallContext, wait_context};
use crate::error::BridgeError;
use crate::pool::SessionPool;
use crate::topic::MethodPath;
use crate::transport::Transport;
use forwarder::{RequestStream, forward_requests};
use listener::{Completion, Listener};

/// Bridges streaming calls without a local handler onto a publish/subscribe transport.
pub struct Bridge<T> {
    transport: Arc<T>,
    pool: Arc<SessionPool>,
    config: BridgeConfig,
    handlers: HashMap<String, LocalHandler>,
}

impl<T: Transport> Bridge<T> {
    /// Create a bridge with its own session pool.
    pub fn new(transport: Arc<T>, config: BridgeConfig) -> Self {
        Self::with_pool(transport, config, Arc::new(SessionPool::new()))
    }

    /// Create a bridge that draws session ids from `pool`.
    pub fn with_pool(transport: Arc<T>, config: BridgeConfig, pool: Arc<SessionPool>) -> Self {
        Self {
            transport,
            pool,
            config,
            handlers: HashMap::new(),
        }
    }

    /// Register a local handler for a full method name.
    ///
    /// # Example
    /// ```ignore
    /// bridge.register_local("/drone.EchoService/Echo", |mut call: ServerCall| async move {
    ///     while let Some(frame) = call.inbound.recv().await? {
    ///         call.outbound.send(frame)?;
    ///     }
    ///     Ok(())
    /// })?;
    /// ```
    pub fn register_local<F, Fut>(&mut self, method: &str, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let method = MethodPath::parse(method)?.full_method();
        self.handlers.insert(method.clone(), make_handler(handler));

        info!(method = %method, "Registered local handler");
        Ok(())
    }

    /// Decide how a call for `method` is served.
    pub fn route(&self, method: &str) -> Route {
        let handler = MethodPath::parse(method)
            .ok()
            .and_then(|path| self.handlers.get(&path.full_method()));
        match handler {
            Some(handler) => Route::Local(Arc::clone(handler)),
            None => Route::Remote,
        }
    }

    /// Serve one call to completion.
    ///
    /// Returns `Ok(())` when the call finished successfully, otherwise the error
    /// to surface to the caller.
    pub async fn dispatch(&self, call: ServerCall) -> Result<(), BridgeError> {
        match self.route(&call.method) {
            Route::Local(handler) => (*handler)(call).await.map_err(BridgeError::Handler),
            Route::Remote => self.dispatch_remote(call).await,
        }
    }

    async fn dispatch_remote(&self, call: ServerCall) -> Result<(), BridgeError> {
        let ServerCall {
            method,
            context,
            inbound,
            outbound,
        } = call;
        let method = MethodPath::parse(&method)?;

        if !self.transport.is_connected() {
            match wait_context(&context, self.transport.connect()).await {
                Some(Ok(())) => debug!("Transport connected"),
                Some(Err(err)) => return Err(BridgeError::Connect(err)),
                None => return Err(context_error(&context)),
            }
        }

        let session = self.pool.acquire();
        let topics = self.config.topics(&method, &session);
        let filter = topics.response_filter();

        let (completion, done) = Completion::new();
        let listener = Listener::new(topics.clone(), outbound, Arc::clone(&completion));
        let subscribed = self
            .transport
            .subscribe(&filter, self.config.qos, listener.into_handler());

        // From here on, the guard unsubscribes and closes the completion channel on
        // every exit. It is declared after `session`, so it drops first.
        let mut guard = CallGuard {
            transport: Arc::clone(&self.transport),
            filter,
            completion,
            forwarder: None,
            requests: None,
        };

        match wait_context(&context, subscribed).await {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(BridgeError::Subscribe(err)),
            None => return Err(context_error(&context)),
        }

        info!(
            method = %method.full_method(),
            session = %session,
            request_topic = %topics.request,
            "Bridging call"
        );

        let requests = Arc::new(RequestStream::new(
            Arc::clone(&self.transport),
            topics.request.clone(),
            self.config.qos,
        ));
        let forwarder = tokio::spawn(forward_requests(
            context.clone(),
            Arc::clone(&requests),
            inbound,
        ));
        guard.forwarder = Some(forwarder);
        guard.requests = Some(requests);

        let result = tokio::select! {
            err = context.done() => Err(err),
            result = done => result.unwrap_or(Err(BridgeError::ContextCancelled)),
        };

        debug!(
            method = %method.full_method(),
            session = %session,
            ok = result.is_ok(),
            "Bridged call finished"
        );
        result
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn has_local_handler(&self, method: &str) -> bool {
        !self.route(method).is_remote()
    }
}

fn context_error(context: &CallContext) -> BridgeError {
    context.err().unwrap_or(BridgeError::ContextExpired)
}

// Releases the per-call transport state when a bridged call ends, however it ends.
struct CallGuard<T: Transport> {
    transport: Arc<T>,
    filter: String,
    completion: Arc<Completion>,
    forwarder: Option<JoinHandle<()>>,
    requests: Option<Arc<RequestStream<T>>>,
}

impl<T: Transport> Drop for CallGuard<T> {
    fn drop(&mut self) {
        self.completion.close();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        // The remote side still expects the request stream to end, even when the
        // call finished before the caller stopped sending.
        if let Some(requests) = self.requests.take() {
            if requests.close() {
                debug!(topic = %requests.topic(), "Closed request stream on call exit");
            }
        }
        drop(self.transport.unsubscribe(&self.filter));
    }
}

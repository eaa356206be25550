use futures::Stream;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tonic::Status;
use tonic::codegen::{Body, BoxFuture, Service, StdError, http};
use tonic::server::{Grpc, StreamingService};

use crate::bridge::Bridge;
use crate::connection::{CallInbound, CallOutbound, ServerCall};
use crate::context::CallContext;
use crate::frame::{Frame, RawCodec};
use crate::transport::Transport;

impl<T: Transport> Bridge<T> {
    /// Run a call on its own task and return the stream of frames for the caller.
    ///
    /// The stream yields every forwarded frame, then the call's error if it
    /// failed. Dropping the stream cancels the call.
    pub fn spawn_call(
        self: &Arc<Self>,
        method: impl Into<String>,
        context: CallContext,
        inbound: CallInbound,
    ) -> BridgedResponse {
        let (outbound, frames) = CallOutbound::channel();
        let (finish, finished) = oneshot::channel();
        let call = ServerCall::new(method, context.clone(), inbound, outbound);

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let result = bridge.dispatch(call).await.map_err(Status::from);
            let _ = finish.send(result);
        });

        BridgedResponse {
            frames,
            finished: Some(finished),
            terminal: None,
            draining: false,
            context,
        }
    }
}

/// The caller-facing side of a call started with [`Bridge::spawn_call`].
pub struct BridgedResponse {
    frames: mpsc::UnboundedReceiver<Frame>,
    finished: Option<oneshot::Receiver<Result<(), Status>>>,
    terminal: Option<Status>,
    draining: bool,
    context: CallContext,
}

impl BridgedResponse {
    pub fn context(&self) -> &CallContext {
        &self.context
    }
}

impl Stream for BridgedResponse {
    type Item = Result<Frame, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();

        if !this.draining {
            if let Poll::Ready(Some(frame)) = this.frames.poll_recv(cx) {
                return Poll::Ready(Some(Ok(frame)));
            }

            let Some(finished) = this.finished.as_mut() else {
                return Poll::Ready(None);
            };
            let result = match Pin::new(finished).poll(cx) {
                Poll::Ready(result) => result,
                Poll::Pending => return Poll::Pending,
            };

            this.finished = None;
            this.draining = true;
            // Replies that race past completion are dropped.
            this.frames.close();
            this.terminal = match result {
                Ok(Ok(())) => None,
                Ok(Err(status)) => Some(status),
                Err(_) => Some(Status::internal("bridged call ended without a result")),
            };
        }

        match this.frames.try_recv() {
            Ok(frame) => Poll::Ready(Some(Ok(frame))),
            Err(_) => Poll::Ready(this.terminal.take().map(Err)),
        }
    }
}

impl Drop for BridgedResponse {
    fn drop(&mut self) {
        self.context.cancel();
    }
}

/// A gRPC service that serves any method path through a [`Bridge`].
///
/// Request and response bodies are passed through as raw frames, so the bridge
/// never needs the message types. Mount it as the fallback for unknown services.
pub struct BridgeServer<T> {
    bridge: Arc<Bridge<T>>,
}

impl<T> BridgeServer<T> {
    pub fn new(bridge: Arc<Bridge<T>>) -> Self {
        Self { bridge }
    }
}

impl<T> Clone for BridgeServer<T> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
        }
    }
}

struct BridgedMethod<T> {
    bridge: Arc<Bridge<T>>,
    method: String,
}

impl<T: Transport> StreamingService<Frame> for BridgedMethod<T> {
    type Response = Frame;
    type ResponseStream = BridgedResponse;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: tonic::Request<tonic::Streaming<Frame>>) -> Self::Future {
        let bridge = Arc::clone(&self.bridge);
        let method = self.method.clone();
        Box::pin(async move {
            let context = CallContext::from_metadata(request.metadata());
            let inbound = CallInbound::new(request.into_inner());
            Ok(tonic::Response::new(bridge.spawn_call(method, context, inbound)))
        })
    }
}

impl<T, B> Service<http::Request<B>> for BridgeServer<T>
where
    T: Transport,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let method = BridgedMethod {
            bridge: Arc::clone(&self.bridge),
            method: req.uri().path().to_owned(),
        };
        Box::pin(async move {
            let mut grpc = Grpc::new(RawCodec);
            Ok(grpc.streaming(method, req).await)
        })
    }
}

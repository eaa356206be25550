use async_stream::stream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tonic::Status;

use crate::context::CallContext;
use crate::error::BridgeError;
use crate::frame::Frame;

/// The inbound half of a call: frames sent by the caller.
///
/// This wraps any stream of frames, typically a `tonic::Streaming<Frame>`.
pub struct CallInbound {
    inner: Pin<Box<dyn Stream<Item = Result<Frame, Status>> + Send>>,
}

impl CallInbound {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Frame, Status>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// An inbound stream that yields `frames` and then ends.
    pub fn from_frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        let frames: Vec<Frame> = frames.into_iter().collect();
        Self::new(futures::stream::iter(frames.into_iter().map(Ok)))
    }

    /// An inbound stream fed by a channel. It ends when every sender is dropped.
    pub fn from_receiver(mut rx: mpsc::Receiver<Frame>) -> Self {
        let inner = stream! {
            while let Some(frame) = rx.recv().await {
                yield Ok(frame);
            }
        };
        Self::new(inner)
    }

    /// Read the next frame. `Ok(None)` is the caller's end of input.
    pub async fn recv(&mut self) -> Result<Option<Frame>, Status> {
        self.inner.next().await.transpose()
    }
}

impl Stream for CallInbound {
    type Item = Result<Frame, Status>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// The outbound half of a call: frames going back to the caller.
///
/// Sending never blocks, so it is safe from transport callbacks.
#[derive(Debug, Clone)]
pub struct CallOutbound {
    tx: mpsc::UnboundedSender<Frame>,
}

impl CallOutbound {
    /// Create an outbound sink and the receiver the caller reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, frame: Frame) -> Result<(), BridgeError> {
        self.tx
            .send(frame)
            .map_err(|_| BridgeError::StreamForward("caller stopped reading".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One incoming streaming call.
pub struct ServerCall {
    /// Full method name, e.g. `/pkg.Svc/Method`.
    pub method: String,
    pub context: CallContext,
    pub inbound: CallInbound,
    pub outbound: CallOutbound,
}

impl ServerCall {
    pub fn new(
        method: impl Into<String>,
        context: CallContext,
        inbound: CallInbound,
        outbound: CallOutbound,
    ) -> Self {
        Self {
            method: method.into(),
            context,
            inbound,
            outbound,
        }
    }
}

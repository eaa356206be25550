use anyhow::{Context, Result, bail};
use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use mrpc_lite::bridge::{DEFAULT_REQUEST_PREFIX, DEFAULT_RESPONSE_PREFIX};
use mrpc_lite::{
    Bridge, BridgeConfig, CallContext, CallInbound, END_OF_STREAM, Frame, MemoryBroker, Message,
    MessageHandler, QoS, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tonic::Status;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Serves every bridged call on `target` by echoing each request frame
/// upper-cased, then finishing with success.
async fn spawn_echo_peer(broker: &Arc<MemoryBroker>, target: &str) -> Result<()> {
    let replier = Arc::clone(broker);
    let handler: MessageHandler = Arc::new(move |msg: Message| {
        let reply = msg
            .topic()
            .replacen(DEFAULT_REQUEST_PREFIX, DEFAULT_RESPONSE_PREFIX, 1);
        let payload = if msg.payload().as_ref() == END_OF_STREAM {
            Bytes::from_static(END_OF_STREAM)
        } else {
            Bytes::from(msg.payload().to_ascii_uppercase())
        };
        msg.ack();
        drop(replier.publish(&format!("{reply}/OK"), QoS::AtMostOnce, false, payload));
    });

    let filter = format!("{DEFAULT_REQUEST_PREFIX}/{target}/#");
    broker
        .subscribe(&filter, QoS::AtMostOnce, handler)
        .wait()
        .await
        .with_context(|| format!("echo peer could not subscribe to {filter}"))?;
    info!(filter = %filter, "Echo peer listening");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let target = std::env::var("MRPC_TARGET").unwrap_or_else(|_| "drone-1".to_string());
    let method = std::env::var("MRPC_METHOD").unwrap_or_else(|_| "/drone.Echo/Shout".to_string());

    let broker = Arc::new(MemoryBroker::new());
    spawn_echo_peer(&broker, &target).await?;

    let config = BridgeConfig::builder().target(target.clone()).build();
    let bridge = Arc::new(Bridge::new(Arc::clone(&broker), config));

    let words = ["hello", "over", "the", "broker"];
    let requests = stream! {
        for word in words {
            tokio::time::sleep(Duration::from_millis(50)).await;
            yield Ok::<_, Status>(Frame::from(word));
        }
    };

    let context = CallContext::new().with_timeout(Duration::from_secs(5));
    let mut response = bridge.spawn_call(method.as_str(), context, CallInbound::new(requests));

    while let Some(item) = response.next().await {
        match item {
            Ok(frame) => println!("{}", String::from_utf8_lossy(frame.as_bytes())),
            Err(status) => {
                warn!(code = ?status.code(), message = status.message(), "Call failed");
                bail!("bridged call failed: {status}");
            }
        }
    }

    info!(
        method = %method,
        sessions_idle = bridge.pool().idle(),
        "Call finished"
    );
    Ok(())
}

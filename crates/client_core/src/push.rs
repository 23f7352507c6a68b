use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::SyncEngine;

/// Connects to the push channel and feeds every JSON text frame into
/// [`SyncEngine::on_raw_event`]. Connectivity is reported through
/// [`SyncEngine::set_connected`] for the lifetime of the socket.
pub async fn spawn_push_listener(engine: Arc<SyncEngine>, url: &str) -> Result<JoinHandle<()>> {
    let (ws_stream, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect push channel: {url}"))?;
    let (_, mut ws_reader) = ws_stream.split();
    info!(%url, "push: connected");
    engine.set_connected(true).await;

    Ok(tokio::spawn(async move {
        while let Some(frame) = ws_reader.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => {
                        if let Err(err) = engine.on_raw_event(&value).await {
                            debug!("push: {err}");
                        }
                    }
                    Err(err) => warn!("push: skipping invalid frame: {err}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("push: connection error: {err}");
                    break;
                }
            }
        }
        info!("push: disconnected");
        engine.set_connected(false).await;
    }))
}

#[cfg(test)]
#[path = "tests/push_tests.rs"]
mod tests;

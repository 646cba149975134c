//! Heartbeat listener
//!
//! Turns the monitored source's periodic status messages into
//! [`Environment`] values for the coordinator.

use crate::common::Result;
use crate::ha::environment::Environment;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Publish/subscribe channel carrying raw heartbeat JSON
#[async_trait]
pub trait HeartbeatSource: Send {
    /// Wait for the next message. An error ends the listener.
    async fn next_payload(&mut self) -> Result<String>;
}

/// Forward every decoded heartbeat to `env_tx` until an error occurs
pub async fn run_heartbeat_listener<S>(mut source: S, env_tx: mpsc::Sender<Environment>) -> Result<()>
where
    S: HeartbeatSource,
{
    tracing::info!("Starting heartbeat listener");

    loop {
        let payload = source.next_payload().await?;
        let env = Environment::from_heartbeat(&payload)
            .inspect_err(|e| tracing::error!(error = %e, "Failed to decode heartbeat"))?;

        tracing::trace!(environment = %env.id_hex(), node = %env.node_name, "Received heartbeat");
        env_tx.send(env).await?;
    }
}

//! Task wiring for the HA core
//!
//! Spawns the heartbeat listener, the coordinator and the dump listener
//! against their collaborators. A task that fails pushes its error onto the
//! process-wide error channel; nothing is restarted here.

use crate::common::{Error, HaConfig, Result};
use crate::ha::coordinator::Coordinator;
use crate::ha::dump::{DumpListener, DumpStream};
use crate::ha::heartbeat::{run_heartbeat_listener, HeartbeatSource};
use crate::ha::listeners::Notification;
use crate::ha::state::HaState;
use crate::ha::store::InstanceStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct HaRuntime {
    config: HaConfig,
    state: Arc<HaState>,
    tasks: Vec<JoinHandle<()>>,
}

impl HaRuntime {
    pub fn new(config: HaConfig) -> Self {
        let state = Arc::new(HaState::new(config.listener_capacity));
        Self {
            config,
            state,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> Arc<HaState> {
        self.state.clone()
    }

    /// Subscribe a sync consumer; see [`crate::ha::listeners::WILDCARD`]
    pub fn subscribe(&self, listener_type: &str) -> mpsc::Receiver<Notification> {
        self.state.subscribe(listener_type)
    }

    /// Spawn the three HA tasks.
    ///
    /// Returns the instance id this process will write to the ownership
    /// table.
    pub fn start<S>(
        &mut self,
        source: S,
        store: Arc<dyn InstanceStore>,
        stream: Arc<dyn DumpStream>,
        err_tx: mpsc::Sender<Error>,
    ) -> Uuid
    where
        S: HeartbeatSource + 'static,
    {
        let (env_tx, env_rx) = mpsc::channel(self.config.environment_queue);

        let coordinator = Coordinator::new(store, self.state.clone(), self.config.clone());
        let instance_id = coordinator.instance_id();
        tracing::info!(instance = %instance_id, version = crate::VERSION, "Starting HA");

        let dump = DumpListener::new(
            self.state.clone(),
            stream,
            self.config.dump_poll_interval(),
        );

        self.spawn("heartbeat", err_tx.clone(), run_heartbeat_listener(source, env_tx));
        self.spawn("coordinator", err_tx.clone(), coordinator.run(env_rx));
        self.spawn("dump", err_tx, dump.run());

        instance_id
    }

    /// Abort every spawned task
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn spawn<F>(&mut self, name: &'static str, err_tx: mpsc::Sender<Error>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(task = name, category = e.category(), error = %e, "HA task failed");
                // A closed error channel means the process is already shutting down.
                let _ = err_tx.send(e).await;
            }
        }));
    }
}

impl Drop for HaRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{ChannelHeartbeatSource, MemoryDumpStream, MemoryInstanceStore};

    #[tokio::test]
    async fn test_closed_source_is_escalated() {
        let mut runtime = HaRuntime::new(HaConfig::default());
        let (payload_tx, source) = ChannelHeartbeatSource::channel(1);
        let (err_tx, mut err_rx) = mpsc::channel(4);

        runtime.start(
            source,
            Arc::new(MemoryInstanceStore::new()),
            Arc::new(MemoryDumpStream::new()),
            err_tx,
        );
        drop(payload_tx);

        // The listener reports the closed source, then the coordinator
        // sees its input end before any environment arrived.
        let mut seen = vec![err_rx.recv().await.unwrap(), err_rx.recv().await.unwrap()];
        seen.sort_by_key(|e| e.category());
        assert!(matches!(seen[0], Error::EmptyEnvironment));
        assert!(matches!(seen[1], Error::ChannelClosed(_)));
    }
}

//! HA election state machine
//!
//! ```text
//! Uninitialized --first environment--> Checking --> Active | Passive
//!                                                     ^         |
//!                                                     +---------+
//!                                      heartbeats, stale owners, timer expiry
//! ```
//!
//! The coordinator is the only writer of this process's ownership row and
//! the only consumer of the environment queue, so its private state needs no
//! locking. Cross-process races on the row are settled by heartbeat
//! timestamps: two instances may briefly both believe they are active right
//! after a takeover, and the next heartbeat cycle converges them.

use crate::common::{timestamp_now, Error, HaConfig, Result, METRICS, SHA1_LEN};
use crate::ha::environment::Environment;
use crate::ha::listeners::{Notification, WILDCARD};
use crate::ha::state::HaState;
use crate::ha::store::{InstanceRow, InstanceStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub struct Coordinator {
    state: Arc<HaState>,
    store: Arc<dyn InstanceStore>,
    config: HaConfig,
    instance_id: Uuid,
    environment_id: Option<[u8; SHA1_LEN]>,
    /// Seconds since epoch of the last processed heartbeat, 0 before the first
    last_heartbeat: i64,
}

impl Coordinator {
    pub fn new(store: Arc<dyn InstanceStore>, state: Arc<HaState>, config: HaConfig) -> Self {
        Self {
            state,
            store,
            config,
            instance_id: Uuid::new_v4(),
            environment_id: None,
            last_heartbeat: 0,
        }
    }

    /// Random id naming this process in the ownership table
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Run the election until an error occurs.
    ///
    /// Waits for the first environment, performs the responsibility check,
    /// then reacts to heartbeats and failure-detection timeouts forever.
    pub async fn run(mut self, mut env_rx: mpsc::Receiver<Environment>) -> Result<()> {
        let env = self.wait_for_environment(&mut env_rx).await?;

        let span = tracing::info_span!(
            "ha",
            environment = %env.id_hex(),
            instance = %self.instance_id
        );

        self.run_elected(env, env_rx).instrument(span).await
    }

    async fn run_elected(
        mut self,
        env: Environment,
        mut env_rx: mpsc::Receiver<Environment>,
    ) -> Result<()> {
        tracing::info!("Got initial environment");
        self.check_responsibility(&env).await?;

        let timeout = self.config.takeover_timeout();
        let timer = tokio::time::sleep(timeout);
        tokio::pin!(timer);
        let mut armed = true;

        loop {
            tokio::select! {
                env = env_rx.recv() => {
                    let env = env.ok_or_else(|| {
                        Error::ChannelClosed("heartbeat listener stopped".into())
                    })?;
                    timer.as_mut().reset(Instant::now() + timeout);
                    armed = true;
                    self.on_heartbeat(&env).await?;
                }
                _ = &mut timer, if armed => {
                    armed = false;
                    self.on_heartbeat_timeout().await;
                }
            }
        }
    }

    async fn wait_for_environment(
        &mut self,
        env_rx: &mut mpsc::Receiver<Environment>,
    ) -> Result<Environment> {
        match env_rx.recv().await {
            Some(env) => {
                self.environment_id = Some(env.id);
                Ok(env)
            }
            None => {
                tracing::error!("Received empty environment");
                Err(Error::EmptyEnvironment)
            }
        }
    }

    /// Decide between Active and Passive after adopting `env`
    pub async fn check_responsibility(&mut self, env: &Environment) -> Result<()> {
        self.environment_id.get_or_insert(env.id);
        let now = timestamp_now();

        let owner = self
            .store
            .fetch_owner(&env.id)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to fetch instance"))?;

        match owner {
            None => {
                tracing::info!("Taking over");
                self.store
                    .insert(&self.row(env, now))
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, "Failed to insert instance"))?;
                self.state.set_active(true);
            }
            Some(owner) if owner.is_stale(now, self.config.takeover_timeout_secs) => {
                tracing::info!(previous = %owner.id, last_heartbeat = owner.heartbeat, "Taking over");
                self.store
                    .take_over(&self.row(env, now))
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, "Failed to update instance"))?;
                METRICS.takeovers.inc();
                self.state.set_active(true);
            }
            Some(owner) => {
                tracing::info!(owner = %owner.id, "Other instance is active");
                self.become_passive();
            }
        }
        Ok(())
    }

    /// Process one heartbeat of the monitored source
    pub async fn on_heartbeat(&mut self, env: &Environment) -> Result<()> {
        let expected = *self.environment_id.get_or_insert(env.id);
        if env.id != expected {
            tracing::error!(
                received = %env.id_hex(),
                "Received environment is not the one we expected"
            );
            return Err(Error::UnexpectedEnvironment {
                expected: hex::encode(expected),
                got: env.id_hex(),
            });
        }

        METRICS.heartbeats.inc();
        let now = timestamp_now();
        let previous = std::mem::replace(&mut self.last_heartbeat, now);

        if now - previous < self.config.fast_path_secs as i64 && self.state.is_active() {
            return self.update_own(env, now).await;
        }

        let owner = self
            .store
            .fetch_owner(&env.id)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to fetch instance"))?;

        match owner {
            Some(owner) if owner.id == self.instance_id => {
                tracing::debug!("We are active");
                if !self.state.is_active() {
                    tracing::info!("Icinga 2 sent heartbeat. Starting sync");
                    self.state.set_active(true);
                }
                self.update_own(env, now).await?;
            }
            Some(owner) if owner.is_stale(now, self.config.takeover_timeout_secs) => {
                tracing::info!(previous = %owner.id, last_heartbeat = owner.heartbeat, "Taking over");
                self.store
                    .take_over(&self.row(env, now))
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, "Failed to update instance"))?;
                METRICS.takeovers.inc();
                self.state.set_active(true);
            }
            Some(owner) => {
                tracing::debug!(owner = %owner.id, "Other instance is active");
                if self.state.is_active() {
                    tracing::info!(owner = %owner.id, "Lost ownership. Pausing sync");
                    self.become_passive();
                    self.state.notify(WILDCARD, Notification::StopSync).await;
                }
            }
            None => {
                tracing::info!("Instance row vanished. Taking over");
                self.store
                    .insert(&self.row(env, now))
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, "Failed to insert instance"))?;
                self.state.set_active(true);
            }
        }
        Ok(())
    }

    /// The monitored source has been silent for the takeover timeout
    pub async fn on_heartbeat_timeout(&mut self) {
        tracing::info!(
            timeout_secs = self.config.takeover_timeout_secs,
            "Icinga 2 sent no heartbeat. Pausing sync"
        );
        METRICS.heartbeat_timeouts.inc();
        self.become_passive();
        self.state.notify(WILDCARD, Notification::StopSync).await;
    }

    fn become_passive(&self) {
        self.state.set_active(false);
        self.state.reset_last_event_id();
    }

    async fn update_own(&self, env: &Environment, now: i64) -> Result<()> {
        self.store
            .update_own(&self.row(env, now))
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to update instance"))
    }

    fn row(&self, env: &Environment, heartbeat: i64) -> InstanceRow {
        InstanceRow {
            id: self.instance_id,
            environment_id: env.id,
            endpoint_id: env.endpoint_id(),
            heartbeat,
            responsible: true,
            icinga2_version: env.icinga2.version.clone(),
            icinga2_start_time: env.program_start_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryInstanceStore;
    use crate::ha::environment::Icinga2Info;
    use crate::ha::state::STREAM_START;

    fn env(name: &str) -> Environment {
        Environment::new(
            name,
            "master1",
            Icinga2Info {
                version: "r2.14.0".into(),
                program_start: 1_700_000_000.5,
                is_part_of_a_cluster: true,
            },
        )
    }

    fn coordinator(store: Arc<MemoryInstanceStore>) -> Coordinator {
        Coordinator::new(store, Arc::new(HaState::new(10)), HaConfig::default())
    }

    fn foreign_row(env: &Environment, heartbeat: i64) -> InstanceRow {
        InstanceRow {
            id: Uuid::new_v4(),
            environment_id: env.id,
            endpoint_id: None,
            heartbeat,
            responsible: true,
            icinga2_version: "r2.13.0".into(),
            icinga2_start_time: 0,
        }
    }

    #[tokio::test]
    async fn test_check_inserts_when_table_empty() {
        let store = Arc::new(MemoryInstanceStore::new());
        let mut coord = coordinator(store.clone());
        let env = env("production");

        coord.check_responsibility(&env).await.unwrap();

        assert!(coord.is_active());
        assert_eq!(store.write_count(), 1);
        let row = store.row(&env.id).unwrap();
        assert_eq!(row.id, coord.instance_id());
        assert!(row.responsible);
        assert_eq!(row.endpoint_id, env.endpoint_id());
        assert_eq!(row.icinga2_start_time, 1_700_000_000_500);
    }

    #[tokio::test]
    async fn test_check_yields_to_fresh_owner() {
        let env = env("production");
        let other = foreign_row(&env, timestamp_now() - 3);
        let store = Arc::new(MemoryInstanceStore::with_rows([other.clone()]));
        let mut coord = coordinator(store.clone());

        coord.check_responsibility(&env).await.unwrap();

        assert!(!coord.is_active());
        assert_eq!(coord.state.last_event_id(), STREAM_START);
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.row(&env.id).unwrap(), other);
    }

    #[tokio::test]
    async fn test_check_takes_over_stale_owner() {
        let env = env("production");
        let store = Arc::new(MemoryInstanceStore::with_rows([foreign_row(
            &env,
            timestamp_now() - 60,
        )]));
        let mut coord = coordinator(store.clone());

        coord.check_responsibility(&env).await.unwrap();

        assert!(coord.is_active());
        assert_eq!(store.row(&env.id).unwrap().id, coord.instance_id());
        assert!(store.row(&env.id).unwrap().heartbeat >= timestamp_now() - 1);
    }

    #[tokio::test]
    async fn test_heartbeat_fast_path_only_refreshes() {
        let store = Arc::new(MemoryInstanceStore::new());
        let mut coord = coordinator(store.clone());
        let env = env("production");
        coord.check_responsibility(&env).await.unwrap();

        // First heartbeat always takes the slow path.
        coord.on_heartbeat(&env).await.unwrap();
        let reads = store.read_count();
        coord.on_heartbeat(&env).await.unwrap();
        coord.on_heartbeat(&env).await.unwrap();

        assert_eq!(store.read_count(), reads);
        assert_eq!(store.write_count(), 4);
        assert!(coord.is_active());
    }

    #[tokio::test]
    async fn test_passive_heartbeat_rechecks_owner() {
        let env = env("production");
        let store = Arc::new(MemoryInstanceStore::with_rows([foreign_row(
            &env,
            timestamp_now(),
        )]));
        let mut coord = coordinator(store.clone());
        coord.check_responsibility(&env).await.unwrap();

        coord.on_heartbeat(&env).await.unwrap();
        coord.on_heartbeat(&env).await.unwrap();

        assert!(!coord.is_active());
        assert_eq!(store.read_count(), 3);
        assert_eq!(store.write_count(), 0);

        // The other owner goes silent.
        store.set_heartbeat(&env.id, timestamp_now() - 16);
        coord.on_heartbeat(&env).await.unwrap();

        assert!(coord.is_active());
        assert_eq!(store.row(&env.id).unwrap().id, coord.instance_id());
    }

    #[tokio::test]
    async fn test_heartbeat_for_other_environment_is_fatal() {
        let store = Arc::new(MemoryInstanceStore::new());
        let mut coord = coordinator(store);
        coord.check_responsibility(&env("production")).await.unwrap();

        let err = coord.on_heartbeat(&env("staging")).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEnvironment { .. }));
    }

    #[tokio::test]
    async fn test_timeout_pauses_and_broadcasts() {
        let store = Arc::new(MemoryInstanceStore::new());
        let mut coord = coordinator(store);
        let mut host = coord.state.subscribe("host");
        let mut all = coord.state.subscribe(WILDCARD);
        let env = env("production");
        coord.check_responsibility(&env).await.unwrap();
        coord.state.set_last_event_id("1700000000000-0");

        coord.on_heartbeat_timeout().await;

        assert!(!coord.is_active());
        assert_eq!(coord.state.last_event_id(), STREAM_START);
        assert_eq!(host.try_recv().unwrap(), Notification::StopSync);
        assert_eq!(all.try_recv().unwrap(), Notification::StopSync);
    }

    #[tokio::test]
    async fn test_losing_ownership_pauses() {
        let store = Arc::new(MemoryInstanceStore::new());
        let mut coord = coordinator(store.clone());
        let mut all = coord.state.subscribe(WILDCARD);
        let env = env("production");
        coord.check_responsibility(&env).await.unwrap();
        coord.on_heartbeat(&env).await.unwrap();

        // Another instance took the row over while we were slow.
        store.force_owner(&env.id, Uuid::new_v4(), timestamp_now());
        coord.last_heartbeat -= 30;
        coord.on_heartbeat(&env).await.unwrap();

        assert!(!coord.is_active());
        assert_eq!(all.try_recv().unwrap(), Notification::StopSync);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let store = Arc::new(MemoryInstanceStore::new());
        store.fail_with("connection reset");
        let mut coord = coordinator(store);

        let err = coord
            .check_responsibility(&env("production"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!coord.is_active());
    }
}

//! Election and failover between instances sharing one ownership table

use monsync::backend::{ChannelHeartbeatSource, MemoryDumpStream, MemoryInstanceStore};
use monsync::common::{timestamp_now, Error, HaConfig};
use monsync::ha::{
    Coordinator, Environment, HaRuntime, HaState, Icinga2Info, Notification, WILDCARD,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn environment(name: &str, node: &str) -> Environment {
    Environment::new(
        name,
        node,
        Icinga2Info {
            version: "r2.14.0".into(),
            program_start: 1_700_000_000.0,
            is_part_of_a_cluster: true,
        },
    )
}

fn heartbeat(name: &str) -> String {
    serde_json::json!({
        "IcingaApplication": {"status": {"icingaapplication": {"app": {
            "environment": name,
            "node_name": "master1",
            "version": "r2.14.0",
            "program_start": 1_700_000_000.0,
            "is_part_of_a_cluster": true,
        }}}}
    })
    .to_string()
}

fn instance(store: &Arc<MemoryInstanceStore>) -> (Arc<HaState>, Coordinator) {
    let state = Arc::new(HaState::new(10));
    let coordinator = Coordinator::new(store.clone(), state.clone(), HaConfig::default());
    (state, coordinator)
}

async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_first_instance_wins_second_waits() {
    let store = Arc::new(MemoryInstanceStore::new());
    let env = environment("production", "master1");
    let (_, mut first) = instance(&store);
    let (_, mut second) = instance(&store);

    first.check_responsibility(&env).await.unwrap();
    second.check_responsibility(&env).await.unwrap();

    assert!(first.is_active());
    assert!(!second.is_active());
    assert_eq!(store.row(&env.id).unwrap().id, first.instance_id());

    // Both keep receiving heartbeats; ownership does not move.
    for _ in 0..3 {
        first.on_heartbeat(&env).await.unwrap();
        second.on_heartbeat(&env).await.unwrap();
    }
    assert!(first.is_active());
    assert!(!second.is_active());
    assert_eq!(store.row(&env.id).unwrap().id, first.instance_id());
}

#[tokio::test]
async fn test_standby_takes_over_silent_owner() {
    let store = Arc::new(MemoryInstanceStore::new());
    let env = environment("production", "master1");
    let (first_state, mut first) = instance(&store);
    let (_, mut second) = instance(&store);
    let mut first_all = first_state.subscribe(WILDCARD);

    first.check_responsibility(&env).await.unwrap();
    second.check_responsibility(&env).await.unwrap();

    // The owner stops refreshing its row.
    store.set_heartbeat(&env.id, timestamp_now() - 16);
    second.on_heartbeat(&env).await.unwrap();

    assert!(second.is_active());
    assert_eq!(store.row(&env.id).unwrap().id, second.instance_id());

    // The old owner comes back and finds a fresh foreign row.
    first.on_heartbeat(&env).await.unwrap();
    assert!(!first.is_active());
    assert_eq!(first_all.try_recv().unwrap(), Notification::StopSync);
    assert_eq!(first_state.last_event_id(), "0-0");
}

#[tokio::test(start_paused = true)]
async fn test_silence_pauses_sync() {
    let store = Arc::new(MemoryInstanceStore::new());
    let stream = Arc::new(MemoryDumpStream::new());
    stream.push("1-0", &[("type", "host"), ("state", "done")]);

    let mut runtime = HaRuntime::new(HaConfig::default());
    let state = runtime.state();
    let mut all = runtime.subscribe(WILDCARD);
    let (payload_tx, source) = ChannelHeartbeatSource::channel(4);
    let (err_tx, mut err_rx) = mpsc::channel(4);
    runtime.start(source, store.clone(), stream, err_tx);

    payload_tx.send(heartbeat("production")).await.unwrap();
    wait_until(|| state.is_active()).await;
    let activated = Instant::now();

    assert_eq!(all.recv().await, Some(Notification::StartSync));
    assert_eq!(state.last_event_id(), "1-0");

    // No further heartbeat: the failure timer fires.
    assert_eq!(all.recv().await, Some(Notification::StopSync));
    assert!(activated.elapsed() >= Duration::from_secs(14));
    assert!(!state.is_active());
    assert_eq!(state.last_event_id(), "0-0");
    assert!(err_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_timer_from_firing() {
    let store = Arc::new(MemoryInstanceStore::new());
    let mut runtime = HaRuntime::new(HaConfig::default());
    let state = runtime.state();
    let mut all = runtime.subscribe(WILDCARD);
    let (payload_tx, source) = ChannelHeartbeatSource::channel(4);
    let (err_tx, _err_rx) = mpsc::channel(4);
    runtime.start(source, store, Arc::new(MemoryDumpStream::new()), err_tx);

    payload_tx.send(heartbeat("production")).await.unwrap();
    wait_until(|| state.is_active()).await;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        payload_tx.send(heartbeat("production")).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(state.is_active());
    assert!(all.try_recv().is_err());
}

#[tokio::test]
async fn test_foreign_environment_is_escalated() {
    let store = Arc::new(MemoryInstanceStore::new());
    let mut runtime = HaRuntime::new(HaConfig::default());
    let (payload_tx, source) = ChannelHeartbeatSource::channel(4);
    let (err_tx, mut err_rx) = mpsc::channel(4);
    runtime.start(source, store, Arc::new(MemoryDumpStream::new()), err_tx);

    payload_tx.send(heartbeat("production")).await.unwrap();
    payload_tx.send(heartbeat("staging")).await.unwrap();

    let err = err_rx.recv().await.unwrap();
    assert!(matches!(err, Error::UnexpectedEnvironment { .. }));
    assert_eq!(err.category(), "protocol");
}

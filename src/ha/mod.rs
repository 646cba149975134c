//! High-availability core
//!
//! Decides which of several daemon instances watching the same Icinga 2
//! environment is responsible for synchronizing it, and tells downstream sync
//! consumers when to start and stop.

pub mod coordinator;
pub mod dump;
pub mod environment;
pub mod heartbeat;
pub mod listeners;
pub mod runtime;
pub mod state;
pub mod store;

pub use coordinator::Coordinator;
pub use dump::{DumpListener, DumpStream, StreamEvent};
pub use environment::{endpoint_id, Environment, Icinga2Info};
pub use heartbeat::{run_heartbeat_listener, HeartbeatSource};
pub use listeners::{Notification, NotificationRegistry, WILDCARD};
pub use runtime::HaRuntime;
pub use state::{HaState, STREAM_START};
pub use store::{InstanceRow, InstanceStore, OwnerHeartbeat};

//! # monsync
//!
//! High-availability core of a daemon that mirrors Icinga 2 monitoring data
//! into a relational database:
//! - Heartbeat-driven election of one responsible instance per environment
//! - Failure detection with takeover of silent owners
//! - Start/stop sync notifications fanned out to per-type consumers
//! - A canonical binary packer for content-derived identifiers
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  Redis icinga:stats            Redis icinga:dump
//!        │ (pub/sub)                   │ (stream)
//! ┌──────▼────────────┐        ┌───────▼──────────┐
//! │ Heartbeat listener │        │  Dump listener   │
//! └──────┬────────────┘        └───────┬──────────┘
//!        │ Environment            ▲    │ start/stop per type
//! ┌──────▼────────────┐  active,  │    │
//! │  HA coordinator    ├──event id─┘    │
//! └──────┬────────────┘                 │
//!        │ ownership row         ┌──────▼──────────┐
//! ┌──────▼────────────┐         │ sync consumers   │
//! │ icingadb_instance  │         │ (host, service,  │
//! │ (MySQL)            │         │  ..., "*")       │
//! └───────────────────┘         └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Run the HA core against Redis and MySQL
//! monsync serve --config monsync.toml
//!
//! # Print the endpoint id written for a clustered node
//! monsync endpoint-id --environment production --node master1 --cluster
//! ```

pub mod backend;
pub mod common;
pub mod ha;

// Re-export commonly used types
pub use common::{pack, Config, Error, Packable, Result};
pub use ha::{Coordinator, Environment, HaRuntime, Notification};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");

//! Environment reported by the monitored Icinga 2 instance

use crate::common::{pack, sha1_bytes, Result, SHA1_LEN};
use serde::Deserialize;

/// Identifies the monitored source instance currently reporting.
///
/// Decoded once per heartbeat and never mutated; the next heartbeat
/// produces a fresh value.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    /// SHA-1 of the environment name
    pub id: [u8; SHA1_LEN],
    pub name: String,
    pub node_name: String,
    pub icinga2: Icinga2Info,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Icinga2Info {
    pub version: String,
    /// Seconds since epoch, with fractional part
    pub program_start: f64,
    pub is_part_of_a_cluster: bool,
}

impl Environment {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>, icinga2: Icinga2Info) -> Self {
        let name = name.into();
        Self {
            id: sha1_bytes(name.as_bytes()),
            name,
            node_name: node_name.into(),
            icinga2,
        }
    }

    /// Decode the payload published on the status channel
    pub fn from_heartbeat(payload: &str) -> Result<Self> {
        let stats: IcingaStats = serde_json::from_str(payload)?;
        let app = stats.icinga_application.status.icinga_application.app;

        Ok(Self::new(
            app.environment,
            app.node_name,
            Icinga2Info {
                version: app.version,
                program_start: app.program_start,
                is_part_of_a_cluster: app.is_part_of_a_cluster,
            },
        ))
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Endpoint id written to the ownership table for this environment
    pub fn endpoint_id(&self) -> Option<[u8; SHA1_LEN]> {
        endpoint_id(&self.name, &self.node_name, self.icinga2.is_part_of_a_cluster)
    }

    /// Program start in whole milliseconds, as stored in the ownership table
    pub fn program_start_millis(&self) -> i64 {
        (self.icinga2.program_start * 1000.0) as i64
    }
}

/// Content-derived endpoint id: SHA-1 of the packed `[environment, node]`.
///
/// Absent when the node is not part of a cluster.
pub fn endpoint_id(environment: &str, node_name: &str, clustered: bool) -> Option<[u8; SHA1_LEN]> {
    if !clustered {
        return None;
    }
    Some(sha1_bytes(&pack(&[environment, node_name])))
}

// {"IcingaApplication":{"status":{"icingaapplication":{"app":{...}}}}}
// Key matching upstream is case-insensitive, so the capitalized
// spellings are accepted too.

#[derive(Deserialize)]
struct IcingaStats {
    #[serde(rename = "IcingaApplication", alias = "icingaapplication")]
    icinga_application: StatsStatus,
}

#[derive(Deserialize)]
struct StatsStatus {
    #[serde(alias = "Status")]
    status: StatusApplication,
}

#[derive(Deserialize)]
struct StatusApplication {
    #[serde(rename = "icingaapplication", alias = "IcingaApplication")]
    icinga_application: ApplicationApp,
}

#[derive(Deserialize)]
struct ApplicationApp {
    #[serde(alias = "App")]
    app: App,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct App {
    environment: String,
    node_name: String,
    version: String,
    program_start: f64,
    is_part_of_a_cluster: bool,
}

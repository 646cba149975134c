//! Ownership table on MySQL

use crate::common::{DatabaseConfig, Error, Result, METRICS};
use crate::ha::store::{InstanceRow, InstanceStore, OwnerHeartbeat};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::future::Future;
use std::time::Instant;
use uuid::Uuid;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS icingadb_instance (
    id BINARY(16) NOT NULL,
    environment_id BINARY(20) NOT NULL,
    endpoint_id BINARY(20) NULL DEFAULT NULL,
    heartbeat BIGINT NOT NULL,
    responsible ENUM('y', 'n') NOT NULL,
    icinga2_version VARCHAR(255) NOT NULL,
    icinga2_start_time BIGINT NOT NULL,
    PRIMARY KEY (id),
    UNIQUE KEY idx_icingadb_instance_environment_id (environment_id)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
"#;

const UPDATE_BY_ID: &str = "UPDATE icingadb_instance SET endpoint_id = ?, heartbeat = ?, \
     icinga2_version = ?, icinga2_start_time = ? WHERE id = ?";

const UPDATE_BY_ENVIRONMENT: &str = "UPDATE icingadb_instance SET id = ?, endpoint_id = ?, \
     heartbeat = ?, icinga2_version = ?, icinga2_start_time = ? WHERE environment_id = ?";

const INSERT: &str = "INSERT INTO icingadb_instance(id, environment_id, endpoint_id, heartbeat, \
     responsible, icinga2_version, icinga2_start_time) VALUES (?, ?, ?, ?, 'y', ?, ?)";

const SELECT_OWNER: &str =
    "SELECT id, heartbeat FROM icingadb_instance WHERE environment_id = ? LIMIT 1";

/// Create the ownership table if it does not exist yet
pub async fn setup(pool: &MySqlPool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

pub struct SqlInstanceStore {
    pool: MySqlPool,
}

impl SqlInstanceStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        tracing::info!(max_connections = config.max_connections, "Connected to database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl InstanceStore for SqlInstanceStore {
    async fn fetch_owner(&self, environment_id: &[u8]) -> Result<Option<OwnerHeartbeat>> {
        let row: Option<(Vec<u8>, i64)> = timed(
            "select id, heartbeat from icingadb_instance where environment_id = ourEnvID",
            sqlx::query_as(SELECT_OWNER)
                .bind(environment_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.map(|(id, heartbeat)| {
            Ok(OwnerHeartbeat {
                id: decode_instance_id(&id)?,
                heartbeat,
            })
        })
        .transpose()
    }

    async fn insert(&self, row: &InstanceRow) -> Result<()> {
        timed(
            "insert into icingadb_instance",
            sqlx::query(INSERT)
                .bind(row.id.as_bytes().as_slice())
                .bind(row.environment_id.as_slice())
                .bind(row.endpoint_id.as_ref().map(|id| id.as_slice()))
                .bind(row.heartbeat)
                .bind(&row.icinga2_version)
                .bind(row.icinga2_start_time)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn update_own(&self, row: &InstanceRow) -> Result<()> {
        timed(
            "update icingadb_instance by id",
            sqlx::query(UPDATE_BY_ID)
                .bind(row.endpoint_id.as_ref().map(|id| id.as_slice()))
                .bind(row.heartbeat)
                .bind(&row.icinga2_version)
                .bind(row.icinga2_start_time)
                .bind(row.id.as_bytes().as_slice())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn take_over(&self, row: &InstanceRow) -> Result<()> {
        timed(
            "update icingadb_instance by environment_id",
            sqlx::query(UPDATE_BY_ENVIRONMENT)
                .bind(row.id.as_bytes().as_slice())
                .bind(row.endpoint_id.as_ref().map(|id| id.as_slice()))
                .bind(row.heartbeat)
                .bind(&row.icinga2_version)
                .bind(row.icinga2_start_time)
                .bind(row.environment_id.as_slice())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

/// Run a statement and record its latency under `statement`
async fn timed<T, F>(statement: &str, query: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let start = Instant::now();
    let result = query.await;
    METRICS.record_db_io(statement, start.elapsed(), result.is_ok());
    Ok(result?)
}

fn decode_instance_id(raw: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(raw).map_err(|e| Error::Storage(format!("invalid instance id in database: {}", e)))
}

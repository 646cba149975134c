//! monsync daemon binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use monsync::backend::{sql, RedisDumpStream, RedisHeartbeatSource, SqlInstanceStore};
use monsync::common::{Config, METRICS};
use monsync::ha::{endpoint_id, HaRuntime, WILDCARD};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "monsync")]
#[command(about = "HA coordination for the Icinga 2 monitoring-data sync", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HA core against Redis and MySQL
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Redis URL (overrides config)
        #[arg(long)]
        redis_url: Option<String>,

        /// Database URL (overrides config)
        #[arg(long)]
        database_url: Option<String>,

        /// Create the ownership table if missing
        #[arg(long)]
        init_schema: bool,

        /// Write Prometheus metrics to this file on shutdown
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Print the endpoint id stored for a node
    EndpointId {
        #[arg(long)]
        environment: String,

        #[arg(long)]
        node: String,

        /// The node is part of a cluster
        #[arg(long)]
        cluster: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            redis_url,
            database_url,
            init_schema,
            metrics_file,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(url) = redis_url {
                config.redis.url = url;
            }
            if let Some(url) = database_url {
                config.database.url = url;
            }
            init_tracing(&config.log_level);
            serve(config, init_schema, metrics_file).await?;
        }
        Commands::EndpointId {
            environment,
            node,
            cluster,
        } => match endpoint_id(&environment, &node, cluster) {
            Some(id) => println!("{}", hex::encode(id)),
            None => println!("NULL"),
        },
    }

    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config: Config, init_schema: bool, metrics_file: Option<PathBuf>) -> anyhow::Result<()> {
    tracing::info!("Starting monsync {}", monsync::BUILD_INFO);
    tracing::info!("  Redis: {}", config.redis.url);
    tracing::info!("  Heartbeat channel: {}", config.redis.heartbeat_channel);
    tracing::info!("  Dump stream: {}", config.redis.dump_stream);
    tracing::info!("  Takeover timeout: {}s", config.ha.takeover_timeout_secs);

    let store = SqlInstanceStore::connect(&config.database)
        .await
        .context("connecting to database")?;
    if init_schema {
        sql::setup(store.pool()).await.context("creating ownership table")?;
    }
    let source = RedisHeartbeatSource::subscribe(&config.redis)
        .await
        .context("subscribing to heartbeat channel")?;
    let stream = RedisDumpStream::connect(&config.redis)
        .await
        .context("connecting to dump stream")?;

    let mut runtime = HaRuntime::new(config.ha.clone());
    let mut notifications = runtime.subscribe(WILDCARD);
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            tracing::info!(%notification, "Sync notification");
        }
    });

    let (err_tx, mut err_rx) = mpsc::channel(4);
    runtime.start(source, Arc::new(store), Arc::new(stream), err_tx);

    let result = tokio::select! {
        Some(err) = err_rx.recv() => {
            tracing::error!(category = err.category(), "Exiting: {}", err);
            Err(anyhow::Error::new(err).context("HA task failed"))
        }
        res = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            res.map_err(anyhow::Error::from)
        }
    };
    runtime.shutdown();

    if let Some(path) = metrics_file {
        std::fs::write(&path, METRICS.to_prometheus())
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }
    result
}

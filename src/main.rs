//! chatlinkd entry point: config, database, relay wiring and shutdown.

use anyhow::Context;
use chatlinkd::config::Config;
use chatlinkd::db::Database;
use chatlinkd::directory::ConfigDirectory;
use chatlinkd::identity::IdentityCache;
use chatlinkd::queue::{self, EgressWorker};
use chatlinkd::relay::ChatRelay;
use chatlinkd::transport::Gateway;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const INGRESS_DEPTH: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "chatlinkd.toml".to_string());
    let config =
        Config::load(&config_path).with_context(|| format!("loading config {}", config_path))?;

    let db = Database::new(&config.database.path)
        .await
        .context("opening database")?;

    let directory = Arc::new(ConfigDirectory::from_config(&config.directory));
    let identities = IdentityCache::new(db, directory.clone());

    let (queue, queue_rx) = queue::channel();
    let relay = ChatRelay::new(identities, directory, queue);

    let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_DEPTH);
    let gateway = Gateway::bind(config.listen.bind, config.transport.format, ingress_tx)
        .await
        .context("binding gateway listener")?;
    let sink = Arc::new(gateway.fanout());

    let shutdown = CancellationToken::new();
    let egress = tokio::spawn(
        EgressWorker::new(
            queue_rx,
            sink,
            config.transport.format,
            config.transport.send_timeout(),
            shutdown.clone(),
        )
        .run(),
    );
    let ingress = tokio::spawn(
        Arc::clone(&relay).run_ingress(ingress_rx, shutdown.clone()),
    );
    tokio::spawn(gateway.run());

    info!(bind = %config.listen.bind, "chatlinkd running");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    let _ = ingress.await;
    let _ = egress.await;
    Ok(())
}

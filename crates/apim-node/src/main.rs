mod opts;

use std::sync::Arc;

use anyhow::{Context, Result};
use apim_command::{
    CommandFanout, CommandRefresher, DynCommandStore, MemCommandStore, StaticCluster,
};
use apim_service::{
    EmailTemplateUpdateListener, MemSubscriptionRepository, SubscriptionFailureListener,
    TemplateCache,
};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use opts::NodeOpts;

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file()?;
    let opts = NodeOpts::parse();
    setup_logging();

    let node_id = opts.node_id();
    let config = opts.refresher_config()?;
    tracing::info!(
        node_id,
        primary = opts.primary,
        recipient = %config.recipient,
        "starting management node"
    );

    let store: DynCommandStore = Arc::new(MemCommandStore::new());
    let cluster = Arc::new(StaticCluster::new(node_id, opts.primary));
    let templates = TemplateCache::new();
    let subscriptions = MemSubscriptionRepository::new();

    let fanout = CommandFanout::new()
        .with_listener(Box::new(EmailTemplateUpdateListener::new(templates.clone())))
        .with_listener(Box::new(SubscriptionFailureListener::new(Arc::new(
            subscriptions.clone(),
        ))));
    let refresher = CommandRefresher::new(store, cluster, fanout, config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down...");
            }
            _ = async {
                if let Some(ref mut t) = term { t.recv().await; }
            } => {
                tracing::info!("SIGTERM received, shutting down...");
            }
        }
        let _ = shutdown_tx.send(());
    });

    tokio::spawn(async move { refresher.run(shutdown_rx).await })
        .await
        .context("command refresher task")?;
    Ok(())
}

/// Load `.env` from the working directory without overriding variables that
/// are already set.
fn load_env_file() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(err).context("load .env"),
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

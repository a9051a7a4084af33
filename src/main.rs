//! uptrail - uptime monitoring service
//!
//! Polls registered URLs and keeps a gap-free status history per target.

mod config;
mod db;
mod history;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use probe::HttpProber;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    let cfg = ServerConfig::load();
    tracing::info!("Starting uptrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let prober = Arc::new(HttpProber::new(cfg.probe_timeout, cfg.classification)?);
    let scheduler = Arc::new(Scheduler::new(store.clone(), prober, cfg.scheduler_config()));
    scheduler.start().await;

    let server = Server::new(cfg, store);
    let served = server.start(shutdown_signal()).await;

    scheduler.stop().await;
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

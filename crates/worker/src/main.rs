//! Inventory expiration sweep process.
//!
//! Runs the sweep on its configured schedule until interrupted. With `--once`
//! it sweeps a single time and exits, which is how a missed night is caught up
//! by hand.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use clinic_core::SystemClock;
use clinic_infra::config::{StoreBackend, SweeperConfig};
use clinic_infra::jobs::{ExpirationSweeper, SweepWorker};
use clinic_infra::lot_store::{InMemoryLotStore, LotStore, PostgresLotStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clinic_observability::init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");
    let config = SweeperConfig::from_env().context("invalid sweeper configuration")?;
    let store = build_store(&config).await?;
    let sweeper = ExpirationSweeper::new(store, SystemClock);

    if once {
        let report = tokio::task::spawn_blocking(move || sweeper.sweep())
            .await
            .context("sweep task panicked")??;
        info!(
            swept_at = %report.swept_at,
            transitioned = report.transitioned,
            "one-shot sweep complete"
        );
        return Ok(());
    }

    let handle = SweepWorker::spawn(sweeper, config.schedule, config.worker_config())
        .context("failed to spawn sweep worker")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("sweep worker shutdown panicked")?;
    Ok(())
}

async fn build_store(config: &SweeperConfig) -> anyhow::Result<Arc<dyn LotStore>> {
    match &config.store {
        StoreBackend::InMemory => {
            warn!("USE_PERSISTENT_STORES not enabled; sweeping an in-memory store");
            Ok(Arc::new(InMemoryLotStore::new()))
        }
        StoreBackend::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect(database_url)
                .await
                .context("failed to connect to Postgres")?;

            let mut store = PostgresLotStore::new(pool, tokio::runtime::Handle::current());
            if let Some(limit) = config.store_timeout {
                store = store.with_timeout(limit);
            }
            store
                .ensure_schema()
                .await
                .context("failed to prepare inventory_lots schema")?;

            info!("using Postgres lot store");
            Ok(Arc::new(store))
        }
    }
}

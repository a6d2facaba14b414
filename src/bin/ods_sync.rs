//! ods-sync: incremental staging-to-star synchronizer
//!
//! Runs the insert phase and then the update phase once, recording the run
//! in `etl_meta_info`, and exits.
//!
//! ## Configuration
//! - ODS_SYNC_CONFIG: Path to a YAML config file (default: ./ods-sync.yaml)
//! - ODS_SYNC__<SECTION>__<KEY>: Overrides, e.g. ODS_SYNC__TARGET__HOST
//! - ODS_SYNC_LOG: Log filter (default: info)

use std::sync::Arc;

use tracing::{error, info};

use ods_sync::config::StoreConfig;
use ods_sync::error::StoreRole;
use ods_sync::run_log::SqlRunLog;
use ods_sync::store::Pool;
use ods_sync::utils::bootstrap::{connect_store, init_tracing};
use ods_sync::{SyncConfig, Synchronizer};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = SyncConfig::load(None)?;

    let staging = connect(StoreRole::Staging, &config.staging).await?;
    let target = connect(StoreRole::Target, &config.target).await?;
    let run_log = connect(StoreRole::RunLog, &config.run_log_store()).await?;

    let synchronizer = Synchronizer::new(
        &config,
        staging,
        target,
        Arc::new(SqlRunLog::new(run_log)),
    );

    match synchronizer.run().await {
        Ok(report) => {
            info!(
                run_id = report.run_id,
                inserted = report.inserted,
                updated = report.updated,
                "ETL finished."
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ETL terminated.");
            eprintln!("{e}\nETL terminated.");
            Err(e.into())
        }
    }
}

async fn connect(role: StoreRole, store: &StoreConfig) -> Result<Pool, Box<dyn std::error::Error>> {
    connect_store(role, store).await.map_err(|e| {
        eprintln!("{e}\nETL won't be started.");
        e.into()
    })
}

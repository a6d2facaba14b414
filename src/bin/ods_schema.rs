//! ods-schema: creates the staging relation, the star schema and the run
//! metadata table if they do not exist.
//!
//! Reads the same configuration as `ods-sync`.

use tracing::info;

use ods_sync::error::StoreRole;
use ods_sync::schema::{apply_run_log_schema, apply_staging_schema, apply_target_schema};
use ods_sync::utils::bootstrap::{connect_store, init_tracing};
use ods_sync::SyncConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = SyncConfig::load(None)?;

    let staging = connect_store(StoreRole::Staging, &config.staging).await?;
    apply_staging_schema(&staging, &config.sync.staging_table).await?;

    let target = connect_store(StoreRole::Target, &config.target).await?;
    apply_target_schema(&target).await?;

    let run_log = connect_store(StoreRole::RunLog, &config.run_log_store()).await?;
    apply_run_log_schema(&run_log).await?;

    info!("Schema applied");
    Ok(())
}

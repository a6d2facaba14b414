//! Bootstrap utilities for ods-sync binaries.
//!
//! Shared initialization code: tracing and store connections.

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{StoreConfig, LOG_ENV_VAR};
use crate::error::{Error, Result, StoreRole};
use crate::store::{connect_pool, Pool};

/// Initialize tracing with ODS_SYNC_LOG environment variable.
///
/// Defaults to "info" level if ODS_SYNC_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open a pool to one store.
///
/// Connection failures become [`Error::Connect`] naming the store.
pub async fn connect_store(role: StoreRole, store: &StoreConfig) -> Result<Pool> {
    match connect_pool(&store.connection_url(), store.max_connections.max(1)).await {
        Ok(pool) => {
            info!(store = %role, "Connected");
            Ok(pool)
        }
        Err(e) => {
            warn!(store = %role, error = %e, "Connection failed");
            Err(Error::connect(role, e))
        }
    }
}

//! Incremental staging-to-star synchronization.
//!
//! One invocation runs the insert phase, then the update phase, under a
//! single run record. Each phase commits atomically on the target store.

pub mod dimension;
pub mod fact;
pub mod snapshot;

pub use dimension::{Dimension, DimensionResolver};
pub use snapshot::{SnapshotLoader, StagingRow};

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use sea_query::{Expr, Func, Query};
use tracing::{error, info};

use crate::config::{SyncConfig, SyncSettings};
use crate::error::{Error, Result};
use crate::run_log::{Outcome, RunLog};
use crate::schema::{resolved_table, SalesInfo, Staging};
use crate::store::{build_bound, build_query, build_schema, DbConnection, Pool};

/// Last log line of a successful run.
pub const FINISHED_MESSAGE: &str = "ETL finished.";

/// The two halves of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Facts for staging rows created since the last run.
    Insert,
    /// Facts for staging rows updated since the last run.
    Update,
}

impl Phase {
    /// Prefix of the run-log line written when the phase fails.
    fn failure_prefix(&self) -> &'static str {
        match self {
            Phase::Insert => "Error while trying to ETL new data:",
            Phase::Update => "Error while trying to update data:",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Insert => f.write_str("insert"),
            Phase::Update => f.write_str("update"),
        }
    }
}

/// Counts reported by a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub run_id: i64,
    pub inserted: u64,
    pub updated: u64,
}

/// Moves staging rows into the star schema.
pub struct Synchronizer {
    settings: SyncSettings,
    staging: Pool,
    target: Pool,
    run_log: Arc<dyn RunLog>,
    source: String,
    destination: String,
    loader: SnapshotLoader,
    resolver: DimensionResolver,
}

impl Synchronizer {
    /// `run_log` must not write through `target`, see [`crate::run_log::SqlRunLog`].
    pub fn new(config: &SyncConfig, staging: Pool, target: Pool, run_log: Arc<dyn RunLog>) -> Self {
        Self {
            settings: config.sync.clone(),
            staging,
            target,
            run_log,
            source: config.staging.descriptor(),
            destination: config.target.descriptor(),
            loader: SnapshotLoader::new(config.sync.chunk_size),
            resolver: DimensionResolver::new(),
        }
    }

    /// Run both phases under one run record.
    ///
    /// Tracking failures are returned unchanged. A data failure closes the
    /// run as `error` and is returned as [`Error::Etl`]; the phase after it
    /// does not run.
    pub async fn run(&self) -> Result<SyncReport> {
        let run_id = self.run_log.start(&self.source, &self.destination).await?;
        info!(run_id, "ETL starts");

        let inserted = self.run_phase(run_id, Phase::Insert).await?;
        let updated = self.run_phase(run_id, Phase::Update).await?;

        self.run_log
            .append(run_id, FINISHED_MESSAGE, Outcome::Success)
            .await?;
        info!(run_id, inserted, updated, "ETL finished");

        Ok(SyncReport {
            run_id,
            inserted,
            updated,
        })
    }

    async fn run_phase(&self, run_id: i64, phase: Phase) -> Result<u64> {
        let result = match phase {
            Phase::Insert => self.insert_new(run_id).await,
            Phase::Update => self.update_changed(run_id).await,
        };

        match result {
            Ok(count) => Ok(count),
            Err(e) if e.is_tracking() => Err(e),
            Err(e) => {
                let message = e.to_string();
                error!(run_id, %phase, error = %message, "ETL phase failed");
                self.run_log
                    .append(
                        run_id,
                        &format!("{}{}", phase.failure_prefix(), message),
                        Outcome::Failure,
                    )
                    .await?;
                Err(Error::Etl {
                    run_id,
                    phase,
                    message,
                })
            }
        }
    }

    async fn progress(&self, run_id: i64, message: &str) -> Result<()> {
        self.run_log.append(run_id, message, Outcome::Progress).await
    }

    /// Insert phase: facts for staging rows created after the newest
    /// `source_created_at` already loaded.
    async fn insert_new(&self, run_id: i64) -> Result<u64> {
        let working = self.settings.working_table.as_str();
        self.progress(run_id, "Selecting new source data...").await?;

        let mut target_tx = self.target.begin().await?;
        let watermark = max_timestamp(&mut target_tx, SalesInfo::SourceCreatedAt).await?;
        let loaded = self
            .load_working(&mut target_tx, Staging::CreatedAt, watermark)
            .await?;
        self.progress(
            run_id,
            &format!("Selecting new source data finished: collected {loaded} rows..."),
        )
        .await?;

        if loaded == 0 {
            snapshot::clear_table(working, &mut target_tx).await?;
            target_tx.commit().await?;
            self.progress(run_id, "No new data.").await?;
            info!(run_id, "No new data");
            return Ok(0);
        }

        self.resolve_dimensions(run_id, &mut target_tx).await?;
        self.progress(
            run_id,
            "Target dimension tables were updated successfully. Inserting new values in target fact table...",
        )
        .await?;

        let (sql, values) = build_bound(&fact::insert_new_facts(working, run_id)?);
        let inserted = sqlx::query_with(&sql, values)
            .execute(&mut *target_tx)
            .await?
            .rows_affected();

        snapshot::clear_table(working, &mut target_tx).await?;
        target_tx.commit().await?;

        self.progress(
            run_id,
            &format!("Inserting new values in target fact table finished: {inserted} new facts."),
        )
        .await?;
        info!(run_id, loaded, inserted, "Insert phase committed");
        Ok(inserted)
    }

    /// Update phase: rewrite facts whose staging rows were updated after the
    /// newest `source_updated_at` already loaded.
    async fn update_changed(&self, run_id: i64) -> Result<u64> {
        let working = self.settings.working_table.as_str();
        self.progress(run_id, "Selecting source data to be updated...").await?;

        let mut target_tx = self.target.begin().await?;
        let Some(watermark) = max_timestamp(&mut target_tx, SalesInfo::SourceUpdatedAt).await? else {
            target_tx.commit().await?;
            self.progress(run_id, "No data to update.").await?;
            info!(run_id, "No data to update");
            return Ok(0);
        };

        let loaded = self
            .load_working(&mut target_tx, Staging::UpdatedAt, Some(watermark))
            .await?;
        if loaded == 0 {
            snapshot::clear_table(working, &mut target_tx).await?;
            target_tx.commit().await?;
            self.progress(run_id, "No data to update.").await?;
            info!(run_id, "No data to update");
            return Ok(0);
        }
        self.progress(
            run_id,
            &format!("Selecting source data to be updated finished: collected {loaded}."),
        )
        .await?;

        self.resolve_dimensions(run_id, &mut target_tx).await?;
        self.progress(
            run_id,
            "Target dimension tables were updated successfully. Updating values in target fact table...",
        )
        .await?;

        let resolved = self.settings.resolved_table();
        sqlx::query(&build_schema(&resolved_table(&resolved)))
            .execute(&mut *target_tx)
            .await?;
        snapshot::clear_table(&resolved, &mut target_tx).await?;

        let (sql, values) = build_bound(&fact::fill_resolved(working, &resolved)?);
        sqlx::query_with(&sql, values)
            .execute(&mut *target_tx)
            .await?;

        let (sql, values) = build_bound(&fact::update_changed_facts(&resolved, run_id));
        let updated = sqlx::query_with(&sql, values)
            .execute(&mut *target_tx)
            .await?
            .rows_affected();

        snapshot::clear_table(&resolved, &mut target_tx).await?;
        snapshot::clear_table(working, &mut target_tx).await?;
        target_tx.commit().await?;

        self.progress(
            run_id,
            &format!("Updating values in target fact table finished: {updated} facts."),
        )
        .await?;
        info!(run_id, loaded, updated, "Update phase committed");
        Ok(updated)
    }

    /// Copy staging rows past `watermark` on `column` into the working
    /// table. Returns the number of rows copied.
    async fn load_working(
        &self,
        target: &mut DbConnection,
        column: Staging,
        watermark: Option<NaiveDateTime>,
    ) -> Result<u64> {
        let working = self.settings.working_table.as_str();
        self.loader.prepare(working, target).await?;

        let mut staging_tx = self.staging.begin().await?;
        let selection = snapshot::staging_selection(&self.settings.staging_table, column, watermark);
        let (sql, values) = build_bound(&selection);
        let loaded = {
            let rows = sqlx::query_as_with::<_, StagingRow, _>(&sql, values).fetch(&mut *staging_tx);
            self.loader.load(rows, working, target).await?
        };
        staging_tx.commit().await?;

        Ok(loaded)
    }

    async fn resolve_dimensions(&self, run_id: i64, target: &mut DbConnection) -> Result<()> {
        self.progress(run_id, "Target dimension tables updating by new values...")
            .await?;
        for dim in Dimension::ALL {
            let inserted = self
                .resolver
                .resolve(dim, &self.settings.working_table, target)
                .await?;
            info!(run_id, dimension = %dim, inserted, "Dimension members added");
        }
        Ok(())
    }
}

/// `MAX(column)` over the fact table, `None` while it is empty.
async fn max_timestamp(conn: &mut DbConnection, column: SalesInfo) -> Result<Option<NaiveDateTime>> {
    let stmt = Query::select()
        .expr(Func::max(Expr::col(column)))
        .from(SalesInfo::Table)
        .to_owned();
    let watermark: Option<NaiveDateTime> = sqlx::query_scalar(&build_query(&stmt))
        .fetch_one(&mut *conn)
        .await?;
    Ok(watermark)
}

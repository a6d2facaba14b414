//! Run log stored in the `etl_meta_info` table.
//!
//! Start and end dates are written as UTC from the client clock, whatever the
//! server time zone.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sea_query::{Expr, Query};
use sqlx::Row;
use tracing::{debug, warn};

use super::{append_line, log_line, Outcome, RunLog, RunRecord, RunState, START_MESSAGE};
use crate::error::{primary_message, Error, Result};
use crate::schema::EtlMetaInfo;
use crate::store::{build_bound, Pool};

fn meta_update(err: sqlx::Error) -> Error {
    Error::MetaUpdate(primary_message(&err))
}

/// Run log backed by a dedicated pool.
///
/// The pool must not be the one carrying the data transaction, otherwise a
/// failed phase would roll back its own error report.
pub struct SqlRunLog {
    pool: Pool,
}

impl SqlRunLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl RunLog for SqlRunLog {
    async fn start(&self, source: &str, target: &str) -> Result<i64> {
        let now = Utc::now();
        let stmt = Query::insert()
            .into_table(EtlMetaInfo::Table)
            .columns([
                EtlMetaInfo::StartDate,
                EtlMetaInfo::State,
                EtlMetaInfo::Source,
                EtlMetaInfo::Target,
                EtlMetaInfo::Log,
            ])
            .values([
                now.naive_utc().into(),
                RunState::Processing.as_str().into(),
                source.into(),
                target.into(),
                log_line(now, START_MESSAGE).into(),
            ])
            .map_err(|e| Error::MetaInsert(e.to_string()))?
            .returning_col(EtlMetaInfo::Id)
            .to_owned();

        let (sql, values) = build_bound(&stmt);
        let run_id: i64 = sqlx::query_scalar_with(&sql, values)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Run record could not be created");
                Error::MetaInsert(primary_message(&e))
            })?;

        debug!(run_id, "Run record created");
        Ok(run_id)
    }

    async fn append(&self, run_id: i64, message: &str, outcome: Outcome) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(meta_update)?;

        let select = Query::select()
            .columns([EtlMetaInfo::Log, EtlMetaInfo::State])
            .from(EtlMetaInfo::Table)
            .and_where(Expr::col(EtlMetaInfo::Id).eq(run_id))
            .to_owned();
        let (sql, values) = build_bound(&select);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *tx)
            .await
            .map_err(meta_update)?
            .ok_or_else(|| Error::MetaUpdate(format!("run {run_id} does not exist")))?;

        let log: Option<String> = row.try_get(0).map_err(meta_update)?;
        let state: String = row.try_get(1).map_err(meta_update)?;
        let state: RunState = state.parse().map_err(Error::MetaUpdate)?;
        let next = state
            .transition(outcome)
            .ok_or_else(|| Error::MetaUpdate(format!("run {run_id} is already {state}")))?;

        let now = Utc::now();
        let mut update = Query::update();
        update
            .table(EtlMetaInfo::Table)
            .value(
                EtlMetaInfo::Log,
                append_line(log.as_deref().unwrap_or_default(), now, message),
            )
            .value(EtlMetaInfo::State, next.as_str())
            .and_where(Expr::col(EtlMetaInfo::Id).eq(run_id));
        if outcome != Outcome::Progress {
            update.value(EtlMetaInfo::EndDate, now.naive_utc());
        }

        let (sql, values) = build_bound(&update);
        sqlx::query_with(&sql, values)
            .execute(&mut *tx)
            .await
            .map_err(meta_update)?;
        tx.commit().await.map_err(meta_update)?;

        debug!(run_id, state = %next, "Run record updated");
        Ok(())
    }

    async fn get(&self, run_id: i64) -> Result<Option<RunRecord>> {
        let stmt = Query::select()
            .columns([
                EtlMetaInfo::Id,
                EtlMetaInfo::StartDate,
                EtlMetaInfo::EndDate,
                EtlMetaInfo::State,
                EtlMetaInfo::Source,
                EtlMetaInfo::Target,
                EtlMetaInfo::Log,
            ])
            .from(EtlMetaInfo::Table)
            .and_where(Expr::col(EtlMetaInfo::Id).eq(run_id))
            .to_owned();

        let (sql, values) = build_bound(&stmt);
        let Some(row) = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await
            .map_err(meta_update)?
        else {
            return Ok(None);
        };

        let start_date: NaiveDateTime = row.try_get("start_date").map_err(meta_update)?;
        let end_date: Option<NaiveDateTime> = row.try_get("end_date").map_err(meta_update)?;
        let state: String = row.try_get("state").map_err(meta_update)?;
        let log: Option<String> = row.try_get("log").map_err(meta_update)?;

        Ok(Some(RunRecord {
            id: row.try_get("id").map_err(meta_update)?,
            start_date: start_date.and_utc(),
            end_date: end_date.map(|d| d.and_utc()),
            state: state.parse().map_err(Error::MetaUpdate)?,
            source: row.try_get("source").map_err(meta_update)?,
            target: row.try_get("target").map_err(meta_update)?,
            log: log.unwrap_or_default(),
        }))
    }
}

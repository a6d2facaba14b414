//! In-memory run log for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{append_line, log_line, Outcome, RunLog, RunRecord, RunState, START_MESSAGE};
use crate::error::{Error, Result};

/// Run log that keeps records in memory, with failure injection.
#[derive(Default)]
pub struct MemoryRunLog {
    runs: RwLock<HashMap<i64, RunRecord>>,
    next_id: RwLock<i64>,
    fail_on_start: RwLock<bool>,
    fail_on_append: RwLock<bool>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_start(&self, fail: bool) {
        *self.fail_on_start.write().await = fail;
    }

    pub async fn set_fail_on_append(&self, fail: bool) {
        *self.fail_on_append.write().await = fail;
    }

    /// All records, ordered by id.
    pub async fn runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|run| run.id);
        runs
    }
}

#[async_trait]
impl RunLog for MemoryRunLog {
    async fn start(&self, source: &str, target: &str) -> Result<i64> {
        if *self.fail_on_start.read().await {
            return Err(Error::MetaInsert("run log unavailable".to_string()));
        }

        let mut next_id = self.next_id.write().await;
        *next_id += 1;
        let id = *next_id;

        let now = Utc::now();
        self.runs.write().await.insert(
            id,
            RunRecord {
                id,
                start_date: now,
                end_date: None,
                state: RunState::Processing,
                source: source.to_string(),
                target: target.to_string(),
                log: log_line(now, START_MESSAGE),
            },
        );
        Ok(id)
    }

    async fn append(&self, run_id: i64, message: &str, outcome: Outcome) -> Result<()> {
        if *self.fail_on_append.read().await {
            return Err(Error::MetaUpdate("run log unavailable".to_string()));
        }

        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::MetaUpdate(format!("run {run_id} does not exist")))?;
        let next = run.state.transition(outcome).ok_or_else(|| {
            Error::MetaUpdate(format!("run {run_id} is already {}", run.state))
        })?;

        let now = Utc::now();
        run.log = append_line(&run.log, now, message);
        if outcome != Outcome::Progress {
            run.end_date = Some(now);
        }
        run.state = next;
        Ok(())
    }

    async fn get(&self, run_id: i64) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }
}

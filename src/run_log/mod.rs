//! Run tracking.
//!
//! Every synchronizer invocation owns exactly one run record. The record is
//! written through its own store so that progress survives a rollback of
//! the data transaction.

mod memory;
mod sql;

pub use memory::MemoryRunLog;
pub use sql::SqlRunLog;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// First log line of every run.
pub const START_MESSAGE: &str = "ETL starts...";

/// Lifecycle state of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Processing,
    Finished,
    Error,
}

/// What an appended message means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Log only; the run stays open.
    Progress,
    /// Close the run as finished.
    Success,
    /// Close the run as failed.
    Failure,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Processing => "processing",
            RunState::Finished => "finished",
            RunState::Error => "error",
        }
    }

    /// Finished and error runs accept no further messages.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Processing)
    }

    /// Next state after appending a message with `outcome`, or `None` when
    /// the run is already closed.
    pub fn transition(self, outcome: Outcome) -> Option<RunState> {
        if self.is_terminal() {
            return None;
        }
        Some(match outcome {
            Outcome::Progress => RunState::Processing,
            Outcome::Success => RunState::Finished,
            Outcome::Failure => RunState::Error,
        })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processing" => Ok(RunState::Processing),
            "finished" => Ok(RunState::Finished),
            "error" => Ok(RunState::Error),
            other => Err(format!("unknown run state '{other}'")),
        }
    }
}

/// A run record as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub state: RunState,
    pub source: String,
    pub target: String,
    pub log: String,
}

impl RunRecord {
    /// Log lines without their timestamp prefix.
    pub fn messages(&self) -> Vec<&str> {
        self.log
            .lines()
            .map(|line| match line.split_once("] ") {
                Some((_, message)) if line.starts_with('[') => message,
                _ => line,
            })
            .collect()
    }
}

/// Owner of run records.
///
/// Errors from `start` are [`crate::Error::MetaInsert`]; errors from
/// `append` and `get` are [`crate::Error::MetaUpdate`].
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Create a run in state processing with the initial log line.
    async fn start(&self, source: &str, target: &str) -> Result<i64>;

    /// Append a timestamped line and apply `outcome` to the run state.
    async fn append(&self, run_id: i64, message: &str, outcome: Outcome) -> Result<()>;

    /// Fetch a run record.
    async fn get(&self, run_id: i64) -> Result<Option<RunRecord>>;
}

/// Format a log line: `[<timestamp>] <message>`.
pub fn log_line(at: DateTime<Utc>, message: &str) -> String {
    format!("[{}] {}", at.format("%Y-%m-%d %H:%M:%S%.6f%:z"), message)
}

/// Append `message` to an existing log.
pub fn append_line(log: &str, at: DateTime<Utc>, message: &str) -> String {
    if log.is_empty() {
        log_line(at, message)
    } else {
        format!("{}\n{}", log, log_line(at, message))
    }
}

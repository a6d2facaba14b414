//! Error types and result alias for ods-sync.

use std::fmt;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Which store a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Staging,
    Target,
    RunLog,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Staging => f.write_str("staging"),
            StoreRole::Target => f.write_str("target"),
            StoreRole::RunLog => f.write_str("run log"),
        }
    }
}

/// Errors raised by a synchronization run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A store could not be reached. Raised before any run is tracked.
    #[error("While connecting to {store} store error occurred: {message}")]
    Connect { store: StoreRole, message: String },

    /// The run record could not be created.
    #[error("While inserting etl meta error occurred: {0}")]
    MetaInsert(String),

    /// The run record could not be read or updated.
    #[error("While updating etl meta error occurred: {0}")]
    MetaUpdate(String),

    /// A statement against the staging or target store failed.
    #[error("{0}")]
    Data(String),

    /// A phase failed; its cause has already been written to the run record.
    #[error("ETL {phase} phase failed in run {run_id}: {message}")]
    Etl {
        run_id: i64,
        phase: crate::sync::Phase,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// True for failures of the run-metadata channel itself.
    pub fn is_tracking(&self) -> bool {
        matches!(self, Error::MetaInsert(_) | Error::MetaUpdate(_))
    }

    pub(crate) fn connect(store: StoreRole, err: sqlx::Error) -> Self {
        Error::Connect {
            store,
            message: primary_message(&err),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Data(primary_message(&err))
    }
}

impl From<sea_query::error::Error> for Error {
    fn from(err: sea_query::error::Error) -> Self {
        Error::Data(err.to_string())
    }
}

/// The store's primary diagnostic for a database error, or the driver's
/// own description for everything else.
pub fn primary_message(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}

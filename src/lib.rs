//! Incremental synchronization of staged sales records into a star schema.
//!
//! A run reads the staging relation, copies rows that are new or changed
//! since the last run into a working table of the target store, adds the
//! missing dimension members and then inserts or updates facts. Progress is
//! recorded in a run log kept apart from the data transaction.

pub mod config;
pub mod error;
pub mod run_log;
pub mod schema;
pub mod store;
pub mod sync;
pub mod utils;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use sync::{Phase, SyncReport, Synchronizer};

//! Database backend selection.
//!
//! The backend is chosen at compile time through the `postgres` or `sqlite`
//! feature. Everything else in the crate is written against the aliases and
//! builders exported here.

#[cfg(all(feature = "postgres", feature = "sqlite"))]
compile_error!("features `postgres` and `sqlite` are mutually exclusive");

#[cfg(not(any(feature = "postgres", feature = "sqlite")))]
compile_error!("enable exactly one storage backend: `postgres` or `sqlite`");

use sea_query_binder::{SqlxBinder, SqlxValues};

// Database backend selection via features
#[cfg(feature = "postgres")]
use sea_query::PostgresQueryBuilder;

#[cfg(feature = "sqlite")]
use sea_query::SqliteQueryBuilder;

/// The sqlx database driver.
#[cfg(feature = "postgres")]
pub type Db = sqlx::Postgres;

#[cfg(feature = "sqlite")]
pub type Db = sqlx::Sqlite;

/// Connection pool for the selected backend.
pub type Pool = sqlx::Pool<Db>;

/// A single connection (or a transaction dereferenced to one).
pub type DbConnection = <Db as sqlx::Database>::Connection;

/// Backend name used in run-record descriptors.
#[cfg(feature = "postgres")]
pub const BACKEND_NAME: &str = "POSTGRES";

#[cfg(feature = "sqlite")]
pub const BACKEND_NAME: &str = "SQLITE";

/// Build schema SQL using the appropriate backend.
#[cfg(feature = "postgres")]
pub fn build_schema<T: sea_query::SchemaStatementBuilder>(stmt: &T) -> String {
    stmt.to_string(PostgresQueryBuilder)
}

#[cfg(feature = "sqlite")]
pub fn build_schema<T: sea_query::SchemaStatementBuilder>(stmt: &T) -> String {
    stmt.to_string(SqliteQueryBuilder)
}

/// Build query SQL with values inlined (and escaped) by sea-query.
#[cfg(feature = "postgres")]
pub fn build_query<T: sea_query::QueryStatementWriter>(stmt: &T) -> String {
    stmt.to_string(PostgresQueryBuilder)
}

#[cfg(feature = "sqlite")]
pub fn build_query<T: sea_query::QueryStatementWriter>(stmt: &T) -> String {
    stmt.to_string(SqliteQueryBuilder)
}

/// Build query SQL with placeholders plus the values to bind.
#[cfg(feature = "postgres")]
pub fn build_bound<T: SqlxBinder>(stmt: &T) -> (String, SqlxValues) {
    stmt.build_sqlx(PostgresQueryBuilder)
}

#[cfg(feature = "sqlite")]
pub fn build_bound<T: SqlxBinder>(stmt: &T) -> (String, SqlxValues) {
    stmt.build_sqlx(SqliteQueryBuilder)
}

/// Connect to the database using the appropriate backend.
#[cfg(feature = "postgres")]
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<Pool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

#[cfg(feature = "sqlite")]
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<Pool, sqlx::Error> {
    use std::str::FromStr;

    let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

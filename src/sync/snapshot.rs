//! Copies selected staging rows into the working table of the target store.

use chrono::NaiveDateTime;
use futures::{Stream, TryStreamExt};
use sea_query::{Alias, Expr, InsertStatement, Order, Query, SelectStatement};
use tracing::debug;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::Result;
use crate::schema::{working_table, Staging};
use crate::store::{build_bound, build_query, build_schema, DbConnection};

/// Rows per INSERT statement. Keeps the bound parameter count below the
/// limits of both backends (SQLite 32766, PostgreSQL 65535).
pub const ROWS_PER_STATEMENT: usize = 3_000;

const STAGING_COLUMNS: [Staging; 10] = [
    Staging::Id,
    Staging::OrderId,
    Staging::Product,
    Staging::QuantityOrdered,
    Staging::PricePerEach,
    Staging::OrderDate,
    Staging::PurchaseAddress,
    Staging::CreatedAt,
    Staging::UpdatedAt,
    Staging::EtlMetaInfoId,
];

/// One row of the staging relation.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StagingRow {
    pub id: i64,
    pub order_id: Option<i32>,
    pub product: Option<String>,
    pub quantity_ordered: Option<i32>,
    pub price_per_each: Option<f64>,
    pub order_date: Option<NaiveDateTime>,
    pub purchase_address: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub etl_meta_info_id: Option<i64>,
}

/// Staging rows whose `column` is past `watermark` (all rows when there is
/// no watermark), ordered by id.
///
/// Rows missing any natural dimension value are left out; they could not be
/// resolved to dimension members.
pub fn staging_selection(
    table: &str,
    column: Staging,
    watermark: Option<NaiveDateTime>,
) -> SelectStatement {
    let mut select = Query::select();
    select
        .columns([
            Staging::Id,
            Staging::OrderId,
            Staging::Product,
            Staging::QuantityOrdered,
        ])
        .expr_as(
            Expr::col(Staging::PricePerEach).cast_as(Alias::new("double precision")),
            Staging::PricePerEach,
        )
        .columns([
            Staging::OrderDate,
            Staging::PurchaseAddress,
            Staging::CreatedAt,
            Staging::UpdatedAt,
            Staging::EtlMetaInfoId,
        ])
        .from(Alias::new(table))
        .and_where(Expr::col(Staging::OrderId).is_not_null())
        .and_where(Expr::col(Staging::Product).is_not_null())
        .and_where(Expr::col(Staging::OrderDate).is_not_null())
        .and_where(Expr::col(Staging::PurchaseAddress).is_not_null())
        .order_by(Staging::Id, Order::Asc);

    if let Some(watermark) = watermark {
        select.and_where(Expr::col(column).gt(watermark));
    }
    select
}

/// Multi-row INSERT of `rows` into the working table.
pub fn insert_statement(working: &str, rows: &[StagingRow]) -> Result<InsertStatement> {
    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(working))
        .columns(STAGING_COLUMNS);

    for row in rows {
        insert.values([
            row.id.into(),
            row.order_id.into(),
            row.product.clone().into(),
            row.quantity_ordered.into(),
            row.price_per_each.into(),
            row.order_date.into(),
            row.purchase_address.clone().into(),
            row.created_at.into(),
            row.updated_at.into(),
            row.etl_meta_info_id.into(),
        ])?;
    }
    Ok(insert)
}

/// Bulk loader for the working table.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLoader {
    chunk_size: usize,
}

impl Default for SnapshotLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl SnapshotLoader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Create the working table if absent and drop whatever it holds.
    pub async fn prepare(&self, working: &str, conn: &mut DbConnection) -> Result<()> {
        sqlx::query(&build_schema(&working_table(working)))
            .execute(&mut *conn)
            .await?;
        clear_table(working, conn).await
    }

    /// Drain `rows` into the working table, one chunk at a time. Returns the
    /// number of rows loaded.
    ///
    /// Chunks are not transactions: the caller's transaction spans the whole
    /// load, and the first failure aborts it.
    pub async fn load<S>(&self, mut rows: S, working: &str, conn: &mut DbConnection) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<StagingRow, sqlx::Error>> + Unpin,
    {
        let mut chunk = Vec::with_capacity(self.chunk_size.min(ROWS_PER_STATEMENT));
        let mut loaded = 0u64;

        while let Some(row) = rows.try_next().await? {
            chunk.push(row);
            if chunk.len() >= self.chunk_size {
                loaded += self.flush(&mut chunk, working, conn).await?;
            }
        }
        if !chunk.is_empty() {
            loaded += self.flush(&mut chunk, working, conn).await?;
        }

        Ok(loaded)
    }

    async fn flush(
        &self,
        chunk: &mut Vec<StagingRow>,
        working: &str,
        conn: &mut DbConnection,
    ) -> Result<u64> {
        for rows in chunk.chunks(ROWS_PER_STATEMENT) {
            let (sql, values) = build_bound(&insert_statement(working, rows)?);
            sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        }

        let count = chunk.len() as u64;
        debug!(table = %working, rows = count, "Chunk loaded");
        chunk.clear();
        Ok(count)
    }
}

/// Delete every row of a working table.
pub async fn clear_table(name: &str, conn: &mut DbConnection) -> Result<()> {
    let stmt = Query::delete().from_table(Alias::new(name)).to_owned();
    sqlx::query(&build_query(&stmt)).execute(&mut *conn).await?;
    Ok(())
}

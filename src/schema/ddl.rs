//! Table definitions for the staging relation, the star schema, the run log
//! and the transient working tables.
//!
//! Every statement is a sea-query value rendered per backend by
//! [`crate::store::build_schema`], so the generated DDL can be inspected
//! without a connection.

use sea_query::{ColumnDef, Expr, ForeignKey, IntoIden, Table, TableCreateStatement};
use tracing::info;

use super::{EtlMetaInfo, SalesDate, SalesInfo, SalesOrder, SalesProduct, SalesPurchaseAddress, Staging};
use crate::error::Result;
use crate::store::{build_schema, Pool};

/// Auto-incrementing surrogate key.
#[cfg(feature = "postgres")]
fn surrogate_key<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

// SQLite only auto-increments an INTEGER PRIMARY KEY.
#[cfg(feature = "sqlite")]
fn surrogate_key<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

/// Staging columns after the key, shared by the staging relation and its
/// working-table copy.
fn staging_payload_columns(table: &mut TableCreateStatement) {
    table
        .col(ColumnDef::new(Staging::OrderId).integer())
        .col(ColumnDef::new(Staging::Product).string())
        .col(ColumnDef::new(Staging::QuantityOrdered).integer())
        .col(ColumnDef::new(Staging::PricePerEach).decimal())
        .col(ColumnDef::new(Staging::OrderDate).timestamp())
        .col(ColumnDef::new(Staging::PurchaseAddress).text())
        .col(
            ColumnDef::new(Staging::CreatedAt)
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Staging::UpdatedAt)
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(ColumnDef::new(Staging::EtlMetaInfoId).big_integer());
}

/// The staging relation written by the ingestion job.
pub fn staging_table(name: &str) -> TableCreateStatement {
    let mut table = Table::create();
    table
        .table(sea_query::Alias::new(name))
        .if_not_exists()
        .col(&mut surrogate_key(Staging::Id));
    staging_payload_columns(&mut table);
    table
}

/// Working copy of selected staging rows inside the target store. Keeps the
/// staging ids, so the key is not generated.
///
/// A regular table, not a temporary one: it is created on first use, emptied
/// before loading and again before the phase commits, so other sessions only
/// ever see it empty.
pub fn working_table(name: &str) -> TableCreateStatement {
    let mut table = Table::create();
    table
        .table(sea_query::Alias::new(name))
        .if_not_exists()
        .col(
            ColumnDef::new(Staging::Id)
                .big_integer()
                .not_null()
                .primary_key(),
        );
    staging_payload_columns(&mut table);
    table
}

/// Working table holding the update source: staging rows already resolved
/// to dimension keys. Regular table with the same lifecycle as
/// [`working_table`].
pub fn resolved_table(name: &str) -> TableCreateStatement {
    Table::create()
        .table(sea_query::Alias::new(name))
        .if_not_exists()
        .col(
            ColumnDef::new(SalesInfo::SourceId)
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(SalesInfo::OrderId).big_integer().not_null())
        .col(ColumnDef::new(SalesInfo::ProductId).big_integer().not_null())
        .col(
            ColumnDef::new(SalesInfo::PurchaseAddressId)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(SalesInfo::DatetimeId).big_integer().not_null())
        .col(ColumnDef::new(SalesInfo::Quantity).integer())
        .col(ColumnDef::new(SalesInfo::PricePerEach).decimal())
        .col(ColumnDef::new(SalesInfo::TotalPrice).decimal())
        .col(
            ColumnDef::new(SalesInfo::SourceUpdatedAt)
                .timestamp()
                .not_null(),
        )
        .to_owned()
}

/// Dimension tables followed by the fact table, in creation order.
pub fn target_tables() -> Vec<TableCreateStatement> {
    let order = Table::create()
        .table(SalesOrder::Table)
        .if_not_exists()
        .col(&mut surrogate_key(SalesOrder::Id))
        .col(ColumnDef::new(SalesOrder::OrderId).integer().unique_key())
        .to_owned();

    let product = Table::create()
        .table(SalesProduct::Table)
        .if_not_exists()
        .col(&mut surrogate_key(SalesProduct::Id))
        .col(ColumnDef::new(SalesProduct::Name).string().unique_key())
        .to_owned();

    let date = Table::create()
        .table(SalesDate::Table)
        .if_not_exists()
        .col(&mut surrogate_key(SalesDate::Id))
        .col(ColumnDef::new(SalesDate::Ts).timestamp().unique_key())
        .col(ColumnDef::new(SalesDate::Year).integer())
        .col(ColumnDef::new(SalesDate::Month).integer())
        .col(ColumnDef::new(SalesDate::Day).integer())
        .to_owned();

    let address = Table::create()
        .table(SalesPurchaseAddress::Table)
        .if_not_exists()
        .col(&mut surrogate_key(SalesPurchaseAddress::Id))
        .col(
            ColumnDef::new(SalesPurchaseAddress::Address)
                .text()
                .unique_key(),
        )
        .to_owned();

    let fact = Table::create()
        .table(SalesInfo::Table)
        .if_not_exists()
        .col(ColumnDef::new(SalesInfo::OrderId).big_integer())
        .col(ColumnDef::new(SalesInfo::ProductId).big_integer())
        .col(ColumnDef::new(SalesInfo::PurchaseAddressId).big_integer())
        .col(ColumnDef::new(SalesInfo::DatetimeId).big_integer())
        .col(
            ColumnDef::new(SalesInfo::Quantity)
                .integer()
                .check(Expr::col(SalesInfo::Quantity).gt(0)),
        )
        .col(
            ColumnDef::new(SalesInfo::PricePerEach)
                .decimal()
                .check(Expr::col(SalesInfo::PricePerEach).gt(0)),
        )
        .col(
            ColumnDef::new(SalesInfo::TotalPrice)
                .decimal()
                .check(Expr::col(SalesInfo::TotalPrice).gt(0)),
        )
        .col(&mut surrogate_key(SalesInfo::SysId))
        .col(
            ColumnDef::new(SalesInfo::SysCreatedAt)
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(SalesInfo::SysUpdatedAt)
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(ColumnDef::new(SalesInfo::SysEtlMetaInfoId).big_integer())
        .col(ColumnDef::new(SalesInfo::SourceId).big_integer().not_null())
        .col(
            ColumnDef::new(SalesInfo::SourceCreatedAt)
                .timestamp()
                .not_null(),
        )
        .col(
            ColumnDef::new(SalesInfo::SourceUpdatedAt)
                .timestamp()
                .not_null(),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_sales_info_order")
                .from(SalesInfo::Table, SalesInfo::OrderId)
                .to(SalesOrder::Table, SalesOrder::Id),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_sales_info_product")
                .from(SalesInfo::Table, SalesInfo::ProductId)
                .to(SalesProduct::Table, SalesProduct::Id),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_sales_info_datetime")
                .from(SalesInfo::Table, SalesInfo::DatetimeId)
                .to(SalesDate::Table, SalesDate::Id),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_sales_info_purchase_address")
                .from(SalesInfo::Table, SalesInfo::PurchaseAddressId)
                .to(SalesPurchaseAddress::Table, SalesPurchaseAddress::Id),
        )
        .to_owned();

    vec![order, product, date, address, fact]
}

/// Run metadata table.
pub fn run_log_table() -> TableCreateStatement {
    Table::create()
        .table(EtlMetaInfo::Table)
        .if_not_exists()
        .col(&mut surrogate_key(EtlMetaInfo::Id))
        .col(
            ColumnDef::new(EtlMetaInfo::StartDate)
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(ColumnDef::new(EtlMetaInfo::EndDate).timestamp())
        .col(ColumnDef::new(EtlMetaInfo::State).string().not_null())
        .col(ColumnDef::new(EtlMetaInfo::Source).text().not_null())
        .col(ColumnDef::new(EtlMetaInfo::Target).text().not_null())
        .col(ColumnDef::new(EtlMetaInfo::Log).text())
        .to_owned()
}

async fn apply(pool: &Pool, tables: &[TableCreateStatement]) -> Result<()> {
    for table in tables {
        sqlx::query(&build_schema(table)).execute(pool).await?;
    }
    Ok(())
}

/// Create the staging relation if absent.
pub async fn apply_staging_schema(pool: &Pool, name: &str) -> Result<()> {
    apply(pool, &[staging_table(name)]).await?;
    info!(table = %name, "Staging table is ready");
    Ok(())
}

/// Create the dimension and fact tables if absent.
pub async fn apply_target_schema(pool: &Pool) -> Result<()> {
    apply(pool, &target_tables()).await?;
    info!("Star schema tables are ready");
    Ok(())
}

/// Create the run metadata table if absent.
pub async fn apply_run_log_schema(pool: &Pool) -> Result<()> {
    apply(pool, &[run_log_table()]).await?;
    info!("Run metadata table is ready");
    Ok(())
}

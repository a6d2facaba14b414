//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! The staging relation and the working tables have configurable names, so
//! only their columns are fixed here.

mod ddl;

pub use ddl::{
    apply_run_log_schema, apply_staging_schema, apply_target_schema, resolved_table, run_log_table,
    staging_table, target_tables, working_table,
};

use sea_query::Iden;

/// Columns of the staging relation (and of its working-table copy).
#[derive(Iden, Clone, Copy)]
pub enum Staging {
    #[iden = "id"]
    Id,
    #[iden = "order_id"]
    OrderId,
    #[iden = "product"]
    Product,
    #[iden = "quantity_ordered"]
    QuantityOrdered,
    #[iden = "price_per_each"]
    PricePerEach,
    #[iden = "order_date"]
    OrderDate,
    #[iden = "purchase_address"]
    PurchaseAddress,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "etl_meta_info_id"]
    EtlMetaInfoId,
}

/// Order dimension.
#[derive(Iden)]
pub enum SalesOrder {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "order_id"]
    OrderId,
}

/// Product dimension.
#[derive(Iden)]
pub enum SalesProduct {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
}

/// Calendar-date dimension. Year, month and day are derived from `ts` once,
/// when the member is inserted.
#[derive(Iden)]
pub enum SalesDate {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "ts"]
    Ts,
    #[iden = "year"]
    Year,
    #[iden = "month"]
    Month,
    #[iden = "day"]
    Day,
}

/// Purchase address dimension.
#[derive(Iden)]
pub enum SalesPurchaseAddress {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "address"]
    Address,
}

/// Sales fact table. The same columns (minus the `sys_*` bookkeeping) name
/// the resolved update source.
#[derive(Iden, Clone, Copy)]
pub enum SalesInfo {
    Table,
    #[iden = "order_id"]
    OrderId,
    #[iden = "product_id"]
    ProductId,
    #[iden = "purchase_address_id"]
    PurchaseAddressId,
    #[iden = "datetime_id"]
    DatetimeId,
    #[iden = "quantity"]
    Quantity,
    #[iden = "price_per_each"]
    PricePerEach,
    #[iden = "total_price"]
    TotalPrice,
    #[iden = "sys_id"]
    SysId,
    #[iden = "sys_created_at"]
    SysCreatedAt,
    #[iden = "sys_updated_at"]
    SysUpdatedAt,
    #[iden = "sys_etl_meta_info_id"]
    SysEtlMetaInfoId,
    #[iden = "source_id"]
    SourceId,
    #[iden = "source_created_at"]
    SourceCreatedAt,
    #[iden = "source_updated_at"]
    SourceUpdatedAt,
}

/// Run metadata table.
#[derive(Iden)]
pub enum EtlMetaInfo {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "start_date"]
    StartDate,
    #[iden = "end_date"]
    EndDate,
    #[iden = "state"]
    State,
    #[iden = "source"]
    Source,
    #[iden = "target"]
    Target,
    #[iden = "log"]
    Log,
}

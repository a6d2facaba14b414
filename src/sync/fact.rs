//! Set-based writes into the fact table.

use sea_query::{
    Alias, Cond, Expr, InsertStatement, Query, SelectStatement, SimpleExpr, SubQueryStatement,
    UpdateStatement,
};

use super::dimension::Dimension;
use crate::error::Result;
use crate::schema::{SalesInfo, Staging};

/// Working table joined to every dimension on its natural value.
fn resolved_source(working: &str) -> SelectStatement {
    let mut select = Query::select();
    select.from(Alias::new(working));
    for dim in Dimension::ALL {
        select
            .expr(Expr::col((dim.table(), dim.key_column())))
            .inner_join(dim.table(), dim.join_condition(working));
    }
    select
}

fn working_col(working: &str, col: Staging) -> Expr {
    Expr::col((Alias::new(working), col))
}

fn total_price(working: &str) -> SimpleExpr {
    working_col(working, Staging::QuantityOrdered)
        .mul(working_col(working, Staging::PricePerEach))
}

/// Alias of the working table inside [`superseding_row`].
const NEWER: &str = "newer";

/// Working rows that would produce the same fact as the outer working row
/// and were created after it (or at the same time with a greater id).
///
/// A row survives deduplication when this finds nothing, so the kept row is
/// the newest of its group and later duplicates can never sit behind the
/// `source_created_at` watermark.
fn superseding_row(working: &str) -> SelectStatement {
    let newer = |col: Staging| Expr::col((Alias::new(NEWER), col));

    let mut same_fact = Cond::all();
    for col in [
        Staging::OrderId,
        Staging::Product,
        Staging::OrderDate,
        Staging::PurchaseAddress,
        Staging::QuantityOrdered,
        Staging::PricePerEach,
    ] {
        same_fact = same_fact.add(newer(col).equals((Alias::new(working), col)));
    }

    let created_later = Cond::any()
        .add(newer(Staging::CreatedAt).gt(working_col(working, Staging::CreatedAt)))
        .add(
            Cond::all()
                .add(newer(Staging::CreatedAt).eq(working_col(working, Staging::CreatedAt)))
                .add(newer(Staging::Id).gt(working_col(working, Staging::Id))),
        );

    Query::select()
        .column((Alias::new(NEWER), Staging::Id))
        .from_as(Alias::new(working), Alias::new(NEWER))
        .cond_where(same_fact.add(created_later))
        .to_owned()
}

/// Insert one fact per deduplicated working row not yet present in the fact
/// table, stamped with `run_id`.
pub fn insert_new_facts(working: &str, run_id: i64) -> Result<InsertStatement> {
    let mut select = resolved_source(working);
    select
        .expr(working_col(working, Staging::QuantityOrdered))
        .expr(working_col(working, Staging::PricePerEach))
        .expr(total_price(working))
        .expr(Expr::val(run_id))
        .expr(working_col(working, Staging::Id))
        .expr(working_col(working, Staging::CreatedAt))
        .expr(working_col(working, Staging::UpdatedAt))
        .and_where(Expr::exists(superseding_row(working)).not())
        .and_where(
            working_col(working, Staging::Id).not_in_subquery(
                Query::select()
                    .column(SalesInfo::SourceId)
                    .from(SalesInfo::Table)
                    .to_owned(),
            ),
        );

    let mut columns: Vec<SalesInfo> = Dimension::ALL.iter().map(|d| d.fact_column()).collect();
    columns.extend([
        SalesInfo::Quantity,
        SalesInfo::PricePerEach,
        SalesInfo::TotalPrice,
        SalesInfo::SysEtlMetaInfoId,
        SalesInfo::SourceId,
        SalesInfo::SourceCreatedAt,
        SalesInfo::SourceUpdatedAt,
    ]);

    let mut insert = Query::insert();
    insert
        .into_table(SalesInfo::Table)
        .columns(columns)
        .select_from(select)?;
    Ok(insert)
}

/// Fill the resolved table with the working rows mapped to dimension keys.
pub fn fill_resolved(working: &str, resolved: &str) -> Result<InsertStatement> {
    let mut select = resolved_source(working);
    select
        .expr(working_col(working, Staging::Id))
        .expr(working_col(working, Staging::QuantityOrdered))
        .expr(working_col(working, Staging::PricePerEach))
        .expr(total_price(working))
        .expr(working_col(working, Staging::UpdatedAt));

    let mut columns: Vec<SalesInfo> = Dimension::ALL.iter().map(|d| d.fact_column()).collect();
    columns.extend([
        SalesInfo::SourceId,
        SalesInfo::Quantity,
        SalesInfo::PricePerEach,
        SalesInfo::TotalPrice,
        SalesInfo::SourceUpdatedAt,
    ]);

    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(resolved))
        .columns(columns)
        .select_from(select)?;
    Ok(insert)
}

/// `(SELECT <col> FROM resolved WHERE resolved.source_id = sales_info.source_id)`
fn resolved_value(resolved: &str, col: SalesInfo) -> SimpleExpr {
    let lookup = Query::select()
        .column((Alias::new(resolved), col))
        .from(Alias::new(resolved))
        .and_where(
            Expr::col((Alias::new(resolved), SalesInfo::SourceId))
                .equals((SalesInfo::Table, SalesInfo::SourceId)),
        )
        .to_owned();
    SimpleExpr::SubQuery(None, Box::new(SubQueryStatement::SelectStatement(lookup)))
}

/// Rewrite every fact whose source id appears in the resolved table. Never
/// inserts.
pub fn update_changed_facts(resolved: &str, run_id: i64) -> UpdateStatement {
    let mut update = Query::update();
    update.table(SalesInfo::Table);

    let copied = Dimension::ALL.iter().map(|d| d.fact_column()).chain([
        SalesInfo::Quantity,
        SalesInfo::PricePerEach,
        SalesInfo::TotalPrice,
        SalesInfo::SourceUpdatedAt,
    ]);
    for col in copied {
        update.value(col, resolved_value(resolved, col));
    }

    update
        .value(SalesInfo::SysUpdatedAt, Expr::current_timestamp())
        .value(SalesInfo::SysEtlMetaInfoId, run_id)
        .and_where(
            Expr::col(SalesInfo::SourceId).in_subquery(
                Query::select()
                    .column(SalesInfo::SourceId)
                    .from(Alias::new(resolved))
                    .to_owned(),
            ),
        );
    update
}

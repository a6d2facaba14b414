//! Dimension member resolution.
//!
//! For every distinct natural value in the working table that has no member
//! yet, one member is inserted. Members are never updated or deleted.

use std::fmt;

use chrono::{Datelike, NaiveDateTime};
use sea_query::{Alias, DynIden, Expr, IntoIden, InsertStatement, Query, SelectStatement};
use tracing::debug;

use super::snapshot::ROWS_PER_STATEMENT;
use crate::error::Result;
use crate::schema::{SalesDate, SalesInfo, SalesOrder, SalesProduct, SalesPurchaseAddress, Staging};
use crate::store::{build_bound, DbConnection};

/// The four dimensions of the sales star.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Order,
    Product,
    Date,
    Address,
}

impl Dimension {
    /// Resolution order.
    pub const ALL: [Dimension; 4] = [
        Dimension::Order,
        Dimension::Product,
        Dimension::Date,
        Dimension::Address,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Order => "order",
            Dimension::Product => "product",
            Dimension::Date => "date",
            Dimension::Address => "purchase_address",
        }
    }

    pub fn table(&self) -> DynIden {
        match self {
            Dimension::Order => SalesOrder::Table.into_iden(),
            Dimension::Product => SalesProduct::Table.into_iden(),
            Dimension::Date => SalesDate::Table.into_iden(),
            Dimension::Address => SalesPurchaseAddress::Table.into_iden(),
        }
    }

    /// Surrogate key column.
    pub fn key_column(&self) -> DynIden {
        match self {
            Dimension::Order => SalesOrder::Id.into_iden(),
            Dimension::Product => SalesProduct::Id.into_iden(),
            Dimension::Date => SalesDate::Id.into_iden(),
            Dimension::Address => SalesPurchaseAddress::Id.into_iden(),
        }
    }

    /// Natural value column on the dimension side.
    pub fn natural_column(&self) -> DynIden {
        match self {
            Dimension::Order => SalesOrder::OrderId.into_iden(),
            Dimension::Product => SalesProduct::Name.into_iden(),
            Dimension::Date => SalesDate::Ts.into_iden(),
            Dimension::Address => SalesPurchaseAddress::Address.into_iden(),
        }
    }

    /// Natural value column on the staging side.
    pub fn staging_column(&self) -> Staging {
        match self {
            Dimension::Order => Staging::OrderId,
            Dimension::Product => Staging::Product,
            Dimension::Date => Staging::OrderDate,
            Dimension::Address => Staging::PurchaseAddress,
        }
    }

    /// Foreign key column in the fact table.
    pub fn fact_column(&self) -> SalesInfo {
        match self {
            Dimension::Order => SalesInfo::OrderId,
            Dimension::Product => SalesInfo::ProductId,
            Dimension::Date => SalesInfo::DatetimeId,
            Dimension::Address => SalesInfo::PurchaseAddressId,
        }
    }

    /// The calendar dimension stores year, month and day beside the value.
    pub fn is_calendar(&self) -> bool {
        matches!(self, Dimension::Date)
    }

    /// Join condition between the working table and this dimension.
    pub fn join_condition(&self, working: &str) -> sea_query::SimpleExpr {
        Expr::col((self.table(), self.natural_column()))
            .equals((Alias::new(working), self.staging_column()))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Distinct natural values of the working table without a member.
pub fn missing_values(dim: Dimension, working: &str) -> SelectStatement {
    let working_col = (Alias::new(working), dim.staging_column());
    Query::select()
        .distinct()
        .column(working_col.clone())
        .from(Alias::new(working))
        .left_join(dim.table(), dim.join_condition(working))
        .and_where(Expr::col(working_col).is_not_null())
        .and_where(Expr::col((dim.table(), dim.key_column())).is_null())
        .to_owned()
}

/// Set-based insert of the missing members of a plain dimension.
pub fn insert_missing(dim: Dimension, working: &str) -> Result<InsertStatement> {
    let mut insert = Query::insert();
    insert
        .into_table(dim.table())
        .columns([dim.natural_column()])
        .select_from(missing_values(dim, working))?;
    Ok(insert)
}

/// Insert calendar members, decomposing each timestamp once.
pub fn insert_dates(values: &[NaiveDateTime]) -> Result<InsertStatement> {
    let mut insert = Query::insert();
    insert.into_table(SalesDate::Table).columns([
        SalesDate::Ts,
        SalesDate::Year,
        SalesDate::Month,
        SalesDate::Day,
    ]);
    for ts in values {
        let (year, month, day) = decompose(ts);
        insert.values([(*ts).into(), year.into(), month.into(), day.into()])?;
    }
    Ok(insert)
}

/// Calendar parts of a timestamp.
pub fn decompose(ts: &NaiveDateTime) -> (i32, i32, i32) {
    (ts.year(), ts.month() as i32, ts.day() as i32)
}

/// Inserts missing dimension members.
#[derive(Debug, Clone, Copy, Default)]
pub struct DimensionResolver;

impl DimensionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Insert one member per natural value of `working` absent from the
    /// dimension. Returns the number of members inserted; zero when the
    /// dimension already covers the working table.
    pub async fn resolve(&self, dim: Dimension, working: &str, conn: &mut DbConnection) -> Result<u64> {
        let inserted = if dim.is_calendar() {
            self.resolve_calendar(working, conn).await?
        } else {
            let (sql, values) = build_bound(&insert_missing(dim, working)?);
            sqlx::query_with(&sql, values)
                .execute(&mut *conn)
                .await?
                .rows_affected()
        };

        debug!(dimension = %dim, inserted, "Dimension resolved");
        Ok(inserted)
    }

    async fn resolve_calendar(&self, working: &str, conn: &mut DbConnection) -> Result<u64> {
        let (sql, values) = build_bound(&missing_values(Dimension::Date, working));
        let missing: Vec<NaiveDateTime> = sqlx::query_scalar_with(&sql, values)
            .fetch_all(&mut *conn)
            .await?;

        let mut inserted = 0;
        for batch in missing.chunks(ROWS_PER_STATEMENT) {
            let (sql, values) = build_bound(&insert_dates(batch)?);
            inserted += sqlx::query_with(&sql, values)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(inserted)
    }
}

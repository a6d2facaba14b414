//! Backend-independent synchronizer scenarios.
//!
//! Each backend test file builds a [`Fixture`] and calls these functions.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use sea_query::{Alias, Expr, Query};

use ods_sync::config::{StoreConfig, SyncConfig};
use ods_sync::run_log::{MemoryRunLog, Outcome, RunLog, RunState, SqlRunLog};
use ods_sync::schema::{Staging, apply_run_log_schema, apply_staging_schema, apply_target_schema};
use ods_sync::store::{build_bound, Pool};
use ods_sync::sync::Phase;
use ods_sync::{Error, SyncReport, Synchronizer};

pub const STAGING_TABLE: &str = "sales";
pub const DIMENSION_TABLES: [&str; 4] = [
    "sales_order",
    "sales_product",
    "sales_date",
    "sales_purchase_address",
];

/// Pools for the three stores plus the configuration a run is built from.
pub struct Fixture {
    pub staging: Pool,
    pub target: Pool,
    pub run_log: Pool,
    pub config: SyncConfig,
}

impl Fixture {
    pub async fn new(staging: Pool, target: Pool, run_log: Pool) -> Self {
        apply_staging_schema(&staging, STAGING_TABLE).await.expect("staging schema");
        apply_target_schema(&target).await.expect("target schema");
        apply_run_log_schema(&run_log).await.expect("run log schema");

        let mut config = SyncConfig::default();
        config.staging = StoreConfig {
            host: "stage".into(),
            database: "stage".into(),
            ..StoreConfig::default()
        };
        config.target = StoreConfig {
            host: "ods".into(),
            database: "ods".into(),
            ..StoreConfig::default()
        };
        config.sync.chunk_size = 2;

        Self {
            staging,
            target,
            run_log,
            config,
        }
    }

    pub fn run_log(&self) -> SqlRunLog {
        SqlRunLog::new(self.run_log.clone())
    }

    pub fn synchronizer(&self) -> Synchronizer {
        self.synchronizer_with(Arc::new(self.run_log()))
    }

    pub fn synchronizer_with(&self, run_log: Arc<dyn RunLog>) -> Synchronizer {
        Synchronizer::new(
            &self.config,
            self.staging.clone(),
            self.target.clone(),
            run_log,
        )
    }

    pub async fn run(&self) -> Result<SyncReport, Error> {
        self.synchronizer().run().await
    }

    /// Empty every table. Used when several scenarios share one database.
    pub async fn reset(&self) {
        for table in ["sales_info", "sales_snapshot", "sales_snapshot_resolved"]
            .into_iter()
            .chain(DIMENSION_TABLES)
        {
            let _ = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.target)
                .await;
        }
        sqlx::query(&format!("DELETE FROM {STAGING_TABLE}"))
            .execute(&self.staging)
            .await
            .expect("clear staging");
        sqlx::query("DELETE FROM etl_meta_info")
            .execute(&self.run_log)
            .await
            .expect("clear run log");
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.target)
            .await
            .expect("count")
    }

    pub async fn dimension_counts(&self) -> Vec<i64> {
        let mut counts = Vec::new();
        for table in DIMENSION_TABLES {
            counts.push(self.count(table).await);
        }
        counts
    }

    /// (quantity, total_price, sys_etl_meta_info_id) of the fact for `source_id`.
    pub async fn fact(&self, source_id: i64) -> (i32, f64, i64) {
        let sql = format!(
            "SELECT quantity, CAST(total_price AS double precision), sys_etl_meta_info_id \
             FROM sales_info WHERE source_id = {source_id}"
        );
        sqlx::query_as(&sql)
            .fetch_one(&self.target)
            .await
            .expect("fact row")
    }

    pub async fn insert_sale(&self, sale: &Sale) -> i64 {
        let stmt = Query::insert()
            .into_table(Alias::new(STAGING_TABLE))
            .columns([
                Staging::OrderId,
                Staging::Product,
                Staging::QuantityOrdered,
                Staging::PricePerEach,
                Staging::OrderDate,
                Staging::PurchaseAddress,
                Staging::CreatedAt,
                Staging::UpdatedAt,
            ])
            .values_panic([
                sale.order_id.into(),
                sale.product.map(str::to_string).into(),
                sale.quantity.into(),
                sale.price.into(),
                sale.order_date.into(),
                sale.address.to_string().into(),
                sale.created_at.into(),
                sale.updated_at.into(),
            ])
            .returning_col(Staging::Id)
            .to_owned();

        let (sql, values) = build_bound(&stmt);
        sqlx::query_scalar_with(&sql, values)
            .fetch_one(&self.staging)
            .await
            .expect("insert staging row")
    }

    pub async fn update_sale(&self, id: i64, quantity: i32, updated_at: NaiveDateTime) {
        let stmt = Query::update()
            .table(Alias::new(STAGING_TABLE))
            .value(Staging::QuantityOrdered, quantity)
            .value(Staging::UpdatedAt, updated_at)
            .and_where(Expr::col(Staging::Id).eq(id))
            .to_owned();

        let (sql, values) = build_bound(&stmt);
        sqlx::query_with(&sql, values)
            .execute(&self.staging)
            .await
            .expect("update staging row");
    }

    pub async fn update_product(&self, id: i64, product: &str, updated_at: NaiveDateTime) {
        let stmt = Query::update()
            .table(Alias::new(STAGING_TABLE))
            .value(Staging::Product, product)
            .value(Staging::UpdatedAt, updated_at)
            .and_where(Expr::col(Staging::Id).eq(id))
            .to_owned();

        let (sql, values) = build_bound(&stmt);
        sqlx::query_with(&sql, values)
            .execute(&self.staging)
            .await
            .expect("update staging product");
    }
}

pub fn ts(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// A staging row as the ingestion job would write it.
#[derive(Debug, Clone)]
pub struct Sale {
    pub order_id: i32,
    pub product: Option<&'static str>,
    pub quantity: i32,
    pub price: f64,
    pub order_date: NaiveDateTime,
    pub address: &'static str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Sale {
    /// 1001, Widget, 2 x 9.99, ordered 2024-01-01, "1 Main St".
    pub fn widget() -> Self {
        Self {
            order_id: 1001,
            product: Some("Widget"),
            quantity: 2,
            price: 9.99,
            order_date: ts(2024, 1, 1, 0),
            address: "1 Main St",
            created_at: ts(2024, 1, 2, 0),
            updated_at: ts(2024, 1, 2, 0),
        }
    }

    pub fn loaded_at(mut self, at: NaiveDateTime) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

pub async fn first_run_builds_star(f: &Fixture) {
    let id = f.insert_sale(&Sale::widget()).await;

    let report = f.run().await.expect("run succeeds");
    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 0);

    assert_eq!(f.dimension_counts().await, vec![1, 1, 1, 1]);
    assert_eq!(f.count("sales_info").await, 1);

    let (quantity, total, run_id) = f.fact(id).await;
    assert_eq!(quantity, 2);
    assert_close(total, 19.98);
    assert_eq!(run_id, report.run_id);

    let run = f.run_log().get(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Finished);
    assert!(run.end_date.is_some());
    assert!(run.source.contains("HOST: stage"));
    assert!(run.target.contains("DB: ods"));
    let messages = run.messages();
    assert_eq!(messages.first(), Some(&"ETL starts..."));
    assert!(messages.contains(&"Inserting new values in target fact table finished: 1 new facts."));
    assert!(messages.contains(&"No data to update."));
    assert_eq!(messages.last(), Some(&"ETL finished."));

    // The working table is left empty.
    assert_eq!(f.count("sales_snapshot").await, 0);
}

pub async fn second_run_without_new_data_changes_nothing(f: &Fixture) {
    f.insert_sale(&Sale::widget()).await;
    f.run().await.expect("first run");

    let report = f.run().await.expect("second run");
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(f.dimension_counts().await, vec![1, 1, 1, 1]);
    assert_eq!(f.count("sales_info").await, 1);

    let run = f.run_log().get(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Finished);
    assert!(run.messages().contains(&"No new data."));
}

pub async fn updated_row_rewrites_fact(f: &Fixture) {
    let id = f.insert_sale(&Sale::widget()).await;
    let first = f.run().await.expect("first run");

    f.update_sale(id, 3, ts(2024, 1, 3, 0)).await;
    let second = f.run().await.expect("second run");

    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(f.dimension_counts().await, vec![1, 1, 1, 1]);
    assert_eq!(f.count("sales_info").await, 1);

    let (quantity, total, run_id) = f.fact(id).await;
    assert_eq!(quantity, 3);
    assert_close(total, 29.97);
    assert_eq!(run_id, second.run_id);
    assert_ne!(run_id, first.run_id);

    let run = f.run_log().get(second.run_id).await.unwrap().unwrap();
    assert!(run
        .messages()
        .contains(&"Updating values in target fact table finished: 1 facts."));

    // Both working tables stay in the target store, emptied.
    assert_eq!(f.count("sales_snapshot").await, 0);
    assert_eq!(f.count("sales_snapshot_resolved").await, 0);
}

pub async fn updated_row_adds_dimension_member(f: &Fixture) {
    let id = f.insert_sale(&Sale::widget()).await;
    f.run().await.expect("first run");

    f.update_product(id, "Gadget", ts(2024, 1, 3, 0)).await;
    let second = f.run().await.expect("second run");

    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(f.dimension_counts().await, vec![1, 2, 1, 1]);
    assert_eq!(f.count("sales_info").await, 1);

    let sql = format!(
        "SELECT p.name FROM sales_info f JOIN sales_product p ON p.id = f.product_id \
         WHERE f.source_id = {id}"
    );
    let product: String = sqlx::query_scalar(&sql)
        .fetch_one(&f.target)
        .await
        .expect("fact product");
    assert_eq!(product, "Gadget");
    assert_eq!(f.fact(id).await.2, second.run_id);
}

pub async fn watermark_skips_rows_at_or_before_it(f: &Fixture) {
    f.insert_sale(&Sale::widget().loaded_at(ts(2024, 2, 1, 0))).await;
    f.run().await.expect("first run");

    let late = Sale {
        order_id: 1002,
        ..Sale::widget().loaded_at(ts(2024, 1, 15, 0))
    };
    let same = Sale {
        order_id: 1003,
        ..Sale::widget().loaded_at(ts(2024, 2, 1, 0))
    };
    let newer = Sale {
        order_id: 1004,
        ..Sale::widget().loaded_at(ts(2024, 2, 2, 0))
    };
    f.insert_sale(&late).await;
    f.insert_sale(&same).await;
    let newer_id = f.insert_sale(&newer).await;

    let report = f.run().await.expect("second run");
    assert_eq!(report.inserted, 1);
    assert_eq!(f.count("sales_info").await, 2);
    assert_eq!(f.count("sales_order").await, 2);
    assert_eq!(f.fact(newer_id).await.0, 2);
}

pub async fn identical_rows_collapse_to_newest(f: &Fixture) {
    let first = f.insert_sale(&Sale::widget()).await;
    let second = f.insert_sale(&Sale::widget()).await;

    // Same sale staged twice, the earlier id carrying the later timestamp.
    let reloaded = Sale {
        order_id: 1005,
        ..Sale::widget()
    };
    let newest = f
        .insert_sale(&reloaded.clone().loaded_at(ts(2024, 1, 5, 0)))
        .await;
    f.insert_sale(&reloaded.loaded_at(ts(2024, 1, 3, 0))).await;

    let report = f.run().await.expect("run succeeds");
    assert_eq!(report.inserted, 2);

    let sources: Vec<i64> =
        sqlx::query_scalar("SELECT source_id FROM sales_info ORDER BY source_id")
            .fetch_all(&f.target)
            .await
            .unwrap();
    let mut expected = vec![first.max(second), newest];
    expected.sort();
    assert_eq!(sources, expected);

    let again = f.run().await.expect("second run");
    assert_eq!(again.inserted, 0);
    assert_eq!(f.count("sales_info").await, 2);
}

pub async fn every_fact_references_existing_members(f: &Fixture) {
    let products = ["Widget", "Gadget", "Widget", "Gizmo", "Gadget"];
    for (i, product) in products.into_iter().enumerate() {
        f.insert_sale(&Sale {
            order_id: 2000 + (i as i32 % 2),
            product: Some(product),
            quantity: i as i32 + 1,
            order_date: ts(2024, 3, 1 + i as u32 % 3, 9),
            ..Sale::widget()
        })
        .await;
    }

    let report = f.run().await.expect("run succeeds");
    assert_eq!(report.inserted, 5);
    assert_eq!(f.dimension_counts().await, vec![2, 3, 3, 1]);

    let joined: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sales_info f \
         JOIN sales_order o ON o.id = f.order_id \
         JOIN sales_product p ON p.id = f.product_id \
         JOIN sales_date d ON d.id = f.datetime_id \
         JOIN sales_purchase_address a ON a.id = f.purchase_address_id",
    )
    .fetch_one(&f.target)
    .await
    .unwrap();
    assert_eq!(joined, 5);
}

pub async fn calendar_member_is_decomposed(f: &Fixture) {
    f.insert_sale(&Sale {
        order_date: ts(2025, 3, 14, 10),
        ..Sale::widget()
    })
    .await;
    f.run().await.expect("run succeeds");

    let parts: (i32, i32, i32) = sqlx::query_as("SELECT year, month, day FROM sales_date")
        .fetch_one(&f.target)
        .await
        .unwrap();
    assert_eq!(parts, (2025, 3, 14));
}

pub async fn update_phase_never_creates_facts(f: &Fixture) {
    f.insert_sale(&Sale::widget().loaded_at(ts(2024, 2, 1, 0))).await;
    f.run().await.expect("first run");

    // Created before the insert watermark, updated after the update one.
    f.insert_sale(&Sale {
        order_id: 3000,
        product: Some("Sprocket"),
        created_at: ts(2024, 1, 1, 0),
        updated_at: ts(2024, 3, 1, 0),
        ..Sale::widget()
    })
    .await;

    let report = f.run().await.expect("second run");
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(f.count("sales_info").await, 1);
}

pub async fn rows_without_natural_values_are_ignored(f: &Fixture) {
    f.insert_sale(&Sale {
        product: None,
        ..Sale::widget()
    })
    .await;

    let report = f.run().await.expect("run succeeds");
    assert_eq!(report.inserted, 0);
    assert_eq!(f.dimension_counts().await, vec![0, 0, 0, 0]);
}

pub async fn constraint_violation_fails_run(f: &Fixture) {
    f.insert_sale(&Sale {
        quantity: 0,
        ..Sale::widget()
    })
    .await;

    let err = f.run().await.unwrap_err();
    let run_id = match err {
        Error::Etl { run_id, phase, .. } => {
            assert_eq!(phase, Phase::Insert);
            run_id
        }
        other => panic!("expected ETL error, got {other:?}"),
    };

    // The phase rolled back, dimension members included.
    assert_eq!(f.dimension_counts().await, vec![0, 0, 0, 0]);
    assert_eq!(f.count("sales_info").await, 0);

    let run = f.run_log().get(run_id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Error);
    assert!(run.end_date.is_some());
    let last = run.messages().last().copied().unwrap_or_default().to_string();
    assert!(last.starts_with("Error while trying to ETL new data:"), "{last}");
    assert!(!run.messages().contains(&"Selecting source data to be updated..."));
}

pub async fn tracking_failures_propagate_unchanged(f: &Fixture) {
    f.insert_sale(&Sale::widget()).await;

    let run_log = Arc::new(MemoryRunLog::new());
    run_log.set_fail_on_start(true).await;
    let err = f.synchronizer_with(run_log.clone()).run().await.unwrap_err();
    assert!(matches!(err, Error::MetaInsert(_)));
    assert_eq!(f.count("sales_info").await, 0);

    run_log.set_fail_on_start(false).await;
    run_log.set_fail_on_append(true).await;
    let err = f.synchronizer_with(run_log.clone()).run().await.unwrap_err();
    assert!(matches!(err, Error::MetaUpdate(_)));
    assert_eq!(f.count("sales_info").await, 0);
}

pub async fn sql_run_log_lifecycle(f: &Fixture) {
    let log = f.run_log();
    let id = log.start("SRC", "DST").await.expect("start");

    let run = log.get(id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Processing);
    assert!(run.end_date.is_none());
    // Stored in UTC regardless of the server time zone.
    assert!((Utc::now() - run.start_date).num_seconds().abs() < 60);
    assert_eq!(run.messages(), vec!["ETL starts..."]);

    log.append(id, "it's going", Outcome::Progress).await.unwrap();
    log.append(id, "done", Outcome::Failure).await.unwrap();

    let run = log.get(id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Error);
    let end_date = run.end_date.expect("end date set");
    assert!(end_date >= run.start_date);
    assert!((Utc::now() - end_date).num_seconds().abs() < 60);
    assert_eq!(run.messages(), vec!["ETL starts...", "it's going", "done"]);

    let err = log.append(id, "late", Outcome::Success).await.unwrap_err();
    assert!(matches!(err, Error::MetaUpdate(_)));
    assert!(matches!(
        log.append(id + 1000, "nobody", Outcome::Progress).await,
        Err(Error::MetaUpdate(_))
    ));
    assert!(log.get(id + 1000).await.unwrap().is_none());
}

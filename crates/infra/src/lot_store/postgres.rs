//! Postgres-backed lot store.
//!
//! Lots live in the `inventory_lots` table. The sweep's bulk transition is a
//! single `UPDATE` statement, so Postgres statement atomicity is the only
//! concurrency primitive relied on: two overlapping sweeps serialize on the
//! row locks and the later one finds nothing left to flip.
//!
//! ## Error Mapping
//!
//! | SQLx Error | LotStoreError |
//! |------------|---------------|
//! | Database unique violation (`23505`) on insert | `AlreadyExists` |
//! | Io / Tls / PoolTimedOut / PoolClosed | `Unavailable` |
//! | Statement exceeded the configured bound | `Timeout` |
//! | Anything else | `Storage` |
//!
//! ## Runtime
//!
//! `LotStore` is a synchronous trait (it is driven from a worker thread), so this
//! adapter keeps a `tokio::runtime::Handle` and blocks on it. Do not call the
//! trait methods from inside an async task; use `spawn_blocking`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use clinic_core::{BranchId, LotId, MedicationId};
use clinic_inventory::InventoryLot;

use super::r#trait::{LotStore, LotStoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_lots (
    lot_id        UUID PRIMARY KEY,
    medication_id UUID NOT NULL,
    branch_id     UUID NOT NULL,
    quantity      BIGINT NOT NULL CHECK (quantity >= 0),
    expiry_date   TIMESTAMPTZ NULL,
    is_expired    BOOLEAN NOT NULL DEFAULT FALSE,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

// Keeps the sweep predicate an index range scan over the shrinking active set.
const CREATE_ACTIVE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS inventory_lots_active_expiry_idx
    ON inventory_lots (expiry_date)
    WHERE is_expired = FALSE
"#;

/// Postgres-backed lot store.
#[derive(Debug, Clone)]
pub struct PostgresLotStore {
    pool: Arc<PgPool>,
    runtime: Handle,
    timeout: Option<Duration>,
}

impl PostgresLotStore {
    /// Create a store over an existing pool. `runtime` drives the queries.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
            timeout: None,
        }
    }

    /// Bound every store call; exceeding it yields `LotStoreError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create the `inventory_lots` table and its partial index if missing.
    pub async fn ensure_schema(&self) -> Result<(), LotStoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        sqlx::query(CREATE_ACTIVE_INDEX)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Drive `fut` to completion, honouring the configured bound.
    fn run_raw<T, F>(&self, fut: F) -> Result<Result<T, sqlx::Error>, LotStoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match self.timeout {
            Some(limit) => self
                .runtime
                .block_on(tokio::time::timeout(limit, fut))
                .map_err(|_| LotStoreError::timed_out_after(limit)),
            None => Ok(self.runtime.block_on(fut)),
        }
    }

    fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, LotStoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        self.run_raw(fut)?
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

fn row_to_lot(row: &sqlx::postgres::PgRow) -> Result<InventoryLot, sqlx::Error> {
    Ok(InventoryLot::restore(
        LotId::from_uuid(row.try_get::<uuid::Uuid, _>("lot_id")?),
        MedicationId::from_uuid(row.try_get::<uuid::Uuid, _>("medication_id")?),
        BranchId::from_uuid(row.try_get::<uuid::Uuid, _>("branch_id")?),
        row.try_get::<i64, _>("quantity")?,
        row.try_get::<Option<DateTime<Utc>>, _>("expiry_date")?,
        row.try_get::<bool, _>("is_expired")?,
    ))
}

impl LotStore for PostgresLotStore {
    #[instrument(skip(self, lot), fields(lot_id = %lot.id_typed()), err)]
    fn insert(&self, lot: InventoryLot) -> Result<(), LotStoreError> {
        let pool = self.pool.clone();
        let lot_id = lot.id_typed();

        let result = self.run_raw(async move {
            sqlx::query(
                r#"
                INSERT INTO inventory_lots (
                    lot_id,
                    medication_id,
                    branch_id,
                    quantity,
                    expiry_date,
                    is_expired
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(lot.id_typed().as_uuid())
            .bind(lot.medication_id().as_uuid())
            .bind(lot.branch_id().as_uuid())
            .bind(lot.quantity())
            .bind(lot.expiry_date())
            .bind(lot.is_expired())
            .execute(&*pool)
            .await
            .map(|_| ())
        });

        match result? {
            Ok(()) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(LotStoreError::AlreadyExists(lot_id)),
            Err(e) => Err(map_sqlx_error("insert", e)),
        }
    }

    fn get(&self, lot_id: LotId) -> Result<Option<InventoryLot>, LotStoreError> {
        let pool = self.pool.clone();
        self.run("get", async move {
            let row = sqlx::query(
                r#"
                SELECT lot_id, medication_id, branch_id, quantity, expiry_date, is_expired
                FROM inventory_lots
                WHERE lot_id = $1
                "#,
            )
            .bind(lot_id.as_uuid())
            .fetch_optional(&*pool)
            .await?;

            row.as_ref().map(row_to_lot).transpose()
        })
    }

    fn list(&self) -> Result<Vec<InventoryLot>, LotStoreError> {
        let pool = self.pool.clone();
        self.run("list", async move {
            let rows = sqlx::query(
                r#"
                SELECT lot_id, medication_id, branch_id, quantity, expiry_date, is_expired
                FROM inventory_lots
                ORDER BY lot_id ASC
                "#,
            )
            .fetch_all(&*pool)
            .await?;

            rows.iter().map(row_to_lot).collect()
        })
    }

    #[instrument(skip(self), fields(before = %before, rows_affected = tracing::field::Empty), err)]
    fn bulk_mark_expired(&self, before: DateTime<Utc>) -> Result<u64, LotStoreError> {
        let pool = self.pool.clone();
        let affected = self.run("bulk_mark_expired", async move {
            sqlx::query(
                r#"
                UPDATE inventory_lots
                SET is_expired = TRUE,
                    updated_at = NOW()
                WHERE expiry_date < $1
                  AND is_expired = FALSE
                "#,
            )
            .bind(before)
            .execute(&*pool)
            .await
            .map(|res| res.rows_affected())
        })?;

        Span::current().record("rows_affected", affected);
        Ok(affected)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LotStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            LotStoreError::Storage(format!(
                "database error in {}: {}",
                operation,
                db_err.message()
            ))
        }
        sqlx::Error::Io(e) => {
            LotStoreError::Unavailable(format!("io error in {}: {}", operation, e))
        }
        sqlx::Error::Tls(e) => {
            LotStoreError::Unavailable(format!("tls error in {}: {}", operation, e))
        }
        sqlx::Error::PoolTimedOut => {
            LotStoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            LotStoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        other => LotStoreError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    //! Run with `DATABASE_URL=postgres://... cargo test -p clinic-infra -- --ignored`.

    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use clinic_inventory::NewLot;

    fn lot(expiry_date: Option<DateTime<Utc>>) -> InventoryLot {
        InventoryLot::import(NewLot {
            lot_id: LotId::new(),
            medication_id: MedicationId::new(),
            branch_id: BranchId::new(),
            quantity: 1,
            expiry_date,
        })
        .unwrap()
    }

    fn connect() -> (tokio::runtime::Runtime, PostgresLotStore) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let pool = rt.block_on(PgPool::connect(&url)).unwrap();
        let store = PostgresLotStore::new(pool, rt.handle().clone());
        rt.block_on(store.ensure_schema()).unwrap();
        (rt, store)
    }

    #[test]
    #[ignore]
    fn bulk_mark_expired_is_idempotent_against_postgres() {
        let (_rt, store) = connect();
        // Far in the past so rows from other runs sharing the table do not match.
        let now = Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap();
        let due = lot(Some(now - ChronoDuration::days(1)));
        let boundary = lot(Some(now));
        store.insert(due.clone()).unwrap();
        store.insert(boundary.clone()).unwrap();

        assert_eq!(store.bulk_mark_expired(now).unwrap(), 1);
        assert_eq!(store.bulk_mark_expired(now).unwrap(), 0);
        assert!(store.get(due.id_typed()).unwrap().unwrap().is_expired());
        assert!(!store.get(boundary.id_typed()).unwrap().unwrap().is_expired());
    }

    #[test]
    #[ignore]
    fn duplicate_insert_maps_to_already_exists() {
        let (_rt, store) = connect();
        let l = lot(None);
        store.insert(l.clone()).unwrap();
        assert_eq!(
            store.insert(l.clone()),
            Err(LotStoreError::AlreadyExists(l.id_typed()))
        );
    }
}

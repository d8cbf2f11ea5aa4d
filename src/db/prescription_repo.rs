//! Prescription log repository for pharmstream
//!
//! Dispensing events are append-only; the dispense reference is the natural
//! key that makes redelivered events a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::db::repository::{with_retry, RepositoryResult, RetryConfig};
use crate::db::DbPool;
use crate::models::NewPrescriptionLog;

/// A persisted dispensing log row
#[derive(Debug, Clone, PartialEq)]
pub struct PrescriptionLogRecord {
    pub id: i64,
    pub dispense_ref: String,
    pub member_username: String,
    pub product_code: String,
    pub quantity: f64,
    pub dispensed_at: DateTime<Utc>,
}

/// Prescription log persistence operations
#[async_trait]
pub trait PrescriptionRepository: Send + Sync {
    /// Check whether a dispensing log with this reference exists
    async fn exists_by_ref(&self, dispense_ref: &str) -> RepositoryResult<bool>;

    /// Insert a dispensing log entry
    async fn insert_log(
        &self,
        log: &NewPrescriptionLog,
    ) -> RepositoryResult<PrescriptionLogRecord>;
}

/// PostgreSQL implementation of PrescriptionRepository
pub struct PgPrescriptionRepository {
    pool: DbPool,
    retry: RetryConfig,
}

impl PgPrescriptionRepository {
    /// Create a new PostgreSQL prescription repository
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            retry: RetryConfig::default(),
        }
    }

    /// Create with custom retry configuration
    pub fn with_retry_config(pool: DbPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    fn row_to_log(row: &sqlx::postgres::PgRow) -> RepositoryResult<PrescriptionLogRecord> {
        Ok(PrescriptionLogRecord {
            id: row.try_get("log_id")?,
            dispense_ref: row.try_get("dispense_ref")?,
            member_username: row.try_get("member_username")?,
            product_code: row.try_get("product_code")?,
            quantity: row.try_get("quantity")?,
            dispensed_at: row.try_get("dispensed_at")?,
        })
    }
}

#[async_trait]
impl PrescriptionRepository for PgPrescriptionRepository {
    async fn exists_by_ref(&self, dispense_ref: &str) -> RepositoryResult<bool> {
        with_retry(&self.retry, || async {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM prescription_logs WHERE dispense_ref = $1)",
            )
            .bind(dispense_ref)
            .fetch_one(&self.pool)
            .await?;

            Ok(exists)
        })
        .await
    }

    async fn insert_log(
        &self,
        log: &NewPrescriptionLog,
    ) -> RepositoryResult<PrescriptionLogRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO prescription_logs
                (dispense_ref, member_username, product_code, quantity, dispensed_at)
            VALUES ($1, $2, $3, $4, COALESCE($5, now()))
            RETURNING log_id, dispense_ref, member_username, product_code, quantity, dispensed_at
            "#,
        )
        .bind(&log.dispense_ref)
        .bind(&log.member_username)
        .bind(&log.product_code)
        .bind(log.quantity)
        .bind(log.dispensed_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_log(&row)
    }
}

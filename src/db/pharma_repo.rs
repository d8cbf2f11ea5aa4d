//! Pharma label-detail repository for pharmstream
//!
//! One details row per product code; upsert keeps replays harmless.

use async_trait::async_trait;

use crate::db::repository::{with_retry, RepositoryResult, RetryConfig};
use crate::db::DbPool;
use crate::models::PharmaDetails;

/// Pharma detail persistence operations used by the pharma event handler
#[async_trait]
pub trait PharmaRepository: Send + Sync {
    /// Check whether details exist for a product code
    async fn exists(&self, product_code: &str) -> RepositoryResult<bool>;

    /// Create or replace the details for a product code
    async fn upsert(&self, product_code: &str, details: &PharmaDetails) -> RepositoryResult<()>;

    /// Delete the details for a product code; returns false when no row matched
    async fn delete(&self, product_code: &str) -> RepositoryResult<bool>;
}

/// PostgreSQL implementation of PharmaRepository
pub struct PgPharmaRepository {
    pool: DbPool,
    retry: RetryConfig,
}

impl PgPharmaRepository {
    /// Create a new PostgreSQL pharma repository
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
}

#[async_trait]
impl PharmaRepository for PgPharmaRepository {
    async fn exists(&self, product_code: &str) -> RepositoryResult<bool> {
        with_retry(&self.retry, || async {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM product_pharma WHERE product_code = $1)",
            )
            .bind(product_code)
            .fetch_one(&self.pool)
            .await?;

            Ok(exists)
        })
        .await
    }

    async fn upsert(&self, product_code: &str, details: &PharmaDetails) -> RepositoryResult<()> {
        with_retry(&self.retry, || async {
            sqlx::query(
                r#"
                INSERT INTO product_pharma (product_code, indications, dosage, warnings, storage)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (product_code) DO UPDATE SET
                    indications = EXCLUDED.indications,
                    dosage = EXCLUDED.dosage,
                    warnings = EXCLUDED.warnings,
                    storage = EXCLUDED.storage,
                    updated_at = now()
                "#,
            )
            .bind(product_code)
            .bind(&details.indications)
            .bind(&details.dosage)
            .bind(&details.warnings)
            .bind(&details.storage)
            .execute(&self.pool)
            .await?;

            Ok(())
        })
        .await
    }

    async fn delete(&self, product_code: &str) -> RepositoryResult<bool> {
        with_retry(&self.retry, || async {
            let result = sqlx::query("DELETE FROM product_pharma WHERE product_code = $1")
                .bind(product_code)
                .execute(&self.pool)
                .await?;

            Ok(result.rows_affected() > 0)
        })
        .await
    }
}

//! Product repository for pharmstream
//!
//! The product code is the natural key; the unique constraint on it is the
//! durable backstop against duplicate creation across the two instances.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::db::repository::{with_retry, RepositoryError, RepositoryResult, RetryConfig};
use crate::db::DbPool;
use crate::models::{NewProduct, PharmaDetails, ProductPatch};

/// A persisted product row
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub generic_name: Option<String>,
    pub unit: Option<String>,
    pub price: Option<f64>,
    pub stock: f64,
    pub updated_at: DateTime<Utc>,
}

/// Product persistence operations used by the product event handler
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Look up a product by its natural key
    async fn find_by_code(&self, code: &str) -> RepositoryResult<Option<ProductRecord>>;

    /// Insert a product and, when present, its pharma details in one transaction
    async fn insert_with_pharma(
        &self,
        product: &NewProduct,
        pharma: Option<&PharmaDetails>,
    ) -> RepositoryResult<ProductRecord>;

    /// Apply a partial update to a product resolved to its internal id
    async fn update(
        &self,
        id: i64,
        patch: &ProductPatch,
        pharma: Option<&PharmaDetails>,
    ) -> RepositoryResult<ProductRecord>;

    /// Set the absolute stock level of a product
    async fn set_stock(&self, code: &str, stock: f64) -> RepositoryResult<()>;

    /// Delete a product; returns false when no row matched
    async fn delete_by_code(&self, code: &str) -> RepositoryResult<bool>;
}

/// PostgreSQL implementation of ProductRepository
pub struct PgProductRepository {
    pool: DbPool,
    retry: RetryConfig,
}

impl PgProductRepository {
    /// Create a new PostgreSQL product repository
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

    fn row_to_product(row: &sqlx::postgres::PgRow) -> RepositoryResult<ProductRecord> {
        Ok(ProductRecord {
            id: row.try_get("product_id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            generic_name: row.try_get("generic_name")?,
            unit: row.try_get("unit")?,
            price: row.try_get("price")?,
            stock: row.try_get("stock")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const PRODUCT_COLUMNS: &str =
    "product_id, code, name, generic_name, unit, price, stock, updated_at";

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn find_by_code(&self, code: &str) -> RepositoryResult<Option<ProductRecord>> {
        with_retry(&self.retry, || async {
            let row = sqlx::query(&format!(
                "SELECT {} FROM products WHERE code = $1",
                PRODUCT_COLUMNS
            ))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => Ok(Some(Self::row_to_product(&row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn insert_with_pharma(
        &self,
        product: &NewProduct,
        pharma: Option<&PharmaDetails>,
    ) -> RepositoryResult<ProductRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (code, name, generic_name, unit, price, stock)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&product.code)
        .bind(&product.name)
        .bind(&product.generic_name)
        .bind(&product.unit)
        .bind(product.price)
        .bind(product.stock.unwrap_or(0.0))
        .fetch_one(&mut *tx)
        .await?;

        if let Some(pharma) = pharma {
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
            .bind(&product.code)
            .bind(&pharma.indications)
            .bind(&pharma.dosage)
            .bind(&pharma.warnings)
            .bind(&pharma.storage)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Transaction(e.to_string()))?;

        Self::row_to_product(&row)
    }

    async fn update(
        &self,
        id: i64,
        patch: &ProductPatch,
        pharma: Option<&PharmaDetails>,
    ) -> RepositoryResult<ProductRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE products SET
                name = COALESCE($1, name),
                generic_name = COALESCE($2, generic_name),
                unit = COALESCE($3, unit),
                price = COALESCE($4, price),
                updated_at = now()
            WHERE product_id = $5
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&patch.name)
        .bind(&patch.generic_name)
        .bind(&patch.unit)
        .bind(patch.price)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = row.ok_or_else(|| RepositoryError::NotFound(format!("product id {}", id)))?;
        let record = Self::row_to_product(&row)?;

        if let Some(pharma) = pharma {
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
            .bind(&record.code)
            .bind(&pharma.indications)
            .bind(&pharma.dosage)
            .bind(&pharma.warnings)
            .bind(&pharma.storage)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Transaction(e.to_string()))?;

        Ok(record)
    }

    async fn set_stock(&self, code: &str, stock: f64) -> RepositoryResult<()> {
        with_retry(&self.retry, || async {
            let result = sqlx::query(
                "UPDATE products SET stock = $1, updated_at = now() WHERE code = $2",
            )
            .bind(stock)
            .bind(code)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound(format!("product {}", code)));
            }

            Ok(())
        })
        .await
    }

    async fn delete_by_code(&self, code: &str) -> RepositoryResult<bool> {
        with_retry(&self.retry, || async {
            let result = sqlx::query("DELETE FROM products WHERE code = $1")
                .bind(code)
                .execute(&self.pool)
                .await?;

            Ok(result.rows_affected() > 0)
        })
        .await
    }
}

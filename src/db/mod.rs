//! Database module for pharmstream
//!
//! This module provides database connectivity, connection pooling, and the
//! per-entity repositories the domain handlers mutate state through.

pub mod member_repo;
pub mod pharma_repo;
pub mod pool;
pub mod prescription_repo;
pub mod product_repo;
pub mod repository;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::migrate::Migrator;

// Re-export commonly used types
pub use member_repo::{MemberRecord, MemberRepository, PgMemberRepository};
pub use pharma_repo::{PgPharmaRepository, PharmaRepository};
pub use pool::{create_pool, DbPool};
pub use prescription_repo::{
    PgPrescriptionRepository, PrescriptionLogRecord, PrescriptionRepository,
};
pub use product_repo::{PgProductRepository, ProductRecord, ProductRepository};
pub use repository::{RepositoryError, RepositoryResult, RetryConfig};

use crate::dedup::{EntityKind, NaturalKeyIndex};

/// Database migrator for running schema migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// The domain repositories shared by all handlers
#[derive(Clone)]
pub struct Stores {
    pub products: Arc<dyn ProductRepository>,
    pub members: Arc<dyn MemberRepository>,
    pub pharma: Arc<dyn PharmaRepository>,
    pub prescriptions: Arc<dyn PrescriptionRepository>,
}

impl Stores {
    /// Wire all repositories against one PostgreSQL pool
    pub fn postgres(pool: DbPool) -> Self {
        Self::postgres_with_retry(pool, RetryConfig::default())
    }

    /// Wire all repositories with a shared retry configuration
    pub fn postgres_with_retry(pool: DbPool, retry: RetryConfig) -> Self {
        Self {
            products: Arc::new(PgProductRepository::with_retry_config(
                pool.clone(),
                retry.clone(),
            )),
            members: Arc::new(PgMemberRepository::with_retry_config(pool.clone(), retry.clone())),
            pharma: Arc::new(PgPharmaRepository::with_retry_config(pool.clone(), retry.clone())),
            prescriptions: Arc::new(PgPrescriptionRepository::with_retry_config(pool, retry)),
        }
    }
}

/// The stores are the durable side of the idempotency guard: a natural key
/// resolves to whichever repository owns that entity family.
#[async_trait]
impl NaturalKeyIndex for Stores {
    async fn exists(&self, kind: EntityKind, natural_key: &str) -> RepositoryResult<bool> {
        match kind {
            EntityKind::Product => Ok(self.products.find_by_code(natural_key).await?.is_some()),
            EntityKind::Member => Ok(self.members.find_by_username(natural_key).await?.is_some()),
            EntityKind::Pharma => self.pharma.exists(natural_key).await,
            EntityKind::PrescriptionLog => self.prescriptions.exists_by_ref(natural_key).await,
        }
    }
}

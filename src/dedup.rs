//! Idempotency guard for pharmstream
//!
//! Repeated delivery of the same logical event must be a safe no-op. Two
//! layers provide that: a bounded, insertion-ordered cache of recently
//! processed message ids (the fast path, process-local and volatile), and a
//! durable natural-key existence check against the domain store (the source
//! of truth, backed by unique constraints). The cache only saves redundant
//! database round-trips; its eviction never affects correctness.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::repository::RepositoryResult;

/// Entity families the durable existence check can resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Product,
    Member,
    Pharma,
    PrescriptionLog,
}

/// Durable natural-key lookup against the domain store
#[async_trait]
pub trait NaturalKeyIndex: Send + Sync {
    /// Whether an entity of this kind with this natural key is persisted
    async fn exists(&self, kind: EntityKind, natural_key: &str) -> RepositoryResult<bool>;
}

/// Metadata kept for a processed message
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub key: Option<String>,
    pub event_type: Option<String>,
    pub role: String,
}

struct CacheInner {
    entries: HashMap<String, ProcessedRecord>,
    // Insertion order for oldest-first eviction
    order: VecDeque<String>,
}

/// Process-local duplicate suppression plus the durable existence check
pub struct IdempotencyGuard {
    capacity: usize,
    cache: Mutex<CacheInner>,
    index: Arc<dyn NaturalKeyIndex>,
}

impl IdempotencyGuard {
    /// Create a guard with a fixed cache capacity
    pub fn new(capacity: usize, index: Arc<dyn NaturalKeyIndex>) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            index,
        }
    }

    /// Whether this message id should be processed
    ///
    /// Returns false when the id is already in the cache. A true result is
    /// not a claim that the message was never processed; the caller still
    /// runs the durable check for create operations.
    pub fn should_process(&self, message_id: &str) -> bool {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        !cache.entries.contains_key(message_id)
    }

    /// Record a message as processed (success or explicit skip)
    pub fn mark_processed(&self, message_id: &str, record: ProcessedRecord) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());

        if cache.entries.insert(message_id.to_string(), record).is_none() {
            cache.order.push_back(message_id.to_string());
        }

        // Evict oldest-inserted entries once over capacity
        while cache.order.len() > self.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.entries.remove(&oldest);
            }
        }
    }

    /// Number of cached message ids
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured cache capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Durable natural-key existence check against the domain store
    pub async fn exists_by_natural_key(
        &self,
        kind: EntityKind,
        natural_key: &str,
    ) -> RepositoryResult<bool> {
        self.index.exists(kind, natural_key).await
    }
}

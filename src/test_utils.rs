//! Test utilities for pharmstream
//!
//! In-memory repository implementations, a recording publisher, and
//! envelope builders used by unit and integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::db::{
    MemberRecord, MemberRepository, PharmaRepository, PrescriptionLogRecord,
    PrescriptionRepository, ProductRecord, ProductRepository, RepositoryError, RepositoryResult,
    Stores,
};
use crate::error::{Error, Result};
use crate::kafka::{MessageEnvelope, MessagePublisher};
use crate::models::{MemberPatch, NewMember, NewPrescriptionLog, NewProduct, PharmaDetails, ProductPatch};

fn conflict(key: &str) -> RepositoryError {
    RepositoryError::Conflict(format!("duplicate key value violates unique constraint: {}", key))
}

/// Failure injection shared by the in-memory repositories
#[derive(Default)]
struct FailSwitch {
    fail_next: Mutex<Option<String>>,
}

impl FailSwitch {
    fn arm(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    fn check(&self) -> RepositoryResult<()> {
        if let Some(msg) = self.fail_next.lock().unwrap().take() {
            return Err(RepositoryError::QueryExecution(msg));
        }
        Ok(())
    }
}

/// In-memory implementation of ProductRepository
#[derive(Default)]
pub struct MemProductRepository {
    products: Mutex<Vec<ProductRecord>>,
    pharma: Mutex<HashMap<String, PharmaDetails>>,
    next_id: Mutex<i64>,
    fail: FailSwitch,
}

impl MemProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the repository to fail on the next operation
    pub fn fail_next_operation(&self, message: &str) {
        self.fail.arm(message);
    }

    /// Get all stored products
    pub fn all(&self) -> Vec<ProductRecord> {
        self.products.lock().unwrap().clone()
    }

    fn allocate_id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }
}

#[async_trait]
impl ProductRepository for MemProductRepository {
    async fn find_by_code(&self, code: &str) -> RepositoryResult<Option<ProductRecord>> {
        self.fail.check()?;
        let products = self.products.lock().unwrap();
        Ok(products.iter().find(|p| p.code == code).cloned())
    }

    async fn insert_with_pharma(
        &self,
        product: &NewProduct,
        pharma: Option<&PharmaDetails>,
    ) -> RepositoryResult<ProductRecord> {
        self.fail.check()?;
        let mut products = self.products.lock().unwrap();

        // Unique constraint on the natural key
        if products.iter().any(|p| p.code == product.code) {
            return Err(conflict(&product.code));
        }

        let record = ProductRecord {
            id: self.allocate_id(),
            code: product.code.clone(),
            name: product.name.clone(),
            generic_name: product.generic_name.clone(),
            unit: product.unit.clone(),
            price: product.price,
            stock: product.stock.unwrap_or(0.0),
            updated_at: Utc::now(),
        };
        products.push(record.clone());

        if let Some(details) = pharma {
            self.pharma
                .lock()
                .unwrap()
                .insert(product.code.clone(), details.clone());
        }

        Ok(record)
    }

    async fn update(
        &self,
        id: i64,
        patch: &ProductPatch,
        pharma: Option<&PharmaDetails>,
    ) -> RepositoryResult<ProductRecord> {
        self.fail.check()?;
        let mut products = self.products.lock().unwrap();

        let record = products
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("product id {}", id)))?;

        if let Some(name) = &patch.name {
            record.name = name.clone();
        }
        if let Some(generic_name) = &patch.generic_name {
            record.generic_name = Some(generic_name.clone());
        }
        if let Some(unit) = &patch.unit {
            record.unit = Some(unit.clone());
        }
        if let Some(price) = patch.price {
            record.price = Some(price);
        }
        record.updated_at = Utc::now();

        let record = record.clone();

        if let Some(details) = pharma {
            self.pharma.lock().unwrap().insert(record.code.clone(), details.clone());
        }

        Ok(record)
    }

    async fn set_stock(&self, code: &str, stock: f64) -> RepositoryResult<()> {
        self.fail.check()?;
        let mut products = self.products.lock().unwrap();

        let record = products
            .iter_mut()
            .find(|p| p.code == code)
            .ok_or_else(|| RepositoryError::NotFound(format!("product {}", code)))?;

        record.stock = stock;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_by_code(&self, code: &str) -> RepositoryResult<bool> {
        self.fail.check()?;
        let mut products = self.products.lock().unwrap();
        let initial_len = products.len();
        products.retain(|p| p.code != code);
        Ok(products.len() < initial_len)
    }
}

/// In-memory implementation of MemberRepository
#[derive(Default)]
pub struct MemMemberRepository {
    members: Mutex<Vec<MemberRecord>>,
    next_id: Mutex<i64>,
    fail: FailSwitch,
}

impl MemMemberRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_operation(&self, message: &str) {
        self.fail.arm(message);
    }

    pub fn all(&self) -> Vec<MemberRecord> {
        self.members.lock().unwrap().clone()
    }
}

#[async_trait]
impl MemberRepository for MemMemberRepository {
    async fn find_by_username(&self, username: &str) -> RepositoryResult<Option<MemberRecord>> {
        self.fail.check()?;
        let members = self.members.lock().unwrap();
        Ok(members.iter().find(|m| m.username == username).cloned())
    }

    async fn insert(&self, member: &NewMember) -> RepositoryResult<MemberRecord> {
        self.fail.check()?;
        let mut members = self.members.lock().unwrap();

        if members.iter().any(|m| m.username == member.username) {
            return Err(conflict(&member.username));
        }

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };

        let record = MemberRecord {
            id,
            username: member.username.clone(),
            site_name: member.site_name.clone(),
            license: member.license.clone(),
            province: member.province.clone(),
            member_type: member.member_type.unwrap_or(1),
        };
        members.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: i64, patch: &MemberPatch) -> RepositoryResult<MemberRecord> {
        self.fail.check()?;
        let mut members = self.members.lock().unwrap();

        let record = members
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("member id {}", id)))?;

        if let Some(site_name) = &patch.site_name {
            record.site_name = site_name.clone();
        }
        if let Some(license) = &patch.license {
            record.license = Some(license.clone());
        }
        if let Some(province) = &patch.province {
            record.province = Some(province.clone());
        }
        if let Some(member_type) = patch.member_type {
            record.member_type = member_type;
        }

        Ok(record.clone())
    }

    async fn delete_by_username(&self, username: &str) -> RepositoryResult<bool> {
        self.fail.check()?;
        let mut members = self.members.lock().unwrap();
        let initial_len = members.len();
        members.retain(|m| m.username != username);
        Ok(members.len() < initial_len)
    }
}

/// In-memory implementation of PharmaRepository
#[derive(Default)]
pub struct MemPharmaRepository {
    details: Mutex<HashMap<String, PharmaDetails>>,
}

impl MemPharmaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PharmaRepository for MemPharmaRepository {
    async fn exists(&self, product_code: &str) -> RepositoryResult<bool> {
        Ok(self.details.lock().unwrap().contains_key(product_code))
    }

    async fn upsert(&self, product_code: &str, details: &PharmaDetails) -> RepositoryResult<()> {
        self.details
            .lock()
            .unwrap()
            .insert(product_code.to_string(), details.clone());
        Ok(())
    }

    async fn delete(&self, product_code: &str) -> RepositoryResult<bool> {
        Ok(self.details.lock().unwrap().remove(product_code).is_some())
    }
}

/// In-memory implementation of PrescriptionRepository
#[derive(Default)]
pub struct MemPrescriptionRepository {
    logs: Mutex<Vec<PrescriptionLogRecord>>,
    next_id: Mutex<i64>,
}

impl MemPrescriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<PrescriptionLogRecord> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrescriptionRepository for MemPrescriptionRepository {
    async fn exists_by_ref(&self, dispense_ref: &str) -> RepositoryResult<bool> {
        let logs = self.logs.lock().unwrap();
        Ok(logs.iter().any(|l| l.dispense_ref == dispense_ref))
    }

    async fn insert_log(
        &self,
        log: &NewPrescriptionLog,
    ) -> RepositoryResult<PrescriptionLogRecord> {
        let mut logs = self.logs.lock().unwrap();

        if logs.iter().any(|l| l.dispense_ref == log.dispense_ref) {
            return Err(conflict(&log.dispense_ref));
        }

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };

        let record = PrescriptionLogRecord {
            id,
            dispense_ref: log.dispense_ref.clone(),
            member_username: log.member_username.clone(),
            product_code: log.product_code.clone(),
            quantity: log.quantity,
            dispensed_at: log.dispensed_at.unwrap_or_else(Utc::now),
        };
        logs.push(record.clone());
        Ok(record)
    }
}

/// The in-memory repositories bundled for wiring a test router
pub struct MemStores {
    pub products: Arc<MemProductRepository>,
    pub members: Arc<MemMemberRepository>,
    pub pharma: Arc<MemPharmaRepository>,
    pub prescriptions: Arc<MemPrescriptionRepository>,
}

impl Default for MemStores {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStores {
    pub fn new() -> Self {
        Self {
            products: Arc::new(MemProductRepository::new()),
            members: Arc::new(MemMemberRepository::new()),
            pharma: Arc::new(MemPharmaRepository::new()),
            prescriptions: Arc::new(MemPrescriptionRepository::new()),
        }
    }

    /// Build the Stores handle the router and guard consume
    pub fn stores(&self) -> Stores {
        Stores {
            products: self.products.clone(),
            members: self.members.clone(),
            pharma: self.pharma.clone(),
            prescriptions: self.prescriptions.clone(),
        }
    }
}

/// Publisher that records every publish instead of talking to a broker
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedMessage>>,
    fail: Mutex<bool>,
}

/// One recorded publish
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub key: Option<String>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all subsequent publishes fail
    pub fn fail_publishes(&self) {
        *self.fail.lock().unwrap() = true;
    }

    /// Get all recorded publishes
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        key: Option<&str>,
    ) -> Result<(i32, i64)> {
        if *self.fail.lock().unwrap() {
            return Err(Error::kafka("broker unavailable"));
        }

        let mut published = self.published.lock().unwrap();
        published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            key: key.map(String::from),
        });
        Ok((0, published.len() as i64 - 1))
    }
}

/// Build a delivered-message envelope for tests
pub fn envelope(topic: &str, partition: i32, offset: i64, key: &str, payload: &str) -> MessageEnvelope {
    MessageEnvelope {
        topic: topic.to_string(),
        partition,
        offset,
        key: Some(key.to_string()),
        payload: payload.to_string(),
        headers: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mem_product_repository_unique_constraint() {
        let repo = MemProductRepository::new();
        let product = NewProduct {
            code: "P100".to_string(),
            name: "Aspirin".to_string(),
            generic_name: None,
            unit: None,
            price: Some(25.0),
            stock: Some(10.0),
        };

        repo.insert_with_pharma(&product, None).await.unwrap();
        let err = repo.insert_with_pharma(&product, None).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.all().len(), 1);
    }

    #[tokio::test]
    async fn test_mem_repository_failure_injection() {
        let repo = MemProductRepository::new();
        repo.fail_next_operation("injected");

        let err = repo.find_by_code("P100").await.unwrap_err();
        assert!(!err.is_conflict());

        // Recovers after one failure
        assert!(repo.find_by_code("P100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recording_publisher() {
        let publisher = RecordingPublisher::new();
        publisher.publish("dead-letter-queue", b"{}", Some("0-1")).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "dead-letter-queue");

        publisher.fail_publishes();
        assert!(publisher.publish("dead-letter-queue", b"{}", None).await.is_err());
    }
}

//! Domain event model for pharmstream
//!
//! Every domain topic carries the same envelope shape on the wire:
//! `{eventType, data, source, timestamp}`. Each topic has its own closed
//! event enum so dispatch is an exhaustive match; adding an event type is a
//! compile-time-checked change rather than a string fallthrough.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Topics this system consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Product catalogue events
    Product,
    /// Member (pharmacy site) events
    Member,
    /// Prescription dispensing events
    Prescription,
    /// Pharma label-detail events
    Pharma,
    /// Dead letter inspection topic
    DeadLetter,
}

impl Topic {
    /// Resolve a wire topic name; unknown names are handled at the boundary
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "product-events" => Some(Topic::Product),
            "member-events" => Some(Topic::Member),
            "prescription-events" => Some(Topic::Prescription),
            "pharma-events" => Some(Topic::Pharma),
            "dead-letter-queue" => Some(Topic::DeadLetter),
            _ => None,
        }
    }

    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Product => "product-events",
            Topic::Member => "member-events",
            Topic::Prescription => "prescription-events",
            Topic::Pharma => "pharma-events",
            Topic::DeadLetter => "dead-letter-queue",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wire envelope shared by all domain topics
///
/// The event enum is flattened so the JSON keeps the flat
/// `{eventType, data, source, timestamp}` shape producers emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<E> {
    /// Tagged event payload (`eventType` + `data`)
    #[serde(flatten)]
    pub event: E,

    /// Producing system (e.g. "webhook", "internal-api")
    #[serde(default)]
    pub source: Option<String>,

    /// Producer timestamp, epoch milliseconds
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl<E> DomainEvent<E> {
    /// Source label for logging
    pub fn source_label(&self) -> &str {
        self.source.as_deref().unwrap_or("unknown")
    }
}

// ---------------------------------------------------------------------------
// product-events
// ---------------------------------------------------------------------------

/// Events on the product-events topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum ProductEvent {
    /// Create a product together with its pharma label details
    #[serde(rename = "ADD_WITH_PHARMA")]
    AddWithPharma(ProductWithPharma),

    /// Update a product and optionally its pharma label details
    #[serde(rename = "UPDATE_WITH_PHARMA")]
    UpdateWithPharma(ProductUpdate),

    /// Remove a product
    #[serde(rename = "DELETE")]
    Delete(ProductRef),

    /// Set the stock level of a single product
    #[serde(rename = "STOCK_UPDATE")]
    StockUpdate(StockUpdate),

    /// Set the stock level of a batch of products
    #[serde(rename = "BULK_STOCK_UPDATE")]
    BulkStockUpdate(BulkStockUpdate),
}

impl ProductEvent {
    /// Event type tag as it appears on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::AddWithPharma(_) => "ADD_WITH_PHARMA",
            ProductEvent::UpdateWithPharma(_) => "UPDATE_WITH_PHARMA",
            ProductEvent::Delete(_) => "DELETE",
            ProductEvent::StockUpdate(_) => "STOCK_UPDATE",
            ProductEvent::BulkStockUpdate(_) => "BULK_STOCK_UPDATE",
        }
    }
}

/// New product payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    /// Natural key of the product
    #[validate(length(min = 1))]
    pub code: String,

    /// Display name
    #[validate(length(min = 1))]
    pub name: String,

    /// Generic (non-brand) name
    pub generic_name: Option<String>,

    /// Dispensing unit
    pub unit: Option<String>,

    /// Unit price
    pub price: Option<f64>,

    /// Initial stock level
    pub stock: Option<f64>,
}

/// Pharma label details attached to a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PharmaDetails {
    /// What the drug is indicated for
    pub indications: Option<String>,

    /// Dosage instructions
    pub dosage: Option<String>,

    /// Warnings printed on the label
    pub warnings: Option<String>,

    /// Storage instructions
    pub storage: Option<String>,
}

/// ADD_WITH_PHARMA payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductWithPharma {
    /// Product fields
    pub product: NewProduct,

    /// Optional pharma label details
    #[serde(default)]
    pub pharma: Option<PharmaDetails>,
}

/// Partial product update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub generic_name: Option<String>,
    pub unit: Option<String>,
    pub price: Option<f64>,
}

/// UPDATE_WITH_PHARMA payload, addressed by natural key
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProductUpdate {
    /// Natural key of the product to update
    #[validate(length(min = 1))]
    pub code: String,

    /// Fields to change
    #[serde(default)]
    pub product: ProductPatch,

    /// Optional pharma label details to upsert alongside
    #[serde(default)]
    pub pharma: Option<PharmaDetails>,
}

/// Reference to a product by natural key
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProductRef {
    #[validate(length(min = 1))]
    pub code: String,
}

/// STOCK_UPDATE payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StockUpdate {
    /// Natural key of the product
    #[validate(length(min = 1))]
    pub code: String,

    /// Absolute stock level
    #[validate(range(min = 0.0))]
    pub stock: f64,
}

/// BULK_STOCK_UPDATE payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkStockUpdate {
    /// Producer-assigned batch identifier
    pub batch_id: String,

    /// Per-product stock levels
    pub items: Vec<StockUpdate>,
}

// ---------------------------------------------------------------------------
// member-events
// ---------------------------------------------------------------------------

/// Events on the member-events topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum MemberEvent {
    /// Register a member
    #[serde(rename = "ADD")]
    Add(NewMember),

    /// Update a member
    #[serde(rename = "UPDATE")]
    Update(MemberUpdate),

    /// Remove a member
    #[serde(rename = "DELETE")]
    Delete(MemberRef),
}

impl MemberEvent {
    /// Event type tag as it appears on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            MemberEvent::Add(_) => "ADD",
            MemberEvent::Update(_) => "UPDATE",
            MemberEvent::Delete(_) => "DELETE",
        }
    }
}

/// New member payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewMember {
    /// Natural key of the member
    #[validate(length(min = 1))]
    pub username: String,

    /// Pharmacy site name
    #[validate(length(min = 1))]
    pub site_name: String,

    /// Pharmacist license number
    pub license: Option<String>,

    /// Province the site operates in
    pub province: Option<String>,

    /// Member type code
    pub member_type: Option<i32>,
}

/// Partial member update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberPatch {
    pub site_name: Option<String>,
    pub license: Option<String>,
    pub province: Option<String>,
    pub member_type: Option<i32>,
}

/// UPDATE payload, addressed by natural key
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MemberUpdate {
    /// Natural key of the member to update
    #[validate(length(min = 1))]
    pub username: String,

    /// Fields to change
    #[serde(default)]
    pub member: MemberPatch,
}

/// Reference to a member by natural key
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MemberRef {
    #[validate(length(min = 1))]
    pub username: String,
}

// ---------------------------------------------------------------------------
// prescription-events
// ---------------------------------------------------------------------------

/// Events on the prescription-events topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum PrescriptionEvent {
    /// Record a dispensing log entry
    #[serde(rename = "ADD")]
    Add(NewPrescriptionLog),
}

impl PrescriptionEvent {
    /// Event type tag as it appears on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            PrescriptionEvent::Add(_) => "ADD",
        }
    }
}

/// New dispensing log entry
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPrescriptionLog {
    /// Natural key of the dispensing event
    #[validate(length(min = 1))]
    pub dispense_ref: String,

    /// Member that dispensed
    #[validate(length(min = 1))]
    pub member_username: String,

    /// Product that was dispensed
    #[validate(length(min = 1))]
    pub product_code: String,

    /// Dispensed quantity
    #[validate(range(min = 0.0))]
    pub quantity: f64,

    /// When the dispensing happened, epoch milliseconds
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub dispensed_at: Option<chrono::DateTime<chrono::Utc>>,
}

// ---------------------------------------------------------------------------
// pharma-events
// ---------------------------------------------------------------------------

/// Events on the pharma-events topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum PharmaEvent {
    /// Create or replace the pharma label details of a product
    #[serde(rename = "UPSERT")]
    Upsert(PharmaUpsert),

    /// Remove the pharma label details of a product
    #[serde(rename = "DELETE")]
    Delete(ProductRef),
}

impl PharmaEvent {
    /// Event type tag as it appears on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            PharmaEvent::Upsert(_) => "UPSERT",
            PharmaEvent::Delete(_) => "DELETE",
        }
    }
}

/// UPSERT payload for pharma label details
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PharmaUpsert {
    /// Product the details belong to
    #[validate(length(min = 1))]
    pub product_code: String,

    /// The label details
    pub pharma: PharmaDetails,
}

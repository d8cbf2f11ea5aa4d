//! Data models for pharmstream
//!
//! This module contains the domain event model consumed from the message
//! topics: the per-topic event enums, their payload structures, and the
//! topic catalogue.

pub mod event;

// Re-export commonly used types
pub use event::{
    BulkStockUpdate, DomainEvent, MemberEvent, MemberPatch, MemberRef, MemberUpdate, NewMember,
    NewPrescriptionLog, NewProduct, PharmaDetails, PharmaEvent, PharmaUpsert, PrescriptionEvent,
    ProductEvent, ProductPatch, ProductRef, ProductUpdate, ProductWithPharma, StockUpdate, Topic,
};

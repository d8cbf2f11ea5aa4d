//! Pharma event handling
//!
//! Label details are keyed by product code and written as an upsert, so
//! replays and cross-instance races converge on the same row.

use tracing::info;
use validator::Validate;

use super::{validation_error, HandlerOutcome};
use crate::db::Stores;
use crate::error::{Error, Result};
use crate::models::PharmaEvent;

pub(crate) async fn handle(stores: &Stores, event: PharmaEvent) -> Result<HandlerOutcome> {
    match event {
        PharmaEvent::Upsert(upsert) => {
            upsert.validate().map_err(|e| validation_error("pharma", e))?;

            stores.pharma.upsert(&upsert.product_code, &upsert.pharma).await?;
            info!(product_code = %upsert.product_code, "Pharma details upserted");
            Ok(HandlerOutcome::Processed)
        },

        PharmaEvent::Delete(reference) => {
            reference.validate().map_err(|e| validation_error("pharma", e))?;

            if stores.pharma.delete(&reference.code).await? {
                info!(product_code = %reference.code, "Pharma details deleted");
                Ok(HandlerOutcome::Processed)
            } else {
                Err(Error::not_found(format!("pharma details for {}", reference.code)))
            }
        },
    }
}

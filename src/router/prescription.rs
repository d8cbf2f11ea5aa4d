//! Prescription event handling
//!
//! Dispensing logs are append-only; the dispense reference makes replays a
//! no-op.

use tracing::{info, warn};
use validator::Validate;

use super::{validation_error, HandlerOutcome};
use crate::db::Stores;
use crate::dedup::{EntityKind, IdempotencyGuard};
use crate::error::Result;
use crate::models::PrescriptionEvent;

pub(crate) async fn handle(
    stores: &Stores,
    guard: &IdempotencyGuard,
    event: PrescriptionEvent,
) -> Result<HandlerOutcome> {
    match event {
        PrescriptionEvent::Add(log) => {
            log.validate().map_err(|e| validation_error("prescription", e))?;

            if guard
                .exists_by_natural_key(EntityKind::PrescriptionLog, &log.dispense_ref)
                .await?
            {
                warn!(
                    dispense_ref = %log.dispense_ref,
                    "Dispensing log already recorded, skipping"
                );
                return Ok(HandlerOutcome::SkippedExisting);
            }

            match stores.prescriptions.insert_log(&log).await {
                Ok(record) => {
                    info!(
                        dispense_ref = %record.dispense_ref,
                        member = %record.member_username,
                        product = %record.product_code,
                        "Dispensing log recorded"
                    );
                    Ok(HandlerOutcome::Processed)
                },
                Err(e) if e.is_conflict() => {
                    warn!(
                        dispense_ref = %log.dispense_ref,
                        "Dispensing log was recorded by the peer instance during processing"
                    );
                    Ok(HandlerOutcome::SkippedExisting)
                },
                Err(e) => Err(e.into()),
            }
        },
    }
}

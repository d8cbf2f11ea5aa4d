//! Product event handling
//!
//! Creates run the durable natural-key check first and treat a conflict as
//! success: during a failover window both instances may race on the same
//! create, and the loser must not report an error. Updates resolve the code
//! to the internal id and report a missing product as not found —
//! reprocessing will not make the entity appear.

use tracing::{info, warn};
use validator::Validate;

use super::{validation_error, HandlerOutcome};
use crate::db::Stores;
use crate::dedup::{EntityKind, IdempotencyGuard};
use crate::error::{Error, Result};
use crate::models::ProductEvent;

pub(crate) async fn handle(
    stores: &Stores,
    guard: &IdempotencyGuard,
    event: ProductEvent,
) -> Result<HandlerOutcome> {
    match event {
        ProductEvent::AddWithPharma(data) => {
            data.product
                .validate()
                .map_err(|e| validation_error("product", e))?;

            let code = data.product.code.clone();

            if guard.exists_by_natural_key(EntityKind::Product, &code).await? {
                warn!(code = %code, "Product already exists, skipping creation");
                return Ok(HandlerOutcome::SkippedExisting);
            }

            match stores
                .products
                .insert_with_pharma(&data.product, data.pharma.as_ref())
                .await
            {
                Ok(record) => {
                    info!(code = %record.code, name = %record.name, "Product created");
                    Ok(HandlerOutcome::Processed)
                },
                Err(e) if e.is_conflict() => {
                    warn!(
                        code = %code,
                        "Product was created by the peer instance during processing"
                    );
                    Ok(HandlerOutcome::SkippedExisting)
                },
                Err(e) => Err(e.into()),
            }
        },

        ProductEvent::UpdateWithPharma(update) => {
            update.validate().map_err(|e| validation_error("product", e))?;

            let existing = stores
                .products
                .find_by_code(&update.code)
                .await?
                .ok_or_else(|| Error::not_found(format!("product {}", update.code)))?;

            let record = stores
                .products
                .update(existing.id, &update.product, update.pharma.as_ref())
                .await?;

            info!(code = %record.code, "Product updated");
            Ok(HandlerOutcome::Processed)
        },

        ProductEvent::Delete(reference) => {
            reference.validate().map_err(|e| validation_error("product", e))?;

            if stores.products.delete_by_code(&reference.code).await? {
                info!(code = %reference.code, "Product deleted");
                Ok(HandlerOutcome::Processed)
            } else {
                Err(Error::not_found(format!("product {}", reference.code)))
            }
        },

        ProductEvent::StockUpdate(update) => {
            update.validate().map_err(|e| validation_error("stock", e))?;

            stores.products.set_stock(&update.code, update.stock).await?;
            info!(code = %update.code, stock = update.stock, "Stock updated");
            Ok(HandlerOutcome::Processed)
        },

        ProductEvent::BulkStockUpdate(batch) => {
            for item in &batch.items {
                item.validate().map_err(|e| validation_error("stock", e))?;

                match stores.products.set_stock(&item.code, item.stock).await {
                    Ok(()) => {},
                    Err(e) if e.is_not_found() => {
                        warn!(
                            code = %item.code,
                            batch_id = %batch.batch_id,
                            "Unknown product in bulk stock update, skipping item"
                        );
                    },
                    Err(e) => return Err(e.into()),
                }
            }

            info!(
                batch_id = %batch.batch_id,
                items = batch.items.len(),
                "Bulk stock update applied"
            );
            Ok(HandlerOutcome::Processed)
        },
    }
}

//! Member event handling
//!
//! The username is the natural key. Creates are idempotent through the
//! existence check plus conflict recovery; updates resolve username to the
//! internal id first and report a missing member as not found.

use tracing::{info, warn};
use validator::Validate;

use super::{validation_error, HandlerOutcome};
use crate::db::Stores;
use crate::dedup::{EntityKind, IdempotencyGuard};
use crate::error::{Error, Result};
use crate::models::MemberEvent;

pub(crate) async fn handle(
    stores: &Stores,
    guard: &IdempotencyGuard,
    event: MemberEvent,
) -> Result<HandlerOutcome> {
    match event {
        MemberEvent::Add(member) => {
            member.validate().map_err(|e| validation_error("member", e))?;

            if guard
                .exists_by_natural_key(EntityKind::Member, &member.username)
                .await?
            {
                warn!(username = %member.username, "Member already exists, skipping creation");
                return Ok(HandlerOutcome::SkippedExisting);
            }

            match stores.members.insert(&member).await {
                Ok(record) => {
                    info!(username = %record.username, site = %record.site_name, "Member created");
                    Ok(HandlerOutcome::Processed)
                },
                Err(e) if e.is_conflict() => {
                    warn!(
                        username = %member.username,
                        "Member was created by the peer instance during processing"
                    );
                    Ok(HandlerOutcome::SkippedExisting)
                },
                Err(e) => Err(e.into()),
            }
        },

        MemberEvent::Update(update) => {
            update.validate().map_err(|e| validation_error("member", e))?;

            // Controllers address members by internal id; resolve it first
            let existing = stores
                .members
                .find_by_username(&update.username)
                .await?
                .ok_or_else(|| Error::not_found(format!("member {}", update.username)))?;

            let record = stores.members.update(existing.id, &update.member).await?;
            info!(username = %record.username, "Member updated");
            Ok(HandlerOutcome::Processed)
        },

        MemberEvent::Delete(reference) => {
            reference.validate().map_err(|e| validation_error("member", e))?;

            if stores.members.delete_by_username(&reference.username).await? {
                info!(username = %reference.username, "Member deleted");
                Ok(HandlerOutcome::Processed)
            } else {
                Err(Error::not_found(format!("member {}", reference.username)))
            }
        },
    }
}

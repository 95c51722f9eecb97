//! Per-emoji, per-user reaction toggles.
//!
//! The merge itself is a pure function; the store's optimistic
//! transaction runs it against the freshest value until the write
//! sticks, which is what makes simultaneous toggles from different
//! clients safe.  No local cache: the message subscription observes the
//! committed value and re-renders from it.

use serde_json::Value;
use tracing::debug;

use parlor_shared::types::{MessageId, UserId};
use parlor_store::{path, StoreClient, StoreError};

/// One toggle step: add the actor if absent, remove them if present.
/// An emptied list becomes `None`: the emoji key is deleted outright,
/// never left as a tombstone.
pub fn apply_toggle(current: Option<Vec<UserId>>, actor: &UserId) -> Option<Vec<UserId>> {
    match current {
        None => Some(vec![actor.clone()]),
        Some(mut reactors) => {
            if let Some(pos) = reactors.iter().position(|u| u == actor) {
                reactors.remove(pos);
                if reactors.is_empty() {
                    None
                } else {
                    Some(reactors)
                }
            } else {
                reactors.push(actor.clone());
                Some(reactors)
            }
        }
    }
}

/// Toggle `actor`'s `emoji` reaction on a message, atomically against
/// all concurrent togglers.
pub async fn toggle_reaction(
    store: &StoreClient,
    message_id: &MessageId,
    emoji: &str,
    actor: &UserId,
) -> Result<(), StoreError> {
    let node = path::reaction(message_id, emoji);
    store
        .transact(&node, |current| {
            let reactors: Option<Vec<UserId>> =
                current.and_then(|value| serde_json::from_value(value).ok());
            apply_toggle(reactors, actor).map(|list| {
                Value::Array(list.into_iter().map(|u| Value::String(u.0)).collect())
            })
        })
        .await?;
    debug!(message_id = %message_id, emoji, actor = %actor, "reaction toggled");
    Ok(())
}

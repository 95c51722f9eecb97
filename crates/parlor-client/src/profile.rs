//! Profile updates: display name and avatar.
//!
//! The avatar upload and the identity write are sequential; a failure
//! at either step aborts the whole operation, so the user never sees a
//! half-applied profile, only the transient failure banner.

use bytes::Bytes;
use tokio::time::Duration;
use tracing::{error, info};

use parlor_auth::{AuthClient, AuthError, ProfileChange};
use parlor_shared::constants::{AVATARS_PATH, BANNER_DISMISS_SECS};
use parlor_shared::Identity;
use parlor_store::BlobClient;

use crate::error::{ClientError, Result};
use crate::events::{emit, ClientEvent, EventSender};

pub const PROFILE_UPDATED: &str = "Profile updated successfully!";
pub const PROFILE_UPDATE_FAILED: &str = "Failed to update profile.";

/// A new avatar image to upload before the identity write.
#[derive(Debug, Clone)]
pub struct AvatarUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Requested profile changes.  `display_name: None` leaves the name
/// alone; no avatar keeps the current photo URL.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar: Option<AvatarUpload>,
}

/// Apply a profile update for the signed-in user and show the outcome
/// as a transient banner.
pub async fn update_profile(
    auth: &AuthClient,
    blobs: &BlobClient,
    update: ProfileUpdate,
    events: &EventSender,
) -> Result<Identity> {
    let result = apply(auth, blobs, update).await;
    match &result {
        Ok(identity) => {
            info!(uid = %identity.uid, "profile updated");
            show_banner(events, PROFILE_UPDATED);
        }
        Err(e) => {
            error!(error = %e, "profile update failed");
            show_banner(events, PROFILE_UPDATE_FAILED);
        }
    }
    result
}

async fn apply(
    auth: &AuthClient,
    blobs: &BlobClient,
    update: ProfileUpdate,
) -> Result<Identity> {
    let current = auth
        .current_identity()
        .ok_or(ClientError::Auth(AuthError::NotSignedIn))?;

    // Upload first: no identity write happens unless the avatar made it
    // all the way to a public URL.
    let photo_url = match update.avatar {
        Some(avatar) => {
            let blob_path = format!("{AVATARS_PATH}/{}/{}", current.uid, avatar.file_name);
            let handle = blobs.upload(&blob_path, avatar.bytes).await?;
            Some(blobs.public_url(&handle).await?)
        }
        None => current.photo_url.clone(),
    };

    let identity = auth
        .update_profile(ProfileChange {
            display_name: update.display_name,
            photo_url,
        })
        .await?;
    Ok(identity)
}

/// Show a banner and schedule it away after the fixed display window.
fn show_banner(events: &EventSender, text: &str) {
    emit(events, ClientEvent::Banner(text.to_string()));
    let events = events.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(BANNER_DISMISS_SECS)).await;
        emit(&events, ClientEvent::BannerCleared);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use parlor_auth::MemoryAuthBackend;
    use parlor_store::MemoryBlobBackend;

    #[tokio::test(start_paused = true)]
    async fn applies_name_and_avatar_then_banners() {
        let (auth, _handle) = MemoryAuthBackend::spawn();
        auth.sign_up("ada@example.com", "secret1").await.unwrap();
        let blobs = MemoryBlobBackend::spawn();
        let (events_tx, mut events_rx) = events::channel();

        let identity = update_profile(
            &auth,
            &blobs,
            ProfileUpdate {
                display_name: Some("Ada".into()),
                avatar: Some(AvatarUpload {
                    file_name: "me.png".into(),
                    bytes: Bytes::from_static(b"pngbytes"),
                }),
            },
            &events_tx,
        )
        .await
        .unwrap();

        assert_eq!(identity.display_name.as_deref(), Some("Ada"));
        let url = identity.photo_url.unwrap();
        assert!(url.contains("avatars/") && url.contains("me.png"));

        assert_eq!(
            events_rx.recv().await,
            Some(ClientEvent::Banner(PROFILE_UPDATED.into()))
        );
        assert_eq!(events_rx.recv().await, Some(ClientEvent::BannerCleared));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_upload_leaves_the_profile_untouched() {
        let (auth, _handle) = MemoryAuthBackend::spawn();
        auth.sign_up("ada@example.com", "secret1").await.unwrap();
        // Upload limit small enough that the avatar is rejected.
        let blobs = parlor_store::blobs::MemoryBlobBackend::spawn_with_limit(4);
        let (events_tx, mut events_rx) = events::channel();

        let result = update_profile(
            &auth,
            &blobs,
            ProfileUpdate {
                display_name: Some("Ada".into()),
                avatar: Some(AvatarUpload {
                    file_name: "huge.png".into(),
                    bytes: Bytes::from_static(b"way too large"),
                }),
            },
            &events_tx,
        )
        .await;
        assert!(result.is_err());

        // No partial apply: the display name write never happened.
        let identity = auth.current_identity().unwrap();
        assert_eq!(identity.display_name, None);
        assert_eq!(identity.photo_url, None);

        assert_eq!(
            events_rx.recv().await,
            Some(ClientEvent::Banner(PROFILE_UPDATE_FAILED.into()))
        );
        assert_eq!(events_rx.recv().await, Some(ClientEvent::BannerCleared));
    }

    #[tokio::test]
    async fn requires_a_signed_in_user() {
        let (auth, _handle) = MemoryAuthBackend::spawn();
        let blobs = MemoryBlobBackend::spawn();
        let (events_tx, _events_rx) = events::channel();

        let result = update_profile(&auth, &blobs, ProfileUpdate::default(), &events_tx).await;
        assert!(matches!(
            result,
            Err(ClientError::Auth(AuthError::NotSignedIn))
        ));
    }
}

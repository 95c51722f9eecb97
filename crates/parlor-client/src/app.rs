//! Top-level lifecycle orchestration.
//!
//! [`ChatApp`] owns the session and the per-identity components.  It is
//! the one place that enforces the teardown order the rest of the core
//! relies on: the previous identity's presence and message
//! subscriptions are fully released before anything is spawned for the
//! next one, so a new sign-in can never observe state addressed to the
//! old identity.

use tracing::info;

use parlor_auth::AuthClient;
use parlor_shared::types::{MessageId, UserId};
use parlor_shared::Identity;
use parlor_store::{BlobClient, StoreClient};

use crate::error::Result;
use crate::events::{self, EventReceiver, EventSender};
use crate::messages::MessageStream;
use crate::presence::PresenceTracker;
use crate::profile::{self, ProfileUpdate};
use crate::push::{self, PushClient};
use crate::reactions;
use crate::session::SessionManager;

/// Components alive for one signed-in identity.
pub struct ActiveSession {
    pub identity: Identity,
    pub presence: PresenceTracker,
    pub messages: MessageStream,
}

impl ActiveSession {
    /// Release everything, in order: the message subscription first,
    /// then presence (which writes offline before dropping its own
    /// subscription).
    async fn teardown(self) {
        self.messages.shutdown().await;
        self.presence.shutdown().await;
    }
}

/// The chat client core, wired to its external collaborators.
pub struct ChatApp {
    session: SessionManager,
    store: StoreClient,
    blobs: BlobClient,
    push: PushClient,
    events_tx: EventSender,
    active: Option<ActiveSession>,
}

impl ChatApp {
    /// Wire the core to its collaborators.  Returns the app plus the
    /// view-request event stream.  Call [`ChatApp::sync_session`] next:
    /// a session restored by the auth provider spawns its components
    /// there.
    pub fn new(
        store: StoreClient,
        auth: AuthClient,
        blobs: BlobClient,
        push: PushClient,
    ) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = events::channel();
        (
            Self {
                session: SessionManager::new(auth),
                store,
                blobs,
                push,
                events_tx,
                active: None,
            },
            events_rx,
        )
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// The components for the signed-in identity, if any.
    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    /// Bring the spawned components in line with the current identity.
    ///
    /// Idempotent.  On a change, the previous identity's components are
    /// torn down to completion before the new ones subscribe.
    pub async fn sync_session(&mut self) -> Result<()> {
        let current = self.session.current();
        if self.active.as_ref().map(|a| &a.identity) == current.as_ref() {
            return Ok(());
        }

        if let Some(active) = self.active.take() {
            info!(uid = %active.identity.uid, "tearing down session");
            active.teardown().await;
        }

        if let Some(identity) = current {
            info!(uid = %identity.uid, "starting session");
            let presence =
                PresenceTracker::spawn(self.store.clone(), identity.uid.clone()).await?;
            let messages = MessageStream::spawn(
                self.store.clone(),
                identity.clone(),
                self.events_tx.clone(),
            )
            .await?;

            // Best-effort, off the critical path.
            let push = self.push.clone();
            let uid = identity.uid.clone();
            tokio::spawn(async move {
                push::register_for_push(&push, &uid).await;
            });

            self.active = Some(ActiveSession {
                identity,
                presence,
                messages,
            });
        }
        Ok(())
    }

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<()> {
        self.session.sign_up(email, password).await?;
        self.sync_session().await
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<()> {
        self.session.sign_in(email, password).await?;
        self.sync_session().await
    }

    /// Clean sign-out: offline is durable and every subscription is
    /// released before the identity goes away.
    pub async fn sign_out(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            info!(uid = %active.identity.uid, "tearing down session");
            active.teardown().await;
        }
        self.session.sign_out().await;
        Ok(())
    }

    /// Toggle the signed-in user's reaction on a message.
    pub async fn toggle_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<()> {
        if let Some(active) = &self.active {
            reactions::toggle_reaction(&self.store, message_id, emoji, &active.identity.uid)
                .await?;
        }
        Ok(())
    }

    /// Update the profile, then refresh the session so subsequent sends
    /// carry the new sender fields.
    pub async fn update_profile(&mut self, update: ProfileUpdate) -> Result<Identity> {
        let identity =
            profile::update_profile(self.session.auth(), &self.blobs, update, &self.events_tx)
                .await?;
        self.sync_session().await?;
        Ok(identity)
    }

    /// Presence shortcut for the header dot.
    pub fn is_online(&self, uid: &UserId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.presence.is_online(uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_auth::MemoryAuthBackend;
    use parlor_shared::types::{Message, PresenceState, PresenceRecord};
    use parlor_store::{path, MemoryBlobBackend, MemoryStoreBackend};
    use crate::push::MemoryPushBackend;
    use tokio::sync::watch;
    use tokio::time::{timeout, Duration};

    /// An app over a fresh auth provider, sharing `store` with the
    /// other participants.  Returns the auth handle alongside the app so
    /// the caller keeps the provider task alive for the test's duration.
    fn app_on(store: &StoreClient) -> (ChatApp, parlor_auth::MemoryAuthHandle) {
        let (auth, auth_handle) = MemoryAuthBackend::spawn();
        let blobs = MemoryBlobBackend::spawn();
        let (push, _push_handle) = MemoryPushBackend::spawn(true, false);
        let (app, _events_rx) = ChatApp::new(store.clone(), auth, blobs, push);
        (app, auth_handle)
    }

    async fn wait_for_len(rx: &mut watch::Receiver<Vec<Message>>, len: usize) -> Vec<Message> {
        timeout(Duration::from_secs(1), async {
            loop {
                let list = rx.borrow_and_update().clone();
                if list.len() == len {
                    return list;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap()
    }

    async fn presence_state(store: &StoreClient, uid: &UserId) -> Option<PresenceState> {
        let value = store.get(&path::status(uid)).await.unwrap()?;
        Some(
            serde_json::from_value::<PresenceRecord>(value)
                .unwrap()
                .state,
        )
    }

    #[tokio::test]
    async fn full_conversation_scenario() {
        let (store, _store_handle) = MemoryStoreBackend::spawn();
        let (mut app_a, _auth_a) = app_on(&store);
        let (mut app_b, _auth_b) = app_on(&store);

        app_a.sign_up("ada@example.com", "secret1").await.unwrap();
        app_b.sign_up("bob@example.com", "secret1").await.unwrap();
        let uid_a = app_a.active().unwrap().identity.uid.clone();
        let uid_b = app_b.active().unwrap().identity.uid.clone();

        // Ada sends "hi": one entry, not a reply.
        app_a
            .active()
            .unwrap()
            .messages
            .send("hi")
            .await
            .unwrap()
            .unwrap();
        let mut list_b = app_b.active().unwrap().messages.messages();
        let list = wait_for_len(&mut list_b, 1).await;
        assert_eq!(list[0].text, "hi");
        assert!(!list[0].is_reply());

        // Bob replies "yo" with the denormalized snapshot.
        app_b.active().unwrap().messages.begin_reply(&list[0]);
        app_b
            .active()
            .unwrap()
            .messages
            .send("yo")
            .await
            .unwrap()
            .unwrap();
        let list = wait_for_len(&mut list_b, 2).await;
        let yo = &list[1];
        assert_eq!(yo.reply_to.as_ref(), Some(&list[0].id));
        assert_eq!(yo.reply_to_text.as_deref(), Some("hi"));

        // Ada toggles 👍 on Bob's message.
        app_a.toggle_reaction(&yo.id, "👍").await.unwrap();
        let node = path::reaction(&yo.id, "👍");
        assert_eq!(
            store.get(&node).await.unwrap(),
            Some(serde_json::json!([uid_a.as_str()]))
        );

        // Toggling again removes the key entirely.
        app_a.toggle_reaction(&yo.id, "👍").await.unwrap();
        assert_eq!(store.get(&node).await.unwrap(), None);

        // Bob and Ada toggle ❤️ concurrently: both survive.
        let heart = path::reaction(&yo.id, "❤️");
        let (ra, rb) = tokio::join!(
            app_a.toggle_reaction(&yo.id, "❤️"),
            app_b.toggle_reaction(&yo.id, "❤️"),
        );
        ra.unwrap();
        rb.unwrap();
        let mut reactors: Vec<String> =
            serde_json::from_value(store.get(&heart).await.unwrap().unwrap()).unwrap();
        reactors.sort();
        let mut expected = vec![uid_a.0.clone(), uid_b.0.clone()];
        expected.sort();
        assert_eq!(reactors, expected);

        // The reaction flows back into the materialized list.
        let list = timeout(Duration::from_secs(1), async {
            loop {
                list_b.changed().await.unwrap();
                let list = list_b.borrow_and_update().clone();
                if list[1].reactions.get("❤️").is_some_and(|r| r.len() == 2) {
                    return list;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(list[1].reactions.len(), 1);

        app_a.sign_out().await.unwrap();
        app_b.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn sign_out_marks_offline_and_clears_the_session() {
        let (store, _store_handle) = MemoryStoreBackend::spawn();
        let (mut app, _auth) = app_on(&store);

        app.sign_up("ada@example.com", "secret1").await.unwrap();
        let uid = app.active().unwrap().identity.uid.clone();
        assert_eq!(
            presence_state(&store, &uid).await,
            Some(PresenceState::Online)
        );

        app.sign_out().await.unwrap();
        assert_eq!(
            presence_state(&store, &uid).await,
            Some(PresenceState::Offline)
        );
        assert!(app.active().is_none());
        assert!(app.session().current().is_none());
    }

    #[tokio::test]
    async fn switching_identities_tears_down_before_respawning() {
        let (store, _store_handle) = MemoryStoreBackend::spawn();
        let (mut app, _auth) = app_on(&store);

        app.sign_up("ada@example.com", "secret1").await.unwrap();
        let uid_a = app.active().unwrap().identity.uid.clone();
        app.sign_out().await.unwrap();

        app.sign_up("bob@example.com", "secret1").await.unwrap();
        let uid_b = app.active().unwrap().identity.uid.clone();

        assert_ne!(uid_a, uid_b);
        assert_eq!(
            presence_state(&store, &uid_a).await,
            Some(PresenceState::Offline)
        );
        assert_eq!(
            presence_state(&store, &uid_b).await,
            Some(PresenceState::Online)
        );

        app.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn sync_session_picks_up_a_restored_session() {
        let (store, _store_handle) = MemoryStoreBackend::spawn();

        // First run: create the account with a persisted session.
        let (auth, auth_handle) = MemoryAuthBackend::spawn();
        auth.sign_up("ada@example.com", "secret1").await.unwrap();
        let state = auth_handle.export_state().await;

        // "Restart": the provider restores the session on load, and
        // sync_session spawns the components without a fresh sign-in.
        let (auth, _auth_handle) = MemoryAuthBackend::spawn_from(state);
        let blobs = MemoryBlobBackend::spawn();
        let (push, _push_handle) = MemoryPushBackend::spawn(true, false);
        let (mut app, _events_rx) = ChatApp::new(store.clone(), auth, blobs, push);

        app.sync_session().await.unwrap();
        let active = app.active().unwrap();
        assert_eq!(active.identity.email, "ada@example.com");

        app.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn sync_session_is_idempotent() {
        let (store, _store_handle) = MemoryStoreBackend::spawn();
        let (mut app, _auth) = app_on(&store);
        app.sign_up("ada@example.com", "secret1").await.unwrap();

        // No identity change, no respawn: the same tracker keeps
        // running and the status stays online throughout.
        app.sync_session().await.unwrap();
        app.sync_session().await.unwrap();

        let uid = app.active().unwrap().identity.uid.clone();
        assert_eq!(
            presence_state(&store, &uid).await,
            Some(PresenceState::Online)
        );
        app.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn profile_update_flows_into_subsequent_sends() {
        let (store, _store_handle) = MemoryStoreBackend::spawn();
        let (mut app, _auth) = app_on(&store);
        app.sign_up("ada@example.com", "secret1").await.unwrap();

        app.update_profile(ProfileUpdate {
            display_name: Some("Ada".into()),
            avatar: None,
        })
        .await
        .unwrap();

        app.active()
            .unwrap()
            .messages
            .send("with a name now")
            .await
            .unwrap()
            .unwrap();

        let mut rx = app.active().unwrap().messages.messages();
        let list = wait_for_len(&mut rx, 1).await;
        assert_eq!(list[0].sender_name.as_deref(), Some("Ada"));

        app.sign_out().await.unwrap();
    }
}

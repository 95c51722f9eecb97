//! In-memory reference auth provider.
//!
//! Holds accounts and the persisted session in a single task.
//! [`MemoryAuthHandle::export_state`] and
//! [`MemoryAuthBackend::spawn_from`] simulate a process restart: spawn a
//! new backend from the exported state and a persisted session is
//! restored, firing the identity watch exactly like the hosted
//! provider's on-load restore.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;
use uuid::Uuid;

use parlor_shared::constants::COMMAND_CHANNEL_CAPACITY;
use parlor_shared::types::UserId;
use parlor_shared::Identity;

use crate::client::{AuthClient, AuthCommand, ProfileChange};
use crate::error::{AuthError, Result};

/// Shortest password the provider accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    password: String,
}

/// Everything the provider keeps between "restarts": registered
/// accounts plus the persisted session, if any.
#[derive(Debug, Clone, Default)]
pub struct AuthServiceState {
    accounts: Vec<(String, String, Identity)>,
    persisted_uid: Option<UserId>,
}

enum CtrlCommand {
    ExportState {
        reply: oneshot::Sender<AuthServiceState>,
    },
}

/// Test/control handle for the memory provider.
#[derive(Debug, Clone)]
pub struct MemoryAuthHandle {
    ctrl_tx: mpsc::Sender<CtrlCommand>,
}

impl MemoryAuthHandle {
    /// Snapshot the provider's durable state, for feeding into
    /// [`MemoryAuthBackend::spawn_from`].
    pub async fn export_state(&self) -> AuthServiceState {
        let (reply, rx) = oneshot::channel();
        if self
            .ctrl_tx
            .send(CtrlCommand::ExportState { reply })
            .await
            .is_ok()
        {
            if let Ok(state) = rx.await {
                return state;
            }
        }
        AuthServiceState::default()
    }
}

/// Spawns the provider task.
pub struct MemoryAuthBackend;

impl MemoryAuthBackend {
    /// Fresh provider with no accounts and no session.
    pub fn spawn() -> (AuthClient, MemoryAuthHandle) {
        Self::spawn_from(AuthServiceState::default())
    }

    /// Provider resuming from exported state.  A persisted session is
    /// signed back in immediately (session restore on load).
    pub fn spawn_from(state: AuthServiceState) -> (AuthClient, MemoryAuthHandle) {
        let accounts: Vec<Account> = state
            .accounts
            .into_iter()
            .map(|(_, password, identity)| Account { identity, password })
            .collect();
        let current = state.persisted_uid.as_ref().and_then(|uid| {
            accounts
                .iter()
                .find(|a| &a.identity.uid == uid)
                .map(|a| a.identity.clone())
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
        let (identity_tx, identity_rx) = watch::channel(current.clone());

        let provider = Provider {
            accounts,
            persisted_uid: state.persisted_uid,
            current,
            identity_tx,
        };
        tokio::spawn(provider.run(cmd_rx, ctrl_rx));

        (
            AuthClient::new(cmd_tx, identity_rx),
            MemoryAuthHandle { ctrl_tx },
        )
    }
}

struct Provider {
    accounts: Vec<Account>,
    persisted_uid: Option<UserId>,
    current: Option<Identity>,
    identity_tx: watch::Sender<Option<Identity>>,
}

impl Provider {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<AuthCommand>,
        mut ctrl_rx: mpsc::Receiver<CtrlCommand>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                ctrl = ctrl_rx.recv() => match ctrl {
                    Some(CtrlCommand::ExportState { reply }) => {
                        let _ = reply.send(self.export());
                    }
                    None => break,
                },
            }
        }
    }

    fn handle_command(&mut self, cmd: AuthCommand) {
        match cmd {
            AuthCommand::SignUp {
                email,
                password,
                reply,
            } => {
                let _ = reply.send(self.sign_up(email, password));
            }
            AuthCommand::SignIn {
                email,
                password,
                persist,
                reply,
            } => {
                let _ = reply.send(self.sign_in(email, password, persist));
            }
            AuthCommand::SignOut { reply } => {
                self.sign_out();
                let _ = reply.send(());
            }
            AuthCommand::UpdateProfile { change, reply } => {
                let _ = reply.send(self.update_profile(change));
            }
        }
    }

    fn sign_up(&mut self, email: String, password: String) -> Result<Identity> {
        validate_credentials(&email, &password)?;
        if self.account_by_email(&email).is_some() {
            return Err(AuthError::EmailInUse);
        }

        let identity = Identity {
            uid: UserId(Uuid::new_v4().to_string()),
            email: email.clone(),
            display_name: None,
            photo_url: None,
        };
        self.accounts.push(Account {
            identity: identity.clone(),
            password,
        });

        info!(uid = %identity.uid, email = %email, "account created");
        self.set_current(Some(identity.clone()), true);
        Ok(identity)
    }

    fn sign_in(&mut self, email: String, password: String, persist: bool) -> Result<Identity> {
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingFields);
        }
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        let account = self
            .account_by_email(&email)
            .filter(|a| a.password == password)
            .ok_or(AuthError::InvalidCredentials)?;

        let identity = account.identity.clone();
        info!(uid = %identity.uid, persist, "signed in");
        self.set_current(Some(identity.clone()), persist);
        Ok(identity)
    }

    fn sign_out(&mut self) {
        if let Some(identity) = &self.current {
            info!(uid = %identity.uid, "signed out");
        }
        self.set_current(None, false);
    }

    fn update_profile(&mut self, change: ProfileChange) -> Result<Identity> {
        let current = self.current.clone().ok_or(AuthError::NotSignedIn)?;
        let account = self
            .accounts
            .iter_mut()
            .find(|a| a.identity.uid == current.uid)
            .ok_or_else(|| AuthError::Backend("signed-in account disappeared".into()))?;

        if let Some(name) = change.display_name {
            // An empty string clears the field, like the hosted provider.
            account.identity.display_name = (!name.is_empty()).then_some(name);
        }
        if let Some(url) = change.photo_url {
            account.identity.photo_url = (!url.is_empty()).then_some(url);
        }

        let updated = account.identity.clone();
        info!(uid = %updated.uid, "profile updated");
        self.current = Some(updated.clone());
        let _ = self.identity_tx.send(Some(updated.clone()));
        Ok(updated)
    }

    fn set_current(&mut self, identity: Option<Identity>, persist: bool) {
        self.persisted_uid = if persist {
            identity.as_ref().map(|i| i.uid.clone())
        } else {
            None
        };
        self.current = identity.clone();
        let _ = self.identity_tx.send(identity);
    }

    fn account_by_email(&self, email: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.identity.email == email)
    }

    fn export(&self) -> AuthServiceState {
        AuthServiceState {
            accounts: self
                .accounts
                .iter()
                .map(|a| {
                    (
                        a.identity.email.clone(),
                        a.password.clone(),
                        a.identity.clone(),
                    )
                })
                .collect(),
            persisted_uid: self.persisted_uid.clone(),
        }
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    if !is_valid_email(email) {
        return Err(AuthError::InvalidEmail);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_classifies_bad_input() {
        let (auth, _handle) = MemoryAuthBackend::spawn();

        assert_eq!(auth.sign_up("", "").await, Err(AuthError::MissingFields));
        assert_eq!(
            auth.sign_up("not-an-email", "secret1").await,
            Err(AuthError::InvalidEmail)
        );
        assert_eq!(
            auth.sign_up("ada@example.com", "short").await,
            Err(AuthError::WeakPassword)
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (auth, _handle) = MemoryAuthBackend::spawn();

        auth.sign_up("ada@example.com", "secret1").await.unwrap();
        assert_eq!(
            auth.sign_up("ada@example.com", "different1").await,
            Err(AuthError::EmailInUse)
        );
    }

    #[tokio::test]
    async fn sign_up_signs_the_user_in() {
        let (auth, _handle) = MemoryAuthBackend::spawn();

        let identity = auth.sign_up("ada@example.com", "secret1").await.unwrap();
        assert_eq!(auth.current_identity(), Some(identity));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_identical() {
        let (auth, _handle) = MemoryAuthBackend::spawn();
        auth.sign_up("ada@example.com", "secret1").await.unwrap();
        auth.sign_out().await;

        let wrong = auth.sign_in("ada@example.com", "nope-nope", true).await;
        let unknown = auth.sign_in("ghost@example.com", "secret1", true).await;
        assert_eq!(wrong, Err(AuthError::InvalidCredentials));
        assert_eq!(unknown, Err(AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn persisted_session_survives_restart() {
        let (auth, handle) = MemoryAuthBackend::spawn();
        let identity = auth.sign_up("ada@example.com", "secret1").await.unwrap();

        // "Restart": a new backend from the exported state restores the
        // session.
        let state = handle.export_state().await;
        let (restored, _handle) = MemoryAuthBackend::spawn_from(state);
        assert_eq!(restored.current_identity(), Some(identity));
    }

    #[tokio::test]
    async fn unpersisted_session_does_not_survive_restart() {
        let (auth, handle) = MemoryAuthBackend::spawn();
        auth.sign_up("ada@example.com", "secret1").await.unwrap();
        auth.sign_out().await;
        auth.sign_in("ada@example.com", "secret1", false)
            .await
            .unwrap();

        let state = handle.export_state().await;
        let (restored, _handle) = MemoryAuthBackend::spawn_from(state);
        assert_eq!(restored.current_identity(), None);
    }

    #[tokio::test]
    async fn sign_out_fires_the_identity_watch() {
        let (auth, _handle) = MemoryAuthBackend::spawn();
        let mut changes = auth.identity_changes();

        auth.sign_up("ada@example.com", "secret1").await.unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().is_some());

        auth.sign_out().await;
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn profile_update_applies_and_clears_fields() {
        let (auth, _handle) = MemoryAuthBackend::spawn();
        auth.sign_up("ada@example.com", "secret1").await.unwrap();

        let updated = auth
            .update_profile(ProfileChange {
                display_name: Some("Ada".into()),
                photo_url: Some("https://example.com/a.png".into()),
            })
            .await
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Ada"));
        assert_eq!(updated.display_label(), "Ada");

        let cleared = auth
            .update_profile(ProfileChange {
                display_name: Some(String::new()),
                photo_url: None,
            })
            .await
            .unwrap();
        assert_eq!(cleared.display_name, None);
        // Photo untouched by a None field.
        assert!(cleared.photo_url.is_some());
        assert_eq!(cleared.display_label(), "ada");
    }

    #[tokio::test]
    async fn profile_update_requires_a_session() {
        let (auth, _handle) = MemoryAuthBackend::spawn();
        let result = auth.update_profile(ProfileChange::default()).await;
        assert_eq!(result, Err(AuthError::NotSignedIn));
    }
}

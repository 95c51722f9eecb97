//! The auth client handle and its command protocol.
//!
//! Mirrors the store client's shape: a cloneable handle over a bounded
//! command channel to a provider task, plus a watch stream carrying the
//! current identity (`None` when signed out).  The watch fires on
//! sign-in, sign-out, session restore, and profile updates.

use tokio::sync::{mpsc, oneshot, watch};

use parlor_shared::Identity;

use crate::error::{AuthError, Result};

/// Fields to change on the signed-in user's profile.  `None` leaves the
/// field as it is.
#[derive(Debug, Clone, Default)]
pub struct ProfileChange {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Commands serviced by an auth provider backend.
#[derive(Debug)]
pub enum AuthCommand {
    SignUp {
        email: String,
        password: String,
        reply: oneshot::Sender<Result<Identity>>,
    },
    SignIn {
        email: String,
        password: String,
        /// Keep the session across process restarts.
        persist: bool,
        reply: oneshot::Sender<Result<Identity>>,
    },
    SignOut {
        reply: oneshot::Sender<()>,
    },
    UpdateProfile {
        change: ProfileChange,
        reply: oneshot::Sender<Result<Identity>>,
    },
}

/// Handle to an auth provider task.
#[derive(Debug, Clone)]
pub struct AuthClient {
    cmd_tx: mpsc::Sender<AuthCommand>,
    identity_rx: watch::Receiver<Option<Identity>>,
}

impl AuthClient {
    pub fn new(
        cmd_tx: mpsc::Sender<AuthCommand>,
        identity_rx: watch::Receiver<Option<Identity>>,
    ) -> Self {
        Self {
            cmd_tx,
            identity_rx,
        }
    }

    /// The signed-in identity right now, if any.
    pub fn current_identity(&self) -> Option<Identity> {
        self.identity_rx.borrow().clone()
    }

    /// Stream of identity changes.  A fresh receiver starts at the
    /// current value.
    pub fn identity_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.identity_rx.clone()
    }

    /// Create an account.  On success the new identity is also signed
    /// in, like the hosted provider does.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
        let (reply, rx) = oneshot::channel();
        self.send(AuthCommand::SignUp {
            email: email.to_string(),
            password: password.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(closed)?
    }

    pub async fn sign_in(&self, email: &str, password: &str, persist: bool) -> Result<Identity> {
        let (reply, rx) = oneshot::channel();
        self.send(AuthCommand::SignIn {
            email: email.to_string(),
            password: password.to_string(),
            persist,
            reply,
        })
        .await?;
        rx.await.map_err(closed)?
    }

    /// Sign out and drop any persisted session.  Never fails: a missing
    /// session is already the goal state.
    pub async fn sign_out(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(AuthCommand::SignOut { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Apply a profile change to the signed-in user and return the
    /// updated identity.
    pub async fn update_profile(&self, change: ProfileChange) -> Result<Identity> {
        let (reply, rx) = oneshot::channel();
        self.send(AuthCommand::UpdateProfile { change, reply })
            .await?;
        rx.await.map_err(closed)?
    }

    async fn send(&self, cmd: AuthCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| AuthError::Backend("auth provider unavailable".into()))
    }
}

fn closed<E>(_: E) -> AuthError {
    AuthError::Backend("auth provider dropped the request".into())
}

//! Session manager: the authenticated identity and its lifecycle.
//!
//! Thin policy layer over [`AuthClient`]: pre-validates the form input
//! the way the sign-in screen does, always persists interactive
//! sign-ins across restarts, and gives the rest of the core one place
//! to watch for identity changes (sign-in, sign-out, session restore).

use tokio::sync::watch;
use tracing::warn;

use parlor_auth::{AuthClient, AuthError};
use parlor_shared::Identity;

/// Tracks the authenticated identity.
#[derive(Debug, Clone)]
pub struct SessionManager {
    auth: AuthClient,
}

impl SessionManager {
    pub fn new(auth: AuthClient) -> Self {
        Self { auth }
    }

    /// The signed-in identity, if any.
    pub fn current(&self) -> Option<Identity> {
        self.auth.current_identity()
    }

    /// Identity-change stream; fires on sign-in, sign-out, session
    /// restore, and profile updates.  When this turns `None`, all other
    /// core state is invalid and must be torn down.
    pub fn changes(&self) -> watch::Receiver<Option<Identity>> {
        self.auth.identity_changes()
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        require_fields(email, password)?;
        self.auth.sign_up(email, password).await.map_err(log_auth)
    }

    /// Sign in with a session that survives process restart.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        require_fields(email, password)?;
        self.auth
            .sign_in(email, password, true)
            .await
            .map_err(log_auth)
    }

    pub async fn sign_out(&self) {
        self.auth.sign_out().await;
    }

    /// The underlying auth handle, for operations that belong to other
    /// modules (profile updates).
    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }
}

fn require_fields(email: &str, password: &str) -> Result<(), AuthError> {
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    Ok(())
}

fn log_auth(err: AuthError) -> AuthError {
    // The Display text goes to the user; the Debug detail to the log.
    warn!(error = ?err, "authentication failed");
    err
}

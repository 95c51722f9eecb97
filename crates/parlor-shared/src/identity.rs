//! The authenticated identity as exposed by the auth collaborator.
//!
//! Read-only to the application core except through the explicit
//! profile-update operation.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// A signed-in (or known) user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    /// Name to render for this user: the display name when set, else the
    /// local part of the email address.
    pub fn display_label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| email_local_part(&self.email).to_string())
    }
}

/// Everything before the `@` of an email address.  Returns the whole
/// string when there is no `@`.
pub fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

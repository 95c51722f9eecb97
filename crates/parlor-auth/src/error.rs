use thiserror::Error;

/// Classified authentication failures.
///
/// `Display` is the user-facing message; the UI shows it verbatim.
/// Variants that wrap a cause keep the detail for logs (`Debug`) while
/// presenting a generic message to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email and password are required.")]
    MissingFields,

    #[error("Please enter a valid email address.")]
    InvalidEmail,

    /// Unknown account or wrong password. One message for both, so
    /// the form does not leak which it was.
    #[error("Invalid email or password.")]
    InvalidCredentials,

    #[error("This email address is already in use.")]
    EmailInUse,

    #[error("Password should be at least 6 characters.")]
    WeakPassword,

    #[error("You must be signed in to do that.")]
    NotSignedIn,

    #[error("An unexpected error occurred. Please try again.")]
    Backend(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;

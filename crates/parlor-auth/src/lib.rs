//! # parlor-auth
//!
//! Client for the hosted identity provider: email+password accounts,
//! session persistence across restarts, profile updates, and a
//! current-identity watch stream.  Failures are classified so the UI
//! can show a short, useful message instead of a stack trace.
//!
//! [`memory::MemoryAuthBackend`] is the in-process reference provider
//! used by every test.

pub mod client;
pub mod memory;

mod error;

pub use client::{AuthClient, ProfileChange};
pub use error::AuthError;
pub use memory::{AuthServiceState, MemoryAuthBackend, MemoryAuthHandle};

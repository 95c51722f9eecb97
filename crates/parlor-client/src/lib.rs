//! # parlor-client
//!
//! The chat client core: session manager, presence tracker, message
//! stream, reaction merger, profile updater, push registration, and the
//! theme preference.  The view layer is not here; the core ends at
//! `watch` channels carrying materialized state plus a
//! [`ClientEvent`](events::ClientEvent) stream for the few imperative
//! view requests (scroll, focus, banners).

pub mod app;
pub mod events;
pub mod messages;
pub mod presence;
pub mod profile;
pub mod push;
pub mod reactions;
pub mod session;
pub mod settings;

mod error;

pub use app::{ActiveSession, ChatApp};
pub use error::ClientError;
pub use session::SessionManager;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.  `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parlor_client=debug,parlor_store=debug,parlor_auth=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

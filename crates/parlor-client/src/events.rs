//! View-request events.
//!
//! The core never touches the view; when it needs something imperative
//! from it (scroll, focus, a transient banner) it emits a
//! [`ClientEvent`] on an unbounded channel the view drains.

use tokio::sync::mpsc;

/// Requests from the core to whatever renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Scroll the message list to the newest entry.
    ScrollToLatest,
    /// Give the message composer input focus (a reply was started).
    FocusComposer,
    /// Show a transient banner on the profile screen.
    Banner(String),
    /// The banner's display window elapsed; hide it.
    BannerCleared,
}

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Emit without failing the caller; a view that went away just stops
/// listening.
pub fn emit(tx: &EventSender, event: ClientEvent) {
    if tx.send(event.clone()).is_err() {
        tracing::debug!(?event, "no event listener attached");
    }
}

//! # parlor-store
//!
//! Client for the hosted realtime tree store that holds all durable chat
//! state.  The store itself is an external collaborator; this crate
//! defines the command protocol a backend must service, the
//! [`StoreClient`] handle the application talks to, subscriptions as
//! owned resources, and the optimistic-transaction combinator.
//!
//! [`memory::MemoryStoreBackend`] is the reference backend: an in-process
//! task that implements the full protocol (ordered snapshots, per-path
//! versions, server timestamps, deferred on-disconnect writes) and backs
//! every test in the workspace.

pub mod blobs;
pub mod client;
pub mod memory;
pub mod path;
pub mod value;

mod error;

pub use blobs::{BlobClient, BlobHandle, MemoryBlobBackend};
pub use client::{Snapshot, StoreClient, Subscription};
pub use error::StoreError;
pub use memory::{MemoryStoreBackend, MemoryStoreHandle};
pub use path::TreePath;

//! # parlor-shared
//!
//! Wire and domain types shared by every Parlor crate: user identity,
//! message records, reaction sets, presence records, and the server
//! timestamp placeholder.  Everything here derives `Serialize` /
//! `Deserialize` with the exact field names the hosted store expects.

pub mod constants;
pub mod identity;
pub mod types;

pub use identity::Identity;
pub use types::*;

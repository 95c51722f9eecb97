//! Well-known store paths, channel sizes, and UI policy constants.

/// Root node of the shared-room message collection.
pub const MESSAGES_PATH: &str = "messages";

/// Root node of the per-user presence records.
pub const STATUS_PATH: &str = "status";

/// Child node of a message holding its reaction sets.
pub const REACTIONS_NODE: &str = "reactions";

/// Root folder for avatar uploads in blob storage.
pub const AVATARS_PATH: &str = "avatars";

/// Key of the server-clock placeholder object the store substitutes at
/// write time (`{".sv": "timestamp"}`).
pub const SERVER_TIMESTAMP_KEY: &str = ".sv";

/// The emoji offered by the reaction picker.
pub const REACTION_EMOJIS: [&str; 6] = ["👍", "❤️", "😂", "😮", "😢", "🙏"];

/// Bounded capacity for command channels to backend tasks.
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// How long a transient profile banner stays visible.
pub const BANNER_DISMISS_SECS: u64 = 3;

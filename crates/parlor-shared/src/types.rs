use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::SERVER_TIMESTAMP_KEY;

/// Opaque user identifier issued by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-generated message identifier (the node key under `messages/`).
/// Keys sort lexicographically in creation order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A server-assigned instant.
///
/// Clients never write a local clock value: outgoing records carry
/// [`Timestamp::Server`], which serializes as the store's placeholder
/// object and is replaced with the server clock at write time.  Records
/// read back always carry [`Timestamp::Millis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// Placeholder resolved by the store on write.
    Server,
    /// Milliseconds since the Unix epoch, as assigned by the server.
    Millis(i64),
}

impl Timestamp {
    /// The resolved value, if the store has assigned one.
    pub fn millis(&self) -> Option<i64> {
        match self {
            Timestamp::Millis(ms) => Some(*ms),
            Timestamp::Server => None,
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Timestamp::Millis(ms) => serializer.serialize_i64(*ms),
            Timestamp::Server => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(SERVER_TIMESTAMP_KEY, "timestamp")?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Timestamp::Millis)
                .ok_or_else(|| D::Error::custom("timestamp out of i64 range")),
            serde_json::Value::Object(ref map) if map.contains_key(SERVER_TIMESTAMP_KEY) => {
                Ok(Timestamp::Server)
            }
            other => Err(D::Error::custom(format!(
                "expected a millisecond timestamp or server placeholder, got {other}"
            ))),
        }
    }
}

/// Online/offline state of a participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

/// Authoritative presence record at `status/{uid}`.  Last writer wins;
/// no history is retained.  Field names are snake_case on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceRecord {
    pub state: PresenceState,
    pub last_changed: Timestamp,
}

impl PresenceRecord {
    pub fn online() -> Self {
        Self {
            state: PresenceState::Online,
            last_changed: Timestamp::Server,
        }
    }

    pub fn offline() -> Self {
        Self {
            state: PresenceState::Offline,
            last_changed: Timestamp::Server,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == PresenceState::Online
    }
}

/// Per-message reaction sets: emoji symbol to the users who reacted
/// with it.  A key that is present always maps to a non-empty list.
pub type ReactionMap = BTreeMap<String, Vec<UserId>>;

/// A single chat message as stored under `messages/{id}`.
///
/// The node key is the id; it is not repeated in the record body, so the
/// field is skipped during (de)serialization and filled in from the key.
/// Messages are immutable once written; the reply fields are a snapshot
/// of the target taken at reply time and never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: MessageId,
    pub text: String,
    /// Sender's email address (wire name `sender`).
    #[serde(rename = "sender")]
    pub sender_email: String,
    pub uid: UserId,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(rename = "senderPhotoURL", skip_serializing_if = "Option::is_none")]
    pub sender_photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: ReactionMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_sender: Option<String>,
}

impl Message {
    /// Name shown next to the message: the sender's display name, or the
    /// local part of their email when no name was set.
    pub fn sender_label(&self) -> String {
        self.sender_name
            .clone()
            .unwrap_or_else(|| crate::identity::email_local_part(&self.sender_email).to_string())
    }

    /// Whether this message is a reply to another message.
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

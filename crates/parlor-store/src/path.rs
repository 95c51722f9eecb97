//! Slash-separated paths into the store's tree.
//!
//! Paths are normalized on construction: leading/trailing/repeated
//! slashes collapse, so `"/messages//m1/"` and `"messages/m1"` address
//! the same node.  The empty path is the tree root.

use std::fmt;

use parlor_shared::constants::{MESSAGES_PATH, REACTIONS_NODE, STATUS_PATH};
use parlor_shared::types::{MessageId, UserId};

/// A normalized location in the store tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath(String);

impl TreePath {
    /// The tree root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Build a path from a slash-separated string, dropping empty
    /// segments.
    pub fn new(path: &str) -> Self {
        let normalized: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        Self(normalized.join("/"))
    }

    /// Append one segment.  Slashes inside the segment would change the
    /// addressed node, so they are normalized away like any other path
    /// input.
    pub fn child(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self::new(segment)
        } else {
            Self::new(&format!("{}/{}", self.0, segment))
        }
    }

    /// The parent node, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments from root to leaf.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Whether `other` lies in this path's subtree (inclusive).
    pub fn contains(&self, other: &TreePath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// `messages`: the shared-room message collection.
pub fn messages_root() -> TreePath {
    TreePath::new(MESSAGES_PATH)
}

/// `messages/{id}`: one message node.
pub fn message(id: &MessageId) -> TreePath {
    messages_root().child(id.as_str())
}

/// `messages/{id}/reactions/{emoji}`: one reaction list, the only node
/// mutated through the transaction combinator.
pub fn reaction(id: &MessageId, emoji: &str) -> TreePath {
    message(id).child(REACTIONS_NODE).child(emoji)
}

/// `status`: the presence subtree.
pub fn status_root() -> TreePath {
    TreePath::new(STATUS_PATH)
}

/// `status/{uid}`: one user's presence record.
pub fn status(uid: &UserId) -> TreePath {
    status_root().child(uid.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_slashes() {
        assert_eq!(TreePath::new("/messages//m1/"), TreePath::new("messages/m1"));
        assert_eq!(TreePath::new("").as_str(), "");
        assert!(TreePath::new("///").is_root());
    }

    #[test]
    fn child_and_parent() {
        let p = TreePath::root().child("messages").child("m1");
        assert_eq!(p.as_str(), "messages/m1");
        assert_eq!(p.parent(), Some(TreePath::new("messages")));
        assert_eq!(TreePath::new("messages").parent(), Some(TreePath::root()));
        assert_eq!(TreePath::root().parent(), None);
    }

    #[test]
    fn containment_is_by_segment() {
        let messages = TreePath::new("messages");
        assert!(messages.contains(&TreePath::new("messages/m1/reactions")));
        assert!(messages.contains(&messages));
        // Sibling with a shared string prefix is not contained.
        assert!(!messages.contains(&TreePath::new("messages2/m1")));
        assert!(TreePath::root().contains(&messages));
    }

    #[test]
    fn reaction_path_shape() {
        let p = reaction(&MessageId("m1".into()), "👍");
        assert_eq!(p.as_str(), "messages/m1/reactions/👍");
    }
}

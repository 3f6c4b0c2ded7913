//! Common node attributes
//!
//! Ownership/timestamp metadata shared by every node variant, plus the
//! qualified-name keyed aspect and property model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A namespace-qualified name used for aspects and property keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QName {
    pub namespace: String,
    pub local_name: String,
}

impl QName {
    pub fn new(namespace: &str, local_name: &str) -> Self {
        QName {
            namespace: namespace.to_string(),
            local_name: local_name.to_string(),
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local_name)
    }
}

/// Typed property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

/// Creator/owner/modifier metadata carried by every node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAttributes {
    /// User that created the node
    pub creator: String,
    /// Current owner
    pub owner: String,
    /// User that last modified the node
    pub last_modifier: String,
    /// Creation time
    pub create_date: DateTime<Utc>,
    /// Last modification time
    pub mod_date: DateTime<Utc>,
    /// Last access time
    pub access_date: DateTime<Utc>,
}

impl BasicAttributes {
    /// Attributes for a freshly created node
    pub fn new(user: &str) -> Self {
        let now = Utc::now();
        BasicAttributes {
            creator: user.to_string(),
            owner: user.to_string(),
            last_modifier: user.to_string(),
            create_date: now,
            mod_date: now,
            access_date: now,
        }
    }

    /// Update modification and access times
    pub fn touch(&mut self, user: &str) {
        let now = Utc::now();
        self.last_modifier = user.to_string();
        self.mod_date = now;
        self.access_date = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_display() {
        let q = QName::new("avm", "title");
        assert_eq!(q.to_string(), "{avm}title");
    }

    #[test]
    fn test_touch_updates_modifier() {
        let mut attrs = BasicAttributes::new("alice");
        assert_eq!(attrs.creator, "alice");

        attrs.touch("bob");
        assert_eq!(attrs.last_modifier, "bob");
        assert_eq!(attrs.creator, "alice");
        assert!(attrs.mod_date >= attrs.create_date);
    }
}

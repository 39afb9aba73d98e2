//! Hierarchical routing topics.
//!
//! A topic is a `/`-separated string. Subscription matching is prefix-based,
//! but only on segment boundaries: `/a/b` matches `/a/b` and `/a/b/c`, never
//! `/a/bc`.

use serde::{Deserialize, Serialize};

/// Separator between topic segments.
pub const SEP: char = '/';

/// Reserved prefix for store traffic between masters and clones.
const STORE_PREFIX: &str = "/broker/store";

/// A hierarchical routing key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Topic {
    name: String,
}

impl Topic {
    /// Create a topic from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The topic string.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Append a segment, inserting the separator.
    pub fn join(&self, segment: &str) -> Topic {
        let mut name = self.name.clone();
        if !name.ends_with(SEP) {
            name.push(SEP);
        }
        name.push_str(segment.trim_start_matches(SEP));
        Topic { name }
    }

    /// Whether this topic, used as a subscription, matches `other`.
    ///
    /// True iff `other` equals this topic or starts with this topic followed
    /// by a separator.
    pub fn matches_prefix(&self, other: &Topic) -> bool {
        let prefix = &self.name;
        let candidate = &other.name;
        if candidate == prefix {
            return true;
        }
        candidate.starts_with(prefix)
            && candidate[prefix.len()..].starts_with(SEP)
    }

    /// The command topic of the master for the named store.
    pub fn master_topic(store: &str) -> Topic {
        Topic::new(format!("{}/master/{}", STORE_PREFIX, store))
    }

    /// The command topic shared by the clones of the named store.
    pub fn clone_topic(store: &str) -> Topic {
        Topic::new(format!("{}/clone/{}", STORE_PREFIX, store))
    }

    /// Whether this topic belongs to the reserved store namespace.
    pub fn is_store_topic(&self) -> bool {
        Topic::new(STORE_PREFIX).matches_prefix(self)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Topic::new(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic::new(name)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

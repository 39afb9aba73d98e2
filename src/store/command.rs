//! Commands transported over the ordered store channel.

use crate::core::id::NodeId;
use crate::core::time::Timespan;
use crate::data::{Data, DataType, Table, Topic};
use serde::{Deserialize, Serialize};

/// Correlates a request with its asynchronous reply.
pub type RequestId = u64;

/// Identifies the originator of a mutating command: the node it came from
/// plus a node-local actor id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PublisherId {
    /// Node the command originated on.
    pub node: NodeId,
    /// Node-local id of the originating actor.
    pub actor: u64,
}

impl PublisherId {
    pub const fn new(node: NodeId, actor: u64) -> Self {
        Self { node, actor }
    }
}

impl std::fmt::Display for PublisherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.actor)
    }
}

/// A bulk state transfer: the full key/value map of the master's backend.
pub type StoreSnapshot = Table;

/// A mutation or control verb applied to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Write a value, optionally with an expiry relative to application
    /// time.
    Put {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    },
    /// Write a value only if the key does not exist yet; the outcome is
    /// reported to `who` under `req_id`.
    PutUnique {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
        who: PublisherId,
        req_id: RequestId,
    },
    /// Remove a key.
    Erase { key: Data, publisher: PublisherId },
    /// Add to an existing value, initializing an absent key with the
    /// additive identity of `init_type`.
    Add {
        key: Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    },
    /// Subtract from an existing value.
    Subtract {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    },
    /// Remove all keys.
    Clear { publisher: PublisherId },
    /// A key expired on the master. Clones apply this like an erase but
    /// report it as an expiration.
    Expire { key: Data, publisher: PublisherId },
    /// A clone requests a bulk state transfer from the master.
    Snapshot { remote_clone: PublisherId },
    /// Ordered marker separating updates covered by a snapshot from updates
    /// the requesting clone must replay after installing it.
    SnapshotSync { remote_clone: PublisherId },
    /// Installs a snapshot on the requesting clone.
    Set { snapshot: StoreSnapshot },
}

impl Command {
    /// Short verb name for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::PutUnique { .. } => "put_unique",
            Self::Erase { .. } => "erase",
            Self::Add { .. } => "add",
            Self::Subtract { .. } => "subtract",
            Self::Clear { .. } => "clear",
            Self::Expire { .. } => "expire",
            Self::Snapshot { .. } => "snapshot",
            Self::SnapshotSync { .. } => "snapshot_sync",
            Self::Set { .. } => "set",
        }
    }
}

/// A command tagged with the topic it travels on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Routing topic (the master or clone topic of a store).
    pub topic: Topic,
    /// The transported command.
    pub command: Command,
}

impl CommandMessage {
    pub fn new(topic: Topic, command: Command) -> Self {
        Self { topic, command }
    }
}

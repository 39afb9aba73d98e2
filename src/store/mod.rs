//! Replicated key/value stores.
//!
//! A *master* owns the authoritative state of a named store and fans every
//! applied command out to its *clones* over the reliable channel; clones
//! maintain eventually-consistent replicas and bootstrap via snapshot plus
//! sync-point. Both talk to their storage through the [`Backend`] trait and
//! report mutations on a local observer stream.

pub mod backend;
pub mod clone;
pub mod command;
pub mod events;
pub mod frontend;
pub mod master;
pub mod memory;

pub use backend::Backend;
pub use command::{Command, CommandMessage, PublisherId, RequestId, StoreSnapshot};
pub use events::{EventSink, StoreEvent};
pub use frontend::Store;
pub use memory::MemoryBackend;

use crate::channel::{ConsumerMessage, ProducerMessage};
use crate::core::error::BrokerResult;
use crate::core::time::Timespan;
use crate::data::{Data, Topic};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

/// Read-only queries a clone forwards to its master while it is not live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreQuery {
    Get { key: Data },
    GetAspect { key: Data, aspect: Data },
    Exists { key: Data },
    Keys,
}

/// Payload of a message on the store fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorePayload {
    /// A command injected into the receiving store (clone writes travel to
    /// the master this way, as do snapshot requests and installs).
    Command(Command),
    /// Ordered channel traffic from a master to one of its clones.
    Producer(ProducerMessage<CommandMessage>),
    /// Channel feedback from a clone to its master.
    Consumer(ConsumerMessage),
    /// Outcome of a `put_unique`, addressed to the requester.
    UniqueReply { req_id: RequestId, accepted: bool },
    /// A query forwarded by a clone that is not live yet.
    Query { req_id: RequestId, query: StoreQuery },
    /// Answer to a forwarded query.
    QueryReply {
        req_id: RequestId,
        result: BrokerResult<Data>,
    },
}

/// One message on the store fabric: a payload routed by topic, stamped with
/// its sending store actor, optionally addressed to a single receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMessage {
    /// The master or clone topic of the store.
    pub topic: Topic,
    /// The store actor that sent the message.
    pub sender: PublisherId,
    /// Restricts delivery to one store actor; `None` reaches every actor
    /// subscribed to the topic.
    pub receiver: Option<PublisherId>,
    /// The transported payload.
    pub payload: StorePayload,
}

impl StoreMessage {
    /// Whether this message should be delivered to the actor with `id`.
    pub fn accepts(&self, id: PublisherId) -> bool {
        match self.receiver {
            Some(receiver) => receiver == id,
            None => true,
        }
    }
}

/// Requests from a [`Store`] frontend to its local store task.
#[derive(Debug)]
pub enum StoreRequest {
    Get {
        key: Data,
        reply: oneshot::Sender<BrokerResult<Data>>,
    },
    GetAspect {
        key: Data,
        aspect: Data,
        reply: oneshot::Sender<BrokerResult<Data>>,
    },
    Exists {
        key: Data,
        reply: oneshot::Sender<BrokerResult<bool>>,
    },
    Keys {
        reply: oneshot::Sender<BrokerResult<Data>>,
    },
    PutUnique {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
        reply: oneshot::Sender<BrokerResult<bool>>,
    },
    /// Fire-and-forget mutation built by the frontend.
    Mutate(Command),
    /// Whether the store settled: all clones acknowledged all commands.
    Idle {
        reply: oneshot::Sender<bool>,
    },
    /// Attach an observer to the store-event stream.
    Events {
        reply: oneshot::Sender<broadcast::Receiver<StoreEvent>>,
    },
}

//! Local store-event emission.
//!
//! Masters and clones publish an observer stream describing every mutation
//! they applied. Events are emitted after the write is durable in the
//! backend and before the corresponding broadcast leaves the store, so a
//! local observer never sees an event for a write that did not happen.

use super::command::PublisherId;
use crate::core::time::Timestamp;
use crate::data::Data;
use tokio::sync::broadcast;

/// Capacity of the observer stream. Slow observers lose the oldest events,
/// mirroring broadcast-channel semantics.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One observed mutation, keyed by origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A key was created.
    Insert {
        key: Data,
        value: Data,
        expiry: Option<Timestamp>,
        publisher: PublisherId,
    },
    /// An existing key changed its value.
    Update {
        key: Data,
        old_value: Data,
        new_value: Data,
        expiry: Option<Timestamp>,
        publisher: PublisherId,
    },
    /// A key was removed.
    Erase { key: Data, publisher: PublisherId },
    /// A key was removed because its expiry came due.
    Expire { key: Data, publisher: PublisherId },
}

impl StoreEvent {
    /// The key the event refers to.
    pub fn key(&self) -> &Data {
        match self {
            Self::Insert { key, .. }
            | Self::Update { key, .. }
            | Self::Erase { key, .. }
            | Self::Expire { key, .. } => key,
        }
    }

    /// The origin of the mutation.
    pub fn publisher(&self) -> PublisherId {
        match self {
            Self::Insert { publisher, .. }
            | Self::Update { publisher, .. }
            | Self::Erase { publisher, .. }
            | Self::Expire { publisher, .. } => *publisher,
        }
    }
}

/// Fan-out point for store events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Attach a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Emit one event. Emission without observers is a no-op.
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

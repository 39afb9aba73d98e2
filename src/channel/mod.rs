//! Reliable, ordered transport over an unreliable, unordered substrate.
//!
//! A channel belongs to a single producer and serves any number of
//! consumers. The producer tags every payload with a monotonically
//! increasing sequence number and keeps it buffered until all consumers
//! acknowledged it; consumers reorder, deduplicate, and acknowledge via
//! cumulative ACKs, requesting retransmission of gaps via NACKs.
//!
//! Both halves are pure state machines: all I/O goes through the caller
//! supplied link traits, which keeps the protocol deterministic and directly
//! testable.
//!
//! At 1000 messages per second, a sequence number of this type overflows
//! after 580 million years, so wrap-around is not handled.

pub mod consumer;
pub mod producer;

pub use consumer::{Consumer, ConsumerLink};
pub use producer::{Producer, ProducerLink};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonically increasing counter establishing message order on a
/// channel. The first produced event carries sequence number 1.
pub type SequenceNumber = u64;

/// Messages flowing from the producer to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerMessage<P> {
    /// Tells a consumer the first sequence number it should process and
    /// acknowledge after attaching to the producer.
    Handshake { first_seq: SequenceNumber },
    /// Transmits ordered data.
    Event { seq: SequenceNumber, payload: P },
    /// Tells a consumer that the producer can no longer retransmit an
    /// event. The consumer cannot recover from this on its own.
    RetransmitFailed { seq: SequenceNumber },
}

/// Messages flowing from a consumer back to the producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerMessage {
    /// The consumer received all events up to and including `seq`.
    CumulativeAck { seq: SequenceNumber },
    /// The consumer is missing the listed events. A NACK for sequence
    /// number 0 asks the producer to re-send the handshake.
    Nack { seqs: Vec<SequenceNumber> },
}

/// Channel-level protocol failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// `add` was called for a handle that already has a path.
    #[error("consumer already registered with this producer")]
    ConsumerExists,
}

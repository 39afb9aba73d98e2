//! Producer half of the reliable channel.

use super::{ChannelError, ProducerMessage, SequenceNumber};
use std::collections::VecDeque;

/// Transmits producer messages towards one consumer.
///
/// Implementations must not block; the producer calls this from inside its
/// message handlers.
pub trait ProducerLink<H, P> {
    fn transmit(&mut self, to: &H, msg: ProducerMessage<P>);
}

/// Bundles consumer handle, offset, and last acknowledged sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path<H> {
    /// The consumer this path leads to.
    pub handle: H,
    /// First sequence number the consumer will see.
    pub offset: SequenceNumber,
    /// Highest sequence number the consumer acknowledged.
    pub acked: SequenceNumber,
}

/// A buffered event awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedEvent<P> {
    pub seq: SequenceNumber,
    pub payload: P,
}

/// The sending half of a channel.
///
/// Events stay in the retransmission buffer until every path acknowledged
/// them; the buffer holds exactly the events with a sequence number greater
/// than the minimum acknowledged one.
#[derive(Debug)]
pub struct Producer<H, P> {
    /// Sequence number of the most recently produced event (0 before the
    /// first event).
    seq: SequenceNumber,
    /// Unacknowledged events in sequence order.
    buf: VecDeque<BufferedEvent<P>>,
    /// One path per attached consumer.
    paths: Vec<Path<H>>,
}

impl<H: PartialEq + Clone, P: Clone> Default for Producer<H, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: PartialEq + Clone, P: Clone> Producer<H, P> {
    /// Create a producer with no consumers.
    pub fn new() -> Self {
        Self {
            seq: 0,
            buf: VecDeque::new(),
            paths: Vec::new(),
        }
    }

    /// Assign the next sequence number to `payload`, buffer it, and fan it
    /// out to all current paths.
    ///
    /// Never blocks and never applies backpressure; `idle` exposes whether
    /// consumers keep up.
    pub fn produce(&mut self, payload: P, link: &mut impl ProducerLink<H, P>) {
        self.seq += 1;
        if self.paths.is_empty() {
            // Nobody to retransmit to; retaining the event would only grow
            // the buffer until the first consumer attaches.
            return;
        }
        self.buf.push_back(BufferedEvent {
            seq: self.seq,
            payload: payload.clone(),
        });
        for path in &self.paths {
            link.transmit(
                &path.handle,
                ProducerMessage::Event {
                    seq: self.seq,
                    payload: payload.clone(),
                },
            );
        }
    }

    /// Attach a new consumer, handing it a handshake with its offset.
    ///
    /// The new path starts fully acknowledged; the consumer will see events
    /// produced from here on.
    pub fn add(
        &mut self,
        handle: H,
        link: &mut impl ProducerLink<H, P>,
    ) -> Result<(), ChannelError> {
        if self.find_path(&handle).is_some() {
            return Err(ChannelError::ConsumerExists);
        }
        let offset = self.seq + 1;
        self.paths.push(Path {
            handle: handle.clone(),
            offset,
            acked: self.seq,
        });
        link.transmit(&handle, ProducerMessage::Handshake { first_seq: offset });
        Ok(())
    }

    /// Detach a consumer. Prunes the buffer in case the departing path was
    /// the slowest one.
    pub fn remove(&mut self, handle: &H) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p.handle != *handle);
        if self.paths.len() != before {
            self.prune_buffer();
            true
        } else {
            false
        }
    }

    /// Process a cumulative ACK from one consumer.
    ///
    /// ACKs beyond the most recent sequence number are clamped; an honest
    /// consumer never sends such, and an ACK of 0 simply means "nothing
    /// delivered yet".
    pub fn handle_ack(&mut self, handle: &H, seq: SequenceNumber) {
        let acked = seq.min(self.seq);
        let mut found = false;
        for path in &mut self.paths {
            if path.handle == *handle {
                path.acked = acked;
                found = true;
            }
        }
        if found {
            self.prune_buffer();
        }
    }

    /// Process a NACK from one consumer.
    ///
    /// `seqs` must be sorted ascending. A leading 0 requests a fresh
    /// handshake. Everything before the first missing sequence number counts
    /// as implicitly acknowledged; each requested event is either resent or
    /// answered with `RetransmitFailed` if it was already pruned.
    pub fn handle_nack(
        &mut self,
        handle: &H,
        seqs: &[SequenceNumber],
        link: &mut impl ProducerLink<H, P>,
    ) {
        let Some(&first) = seqs.first() else {
            return;
        };
        let Some(path) = self.find_path(handle) else {
            return;
        };
        if first == 0 {
            let offset = path.offset;
            link.transmit(handle, ProducerMessage::Handshake { first_seq: offset });
            return;
        }
        self.handle_ack(handle, first - 1);
        for &seq in seqs {
            match self.find_event(seq) {
                Some(event) => link.transmit(
                    handle,
                    ProducerMessage::Event {
                        seq: event.seq,
                        payload: event.payload.clone(),
                    },
                ),
                None => link.transmit(handle, ProducerMessage::RetransmitFailed { seq }),
            }
        }
    }

    /// Whether every path acknowledged the most recent event.
    pub fn idle(&self) -> bool {
        self.paths.iter().all(|p| p.acked == self.seq)
    }

    /// Sequence number of the most recently produced event.
    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    /// Number of events awaiting acknowledgment.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// The buffered events, in sequence order.
    pub fn buf(&self) -> &VecDeque<BufferedEvent<P>> {
        &self.buf
    }

    /// The registered paths.
    pub fn paths(&self) -> &[Path<H>] {
        &self.paths
    }

    /// Find the path for a handle.
    pub fn find_path(&self, handle: &H) -> Option<&Path<H>> {
        self.paths.iter().find(|p| p.handle == *handle)
    }

    fn find_event(&self, seq: SequenceNumber) -> Option<&BufferedEvent<P>> {
        self.buf.iter().find(|e| e.seq == seq)
    }

    /// Drop events acknowledged by all paths.
    fn prune_buffer(&mut self) {
        let min_acked = self
            .paths
            .iter()
            .map(|p| p.acked)
            .min()
            .unwrap_or(self.seq);
        while let Some(front) = self.buf.front() {
            if front.seq <= min_acked {
                self.buf.pop_front();
            } else {
                break;
            }
        }
    }
}

//! Consumer half of the reliable channel.

use super::{ConsumerMessage, SequenceNumber};
use std::collections::VecDeque;

/// Default number of ticks between cumulative ACKs.
pub const DEFAULT_ACK_INTERVAL: u64 = 1;

/// Default number of idle ticks before the consumer emits a NACK.
pub const DEFAULT_NACK_TIMEOUT: u64 = 5;

/// Delivers payloads to the application and carries replies back to the
/// producer.
pub trait ConsumerLink<P> {
    /// Hand one in-order payload to the application.
    fn deliver(&mut self, payload: P);

    /// Send a message back to the producer.
    fn reply(&mut self, msg: ConsumerMessage);
}

/// The receiving half of a channel.
///
/// Keeps out-of-order events in a reorder buffer sorted by sequence number;
/// every buffered entry has a sequence number greater than `next_seq`.
/// The cadence of ACK and NACK messages is driven by an external periodic
/// `tick`; the consumer itself is passive.
#[derive(Debug)]
pub struct Consumer<P> {
    /// Sequence number of the next event to deliver; 0 until the handshake
    /// arrived.
    next_seq: SequenceNumber,
    /// Out-of-order events, sorted by sequence number, deduplicated.
    buf: VecDeque<(SequenceNumber, P)>,
    /// Tick counter.
    tick: u64,
    /// Value of `next_seq` at the previous tick.
    last_tick_seq: SequenceNumber,
    /// Ticks without progress.
    idle_ticks: u64,
    /// Frequency of ACK messages in ticks (never 0).
    ack_interval: u64,
    /// Idle ticks before a NACK is sent.
    nack_timeout: u64,
}

impl<P> Default for Consumer<P> {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_INTERVAL, DEFAULT_NACK_TIMEOUT)
    }
}

impl<P> Consumer<P> {
    /// Create a consumer with the given tick cadence parameters.
    pub fn new(ack_interval: u64, nack_timeout: u64) -> Self {
        Self {
            next_seq: 0,
            buf: VecDeque::new(),
            tick: 0,
            last_tick_seq: 0,
            idle_ticks: 0,
            ack_interval: ack_interval.max(1),
            nack_timeout: nack_timeout.max(1),
        }
    }

    /// Process the producer's handshake.
    ///
    /// Handshakes older than current progress are ignored; they are retries
    /// the producer sent in response to a NACK for sequence number 0.
    pub fn handle_handshake(&mut self, first_seq: SequenceNumber, link: &mut impl ConsumerLink<P>) {
        if first_seq > self.next_seq {
            self.next_seq = first_seq;
            self.drain_buffer(link);
        }
    }

    /// Process one event.
    ///
    /// In-order events are delivered immediately, followed by any buffered
    /// successors. Future events land in the reorder buffer; events below
    /// `next_seq` are duplicates from a NACK retransmission and dropped.
    pub fn handle_event(&mut self, seq: SequenceNumber, payload: P, link: &mut impl ConsumerLink<P>) {
        if self.next_seq == seq {
            link.deliver(payload);
            self.next_seq += 1;
            self.drain_buffer(link);
        } else if seq > self.next_seq {
            let idx = self.buf.partition_point(|(s, _)| *s < seq);
            match self.buf.get(idx) {
                Some((existing, _)) if *existing == seq => {} // duplicate
                _ => self.buf.insert(idx, (seq, payload)),
            }
        }
    }

    /// Note that the producer cannot retransmit `seq`.
    ///
    /// Returns true when the gap is fatal for this consumer, i.e. the event
    /// has not been delivered yet. The supervising layer reacts by
    /// signaling stale data upward.
    pub fn handle_retransmit_failed(&mut self, seq: SequenceNumber) -> bool {
        seq >= self.next_seq && self.next_seq > 0
    }

    /// Advance the tick counter and emit ACK/NACK messages as due.
    pub fn tick(&mut self, link: &mut impl ConsumerLink<P>) {
        let progressed = self.next_seq > self.last_tick_seq;
        self.last_tick_seq = self.next_seq;
        self.tick += 1;
        if progressed {
            self.idle_ticks = 0;
            if self.tick % self.ack_interval == 0 {
                self.send_ack(link);
            }
            return;
        }
        self.idle_ticks += 1;
        if !self.buf.is_empty() && self.idle_ticks >= self.nack_timeout {
            self.idle_ticks = 0;
            link.reply(ConsumerMessage::Nack {
                seqs: self.missing_seqs(),
            });
            return;
        }
        if self.tick % self.ack_interval == 0 {
            self.send_ack(link);
        }
    }

    /// Sequence number of the next event to deliver.
    pub fn next_seq(&self) -> SequenceNumber {
        self.next_seq
    }

    /// Number of buffered out-of-order events.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// The reorder buffer, sorted by sequence number.
    pub fn buf(&self) -> &VecDeque<(SequenceNumber, P)> {
        &self.buf
    }

    /// Current idle tick count.
    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks
    }

    /// Compute the gap-fill list: every sequence number missing between
    /// `next_seq` and the highest buffered one.
    fn missing_seqs(&self) -> Vec<SequenceNumber> {
        let mut seqs = Vec::new();
        let mut expected = self.next_seq;
        for (seq, _) in &self.buf {
            while expected < *seq {
                seqs.push(expected);
                expected += 1;
            }
            expected = seq + 1;
        }
        seqs
    }

    fn drain_buffer(&mut self, link: &mut impl ConsumerLink<P>) {
        while let Some((seq, _)) = self.buf.front() {
            if *seq == self.next_seq {
                let (_, payload) = self.buf.pop_front().expect("non-empty front");
                link.deliver(payload);
                self.next_seq += 1;
            } else if *seq < self.next_seq {
                // Outdated by a newer handshake.
                self.buf.pop_front();
            } else {
                break;
            }
        }
    }

    fn send_ack(&self, link: &mut impl ConsumerLink<P>) {
        link.reply(ConsumerMessage::CumulativeAck {
            seq: self.next_seq.saturating_sub(1),
        });
    }
}

//! Tests for the reliable ordered channel.

use broker::channel::{
    ChannelError, Consumer, ConsumerLink, ConsumerMessage, Producer, ProducerLink,
    ProducerMessage, SequenceNumber,
};

// ============================================================================
// Harness
// ============================================================================

/// Records every message the producer transmits, per consumer handle.
#[derive(Default)]
struct Wire {
    sent: Vec<(u32, ProducerMessage<String>)>,
}

impl ProducerLink<u32, String> for Wire {
    fn transmit(&mut self, to: &u32, msg: ProducerMessage<String>) {
        self.sent.push((*to, msg));
    }
}

impl Wire {
    fn events_for(&self, handle: u32) -> Vec<SequenceNumber> {
        self.sent
            .iter()
            .filter_map(|(to, msg)| match msg {
                ProducerMessage::Event { seq, .. } if *to == handle => Some(*seq),
                _ => None,
            })
            .collect()
    }

    fn handshakes_for(&self, handle: u32) -> Vec<SequenceNumber> {
        self.sent
            .iter()
            .filter_map(|(to, msg)| match msg {
                ProducerMessage::Handshake { first_seq } if *to == handle => Some(*first_seq),
                _ => None,
            })
            .collect()
    }

    fn failures_for(&self, handle: u32) -> Vec<SequenceNumber> {
        self.sent
            .iter()
            .filter_map(|(to, msg)| match msg {
                ProducerMessage::RetransmitFailed { seq } if *to == handle => Some(*seq),
                _ => None,
            })
            .collect()
    }
}

/// Records deliveries and replies on the consumer side.
#[derive(Default)]
struct Sink {
    delivered: Vec<String>,
    replies: Vec<ConsumerMessage>,
}

impl ConsumerLink<String> for Sink {
    fn deliver(&mut self, payload: String) {
        self.delivered.push(payload);
    }

    fn reply(&mut self, msg: ConsumerMessage) {
        self.replies.push(msg);
    }
}

impl Sink {
    fn acks(&self) -> Vec<SequenceNumber> {
        self.replies
            .iter()
            .filter_map(|msg| match msg {
                ConsumerMessage::CumulativeAck { seq } => Some(*seq),
                _ => None,
            })
            .collect()
    }

    fn nacks(&self) -> Vec<Vec<SequenceNumber>> {
        self.replies
            .iter()
            .filter_map(|msg| match msg {
                ConsumerMessage::Nack { seqs } => Some(seqs.clone()),
                _ => None,
            })
            .collect()
    }
}

fn payload(n: u64) -> String {
    format!("payload-{}", n)
}

// ============================================================================
// Producer
// ============================================================================

#[test]
fn producer_assigns_monotone_sequence_numbers() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();

    for i in 1..=5 {
        producer.produce(payload(i), &mut wire);
    }
    assert_eq!(producer.seq(), 5);
    assert_eq!(wire.events_for(1), vec![1, 2, 3, 4, 5]);
}

#[test]
fn producer_fans_out_to_all_paths() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    producer.add(2, &mut wire).unwrap();

    producer.produce(payload(1), &mut wire);
    assert_eq!(wire.events_for(1), vec![1]);
    assert_eq!(wire.events_for(2), vec![1]);
}

#[test]
fn producer_rejects_duplicate_consumers() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    assert_eq!(producer.add(1, &mut wire), Err(ChannelError::ConsumerExists));
}

#[test]
fn producer_handshake_carries_next_sequence_number() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    producer.produce(payload(1), &mut wire);
    producer.produce(payload(2), &mut wire);
    // A consumer attaching later only sees events from its offset on.
    producer.add(2, &mut wire).unwrap();

    assert_eq!(wire.handshakes_for(1), vec![1]);
    assert_eq!(wire.handshakes_for(2), vec![3]);
}

#[test]
fn producer_buffer_holds_exactly_the_unacked_events() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    producer.add(2, &mut wire).unwrap();

    for i in 1..=6 {
        producer.produce(payload(i), &mut wire);
    }
    assert_eq!(producer.buffer_len(), 6);

    producer.handle_ack(&1, 4);
    // Path 2 has acked nothing; everything stays buffered.
    assert_eq!(producer.buffer_len(), 6);

    producer.handle_ack(&2, 2);
    // min acked is now 2.
    let buffered: Vec<u64> = producer.buf().iter().map(|e| e.seq).collect();
    assert_eq!(buffered, vec![3, 4, 5, 6]);

    producer.handle_ack(&2, 6);
    let buffered: Vec<u64> = producer.buf().iter().map(|e| e.seq).collect();
    assert_eq!(buffered, vec![5, 6]);
}

#[test]
fn producer_tolerates_acks_beyond_the_current_head() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    producer.produce(payload(1), &mut wire);

    producer.handle_ack(&1, 999);
    assert!(producer.idle());
    assert_eq!(producer.buffer_len(), 0);

    // An ack of zero means "nothing delivered yet".
    producer.handle_ack(&1, 0);
    assert!(!producer.idle());
}

#[test]
fn producer_idle_requires_all_paths_caught_up() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    producer.add(2, &mut wire).unwrap();
    assert!(producer.idle());

    producer.produce(payload(1), &mut wire);
    assert!(!producer.idle());

    producer.handle_ack(&1, 1);
    assert!(!producer.idle());
    producer.handle_ack(&2, 1);
    assert!(producer.idle());
}

#[test]
fn producer_nack_zero_resends_the_handshake() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.produce(payload(1), &mut wire);
    producer.add(1, &mut wire).unwrap();

    producer.handle_nack(&1, &[0], &mut wire);
    assert_eq!(wire.handshakes_for(1), vec![2, 2]);
}

#[test]
fn producer_nack_retransmits_or_reports_failure() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    producer.add(2, &mut wire).unwrap();
    for i in 1..=4 {
        producer.produce(payload(i), &mut wire);
    }
    // Both paths ack everything; the buffer is pruned.
    producer.handle_ack(&1, 4);
    producer.handle_ack(&2, 4);
    assert_eq!(producer.buffer_len(), 0);

    // Path 1 regressed somehow and asks for 2; it is gone for good.
    producer.handle_nack(&1, &[2], &mut wire);
    assert_eq!(wire.failures_for(1), vec![2]);
}

#[test]
fn producer_nack_implies_ack_below_the_first_gap() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    for i in 1..=5 {
        producer.produce(payload(i), &mut wire);
    }

    let before = wire.events_for(1).len();
    producer.handle_nack(&1, &[3, 4], &mut wire);

    // Events 1 and 2 count as delivered; 3 and 4 were retransmitted.
    let buffered: Vec<u64> = producer.buf().iter().map(|e| e.seq).collect();
    assert_eq!(buffered, vec![3, 4, 5]);
    assert_eq!(wire.events_for(1).len(), before + 2);
}

#[test]
fn producer_drops_paths_cleanly() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    producer.add(1, &mut wire).unwrap();
    producer.add(2, &mut wire).unwrap();
    producer.produce(payload(1), &mut wire);
    producer.handle_ack(&1, 1);

    // Removing the laggard prunes what only it was holding back.
    assert!(producer.remove(&2));
    assert_eq!(producer.buffer_len(), 0);
    assert!(producer.idle());
    assert!(!producer.remove(&2));
}

// ============================================================================
// Consumer
// ============================================================================

#[test]
fn consumer_delivers_in_order_after_handshake() {
    let mut consumer = Consumer::<String>::default();
    let mut sink = Sink::default();

    consumer.handle_handshake(1, &mut sink);
    for i in 1..=3 {
        consumer.handle_event(i, payload(i), &mut sink);
    }
    assert_eq!(sink.delivered, vec![payload(1), payload(2), payload(3)]);
    assert_eq!(consumer.next_seq(), 4);
}

#[test]
fn consumer_reorders_and_deduplicates() {
    let mut consumer = Consumer::<String>::default();
    let mut sink = Sink::default();
    consumer.handle_handshake(1, &mut sink);

    consumer.handle_event(3, payload(3), &mut sink);
    consumer.handle_event(2, payload(2), &mut sink);
    consumer.handle_event(3, payload(3), &mut sink);
    assert!(sink.delivered.is_empty());
    assert_eq!(consumer.buffer_len(), 2);

    // The buffer is sorted and every entry is above next_seq.
    let buffered: Vec<u64> = consumer.buf().iter().map(|(seq, _)| *seq).collect();
    assert_eq!(buffered, vec![2, 3]);

    consumer.handle_event(1, payload(1), &mut sink);
    assert_eq!(sink.delivered, vec![payload(1), payload(2), payload(3)]);
    assert_eq!(consumer.buffer_len(), 0);
}

#[test]
fn consumer_drops_stale_events() {
    let mut consumer = Consumer::<String>::default();
    let mut sink = Sink::default();
    consumer.handle_handshake(1, &mut sink);
    consumer.handle_event(1, payload(1), &mut sink);

    // A duplicate from a retransmission changes nothing.
    consumer.handle_event(1, payload(1), &mut sink);
    assert_eq!(sink.delivered.len(), 1);
    assert_eq!(consumer.next_seq(), 2);
}

#[test]
fn consumer_ignores_handshake_retries() {
    let mut consumer = Consumer::<String>::default();
    let mut sink = Sink::default();
    consumer.handle_handshake(1, &mut sink);
    for i in 1..=3 {
        consumer.handle_event(i, payload(i), &mut sink);
    }
    consumer.handle_handshake(1, &mut sink);
    assert_eq!(consumer.next_seq(), 4);
}

#[test]
fn consumer_first_ack_after_handshake_is_zero() {
    let mut consumer = Consumer::<String>::default();
    let mut sink = Sink::default();
    consumer.handle_handshake(1, &mut sink);

    consumer.tick(&mut sink);
    assert_eq!(sink.acks(), vec![0]);
}

#[test]
fn consumer_acks_progress_on_the_ack_interval() {
    let mut consumer = Consumer::<String>::new(2, 5);
    let mut sink = Sink::default();
    consumer.handle_handshake(1, &mut sink);
    consumer.handle_event(1, payload(1), &mut sink);

    consumer.tick(&mut sink);
    assert!(sink.acks().is_empty());
    consumer.handle_event(2, payload(2), &mut sink);
    consumer.tick(&mut sink);
    assert_eq!(sink.acks(), vec![2]);
}

#[test]
fn consumer_nacks_gaps_after_idle_timeout() {
    let mut consumer = Consumer::<String>::new(1, 3);
    let mut sink = Sink::default();
    consumer.handle_handshake(1, &mut sink);

    consumer.handle_event(1, payload(1), &mut sink);
    consumer.handle_event(2, payload(2), &mut sink);
    consumer.handle_event(5, payload(5), &mut sink);
    consumer.handle_event(7, payload(7), &mut sink);

    // First tick sees progress; the idle counter starts after that.
    consumer.tick(&mut sink);
    for _ in 0..3 {
        consumer.tick(&mut sink);
    }
    assert_eq!(sink.nacks(), vec![vec![3, 4, 6]]);
}

#[test]
fn consumer_nack_before_handshake_requests_one() {
    let mut consumer = Consumer::<String>::new(1, 2);
    let mut sink = Sink::default();

    // Events before any handshake pile up in the buffer.
    consumer.handle_event(2, payload(2), &mut sink);
    consumer.tick(&mut sink);
    consumer.tick(&mut sink);

    // The gap list starts at zero, which asks for a fresh handshake.
    let nacks = sink.nacks();
    assert_eq!(nacks.len(), 1);
    assert_eq!(nacks[0][0], 0);
}

#[test]
fn consumer_flags_fatal_gaps() {
    let mut consumer = Consumer::<String>::default();
    let mut sink = Sink::default();
    consumer.handle_handshake(1, &mut sink);
    consumer.handle_event(1, payload(1), &mut sink);

    assert!(!consumer.handle_retransmit_failed(1));
    assert!(consumer.handle_retransmit_failed(2));
}

// ============================================================================
// Producer/Consumer End-to-End
// ============================================================================

/// Feed every recorded producer message for `handle` into the consumer,
/// except the sequence numbers in `drop`.
fn replay(
    wire: &Wire,
    handle: u32,
    drop: &[SequenceNumber],
    consumer: &mut Consumer<String>,
    sink: &mut Sink,
) {
    for (to, msg) in &wire.sent {
        if *to != handle {
            continue;
        }
        match msg {
            ProducerMessage::Handshake { first_seq } => {
                consumer.handle_handshake(*first_seq, sink);
            }
            ProducerMessage::Event { seq, payload } => {
                if !drop.contains(seq) {
                    consumer.handle_event(*seq, payload.clone(), sink);
                }
            }
            ProducerMessage::RetransmitFailed { .. } => {}
        }
    }
}

#[test]
fn nack_driven_retransmission_recovers_the_gap() {
    let mut producer = Producer::<u32, String>::new();
    let mut wire = Wire::default();
    let mut consumer = Consumer::<String>::new(1, 3);
    let mut sink = Sink::default();

    producer.add(1, &mut wire).unwrap();
    for i in 1..=5 {
        producer.produce(payload(i), &mut wire);
    }

    // Deliver everything except event 3.
    replay(&wire, 1, &[3], &mut consumer, &mut sink);
    assert_eq!(sink.delivered, vec![payload(1), payload(2)]);

    // Ticks without progress eventually trigger the NACK.
    sink.replies.clear();
    consumer.tick(&mut sink);
    consumer.tick(&mut sink);
    consumer.tick(&mut sink);
    consumer.tick(&mut sink);
    let nacks = sink.nacks();
    assert_eq!(nacks, vec![vec![3]]);

    // The producer retransmits; the consumer drains its buffer in order.
    wire.sent.clear();
    producer.handle_nack(&1, &nacks[0], &mut wire);
    replay(&wire, 1, &[], &mut consumer, &mut sink);
    assert_eq!(
        sink.delivered,
        vec![payload(1), payload(2), payload(3), payload(4), payload(5)]
    );

    // The next ack tick acknowledges the full prefix.
    sink.replies.clear();
    consumer.tick(&mut sink);
    assert_eq!(sink.acks(), vec![5]);

    producer.handle_ack(&1, 5);
    assert!(producer.idle());
    assert_eq!(producer.buffer_len(), 0);
}

#[test]
fn delivery_is_a_prefix_under_any_arrival_order() {
    let orders: [&[SequenceNumber]; 4] = [
        &[1, 2, 3, 4, 5],
        &[5, 4, 3, 2, 1],
        &[2, 1, 4, 3, 5],
        &[3, 5, 1, 4, 2],
    ];
    for order in orders {
        let mut producer = Producer::<u32, String>::new();
        let mut wire = Wire::default();
        producer.add(1, &mut wire).unwrap();
        for i in 1..=5 {
            producer.produce(payload(i), &mut wire);
        }

        let mut consumer = Consumer::<String>::default();
        let mut sink = Sink::default();
        consumer.handle_handshake(1, &mut sink);
        for seq in order {
            consumer.handle_event(*seq, payload(*seq), &mut sink);
        }
        let expected: Vec<String> = (1..=5).map(payload).collect();
        assert_eq!(sink.delivered, expected, "order {:?}", order);
    }
}

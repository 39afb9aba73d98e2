//! Publisher frontend with demand management.
//!
//! A publisher pairs a bounded queue with a background worker that drains
//! it into the endpoint core. The application side may block when the
//! queue is full; the worker keeps a 10-second moving average of its
//! throughput that `send_rate` reports.

use super::queue::PublisherQueue;
use crate::data::{Data, DataMessage, Topic};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// How many items the publisher queue holds.
const QUEUE_SIZE: usize = 30;

/// How many one-second samples the send-rate average spans.
const RATE_SAMPLE_SIZE: usize = 10;

/// Batch size of one worker drain.
const DRAIN_BATCH: usize = 32;

/// Moving average over the per-second consumption counters.
struct RateEstimator {
    samples: Vec<usize>,
    counter: usize,
}

impl RateEstimator {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(RATE_SAMPLE_SIZE),
            counter: 0,
        }
    }

    fn record(&mut self, consumed: usize) {
        self.counter += consumed;
    }

    /// Roll the current second into the window and return the new average.
    fn tick(&mut self) -> usize {
        if self.samples.len() < RATE_SAMPLE_SIZE {
            self.samples.push(self.counter);
        } else {
            self.samples.rotate_left(1);
            if let Some(last) = self.samples.last_mut() {
                *last = self.counter;
            }
        }
        self.counter = 0;
        if self.samples.is_empty() {
            0
        } else {
            self.samples.iter().sum::<usize>() / self.samples.len()
        }
    }
}

/// Asynchronously publishes values on a fixed topic.
pub struct Publisher {
    topic: Topic,
    queue: Arc<PublisherQueue<Data>>,
    worker: Option<tokio::task::JoinHandle<()>>,
    drop_on_destruction: bool,
}

impl Publisher {
    pub(crate) fn new(topic: Topic, core: mpsc::UnboundedSender<DataMessage>) -> std::io::Result<Self> {
        let queue = Arc::new(PublisherQueue::new(QUEUE_SIZE)?);
        let worker = tokio::spawn(worker_loop(topic.clone(), Arc::clone(&queue), core));
        Ok(Self {
            topic,
            queue,
            worker: Some(worker),
            drop_on_destruction: false,
        })
    }

    /// The topic this publisher emits on.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// How many items can be sent right away without blocking.
    pub fn demand(&self) -> usize {
        self.free_capacity()
    }

    /// Current size of the output queue.
    pub fn buffered(&self) -> usize {
        self.queue.buffer_size()
    }

    /// Capacity of the output queue.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// How many items fit before `publish` starts blocking.
    pub fn free_capacity(&self) -> usize {
        let capacity = self.capacity();
        let buffered = self.buffered();
        capacity.saturating_sub(buffered)
    }

    /// Rough estimate of the per-second throughput.
    pub fn send_rate(&self) -> usize {
        self.queue.rate()
    }

    /// Readiness descriptor: readable while the queue has free capacity.
    pub fn fd(&self) -> RawFd {
        self.queue.fd()
    }

    /// Drop all queued items instead of draining them on destruction.
    pub fn drop_all_on_destruction(&mut self) {
        self.drop_on_destruction = true;
    }

    /// Send one value to all subscribers. Blocks while the queue is full.
    pub fn publish(&self, data: impl Into<Data>) {
        self.queue.produce(data.into());
    }

    /// Send a batch of values, chunked by the queue capacity.
    pub fn publish_batch(&self, batch: Vec<Data>) {
        for data in batch {
            self.queue.produce(data);
        }
    }

    /// Release the worker, rendering the publisher inert. Queued items are
    /// drained unless `drop_all_on_destruction` was requested. Repeated
    /// calls are no-ops.
    pub fn reset(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.drop_on_destruction {
            worker.abort();
        } else {
            self.queue.shutdown();
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("buffered", &self.buffered())
            .finish()
    }
}

/// Drains the queue into the core and maintains the send-rate average.
async fn worker_loop(
    topic: Topic,
    queue: Arc<PublisherQueue<Data>>,
    core: mpsc::UnboundedSender<DataMessage>,
) {
    let mut rate = RateEstimator::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            batch = queue.consume(DRAIN_BATCH) => {
                if batch.is_empty() {
                    // Shutdown with a drained queue.
                    break;
                }
                rate.record(batch.len());
                for data in batch {
                    if core.send(DataMessage::new(topic.clone(), data)).is_err() {
                        debug!(topic = %topic, "endpoint core is gone, stopping publisher");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                queue.set_rate(rate.tick());
            }
        }
    }
}

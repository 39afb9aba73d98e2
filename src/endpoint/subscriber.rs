//! Subscriber frontends.

use super::queue::SubscriberQueue;
use super::status::StatusMessage;
use crate::data::DataMessage;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Default queue size of a subscriber.
pub const DEFAULT_QUEUE_SIZE: usize = 20;

/// Removes the subscription when the frontend is dropped.
pub(crate) trait Unsubscriber: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

/// Receives messages whose topic matches one of the subscribed prefixes.
pub struct Subscriber {
    id: u64,
    queue: Arc<SubscriberQueue<DataMessage>>,
    core: Arc<dyn Unsubscriber>,
}

impl Subscriber {
    pub(crate) fn new(
        id: u64,
        queue: Arc<SubscriberQueue<DataMessage>>,
        core: Arc<dyn Unsubscriber>,
    ) -> Self {
        Self { id, queue, core }
    }

    /// Block until the next message arrives.
    pub fn get(&self) -> DataMessage {
        self.queue.pop_blocking()
    }

    /// Wait for the next message, up to `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<DataMessage> {
        self.queue.pop_timeout(timeout)
    }

    /// Collect up to `n` messages, blocking until at least one arrived.
    pub fn get_n(&self, n: usize) -> Vec<DataMessage> {
        if n == 0 {
            return Vec::new();
        }
        let mut messages = vec![self.queue.pop_blocking()];
        while messages.len() < n {
            match self.queue.try_pop() {
                Some(msg) => messages.push(msg),
                None => break,
            }
        }
        messages
    }

    /// Collect up to `n` messages within `timeout`.
    pub fn get_n_timeout(&self, n: usize, timeout: Duration) -> Vec<DataMessage> {
        let deadline = std::time::Instant::now() + timeout;
        let mut messages = Vec::new();
        while messages.len() < n {
            let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now()) else {
                break;
            };
            match self.queue.pop_timeout(remaining) {
                Some(msg) => messages.push(msg),
                None => break,
            }
        }
        messages
    }

    /// Take all pending messages without blocking.
    pub fn poll(&self) -> Vec<DataMessage> {
        self.queue.pop_all()
    }

    /// Number of pending messages.
    pub fn available(&self) -> usize {
        self.queue.available()
    }

    /// Readiness descriptor for `select`/`poll` integration.
    pub fn fd(&self) -> RawFd {
        self.queue.fd()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.core.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("available", &self.available())
            .finish()
    }
}

/// Receives errors, and optionally peering statuses, from the endpoint.
pub struct StatusSubscriber {
    id: u64,
    queue: Arc<SubscriberQueue<StatusMessage>>,
    core: Arc<dyn Unsubscriber>,
}

impl StatusSubscriber {
    pub(crate) fn new(
        id: u64,
        queue: Arc<SubscriberQueue<StatusMessage>>,
        core: Arc<dyn Unsubscriber>,
    ) -> Self {
        Self { id, queue, core }
    }

    /// Block until the next status or error arrives.
    pub fn get(&self) -> StatusMessage {
        self.queue.pop_blocking()
    }

    /// Wait for the next status or error, up to `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<StatusMessage> {
        self.queue.pop_timeout(timeout)
    }

    /// Take all pending entries without blocking.
    pub fn poll(&self) -> Vec<StatusMessage> {
        self.queue.pop_all()
    }

    /// Number of pending entries.
    pub fn available(&self) -> usize {
        self.queue.available()
    }

    /// Readiness descriptor for `select`/`poll` integration.
    pub fn fd(&self) -> RawFd {
        self.queue.fd()
    }
}

impl Drop for StatusSubscriber {
    fn drop(&mut self) {
        self.core.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for StatusSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSubscriber")
            .field("id", &self.id)
            .field("available", &self.available())
            .finish()
    }
}

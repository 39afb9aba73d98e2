//! Shared queues between application threads and endpoint workers.
//!
//! Each queue is crossed by exactly two parties: the application on one
//! side and a worker task on the other. A [`Flare`] gives the application
//! side a readiness file descriptor that integrates with `select`/`poll`
//! loops; worker tasks are woken through an async notifier instead.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tokio::sync::Notify;

/// A readiness signal backed by a socket pair.
///
/// `fire` makes the read end readable; `extinguish` consumes pending
/// readiness bytes. Access to the guarded resource itself must still be
/// synchronized separately.
#[derive(Debug)]
pub struct Flare {
    read: UnixStream,
    write: UnixStream,
}

impl Flare {
    pub fn new() -> std::io::Result<Self> {
        let (read, write) = UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        Ok(Self { read, write })
    }

    /// File descriptor that becomes readable once fired.
    pub fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Put the flare into the ready state, `num` times.
    pub fn fire(&self, num: usize) {
        let buf = [0u8; 64];
        let mut remaining = num;
        while remaining > 0 {
            let n = remaining.min(buf.len());
            match (&self.write).write(&buf[..n]) {
                Ok(written) if written > 0 => remaining -= written,
                // A full pipe still signals readiness; nothing lost.
                _ => break,
            }
        }
    }

    /// Consume up to `num` readiness bytes; returns how many were consumed.
    pub fn extinguish(&self, num: usize) -> usize {
        if let Err(e) = self.read.set_nonblocking(true) {
            tracing::warn!(error = %e, "flare mode switch failed");
            return 0;
        }
        let mut buf = [0u8; 64];
        let mut consumed = 0;
        while consumed < num {
            let n = (num - consumed).min(buf.len());
            match (&self.read).read(&mut buf[..n]) {
                Ok(read) if read > 0 => consumed += read,
                _ => break,
            }
        }
        consumed
    }

    /// Block until one readiness byte could be consumed.
    pub fn await_one(&self) {
        let _ = self.await_one_timeout(None);
    }

    /// Block until one readiness byte could be consumed or the timeout
    /// expires. Returns true when a byte was consumed.
    pub fn await_one_timeout(&self, timeout: Option<Duration>) -> bool {
        if self.read.set_nonblocking(false).is_err() {
            return false;
        }
        let _ = self.read.set_read_timeout(timeout);
        let mut buf = [0u8; 1];
        let got = matches!((&self.read).read(&mut buf), Ok(1));
        let _ = self.read.set_nonblocking(true);
        got
    }
}

/// Queue the application writes into and a worker task drains.
///
/// Writing past the capacity blocks the caller until the worker catches
/// up. The worker side is woken asynchronously.
#[derive(Debug)]
pub struct PublisherQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_full: Condvar,
    worker_wakeup: Notify,
    flare: Flare,
    capacity: usize,
    rate: std::sync::atomic::AtomicUsize,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl<T> PublisherQueue<T> {
    pub fn new(capacity: usize) -> std::io::Result<Self> {
        let flare = Flare::new()?;
        // Writable from the start.
        flare.fire(1);
        Ok(Self {
            items: Mutex::new(VecDeque::new()),
            not_full: Condvar::new(),
            worker_wakeup: Notify::new(),
            flare,
            capacity,
            rate: std::sync::atomic::AtomicUsize::new(0),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Readiness descriptor: readable while the queue has free capacity.
    pub fn fd(&self) -> RawFd {
        self.flare.fd()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.items.lock().len()
    }

    /// Rough throughput estimate, maintained by the worker.
    pub fn rate(&self) -> usize {
        self.rate.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_rate(&self, rate: usize) {
        self.rate.store(rate, std::sync::atomic::Ordering::Relaxed);
    }

    /// Whether the owning publisher started shutting down.
    pub fn shutting_down(&self) -> bool {
        self.shutting_down
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Mark the queue as shutting down and wake the worker for the final
    /// drain.
    pub fn shutdown(&self) {
        self.shutting_down
            .store(true, std::sync::atomic::Ordering::Relaxed);
        self.worker_wakeup.notify_one();
    }

    /// Append one item, blocking while the queue is at capacity.
    pub fn produce(&self, item: T) {
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            self.flare.extinguish(1);
            self.not_full.wait(&mut items);
        }
        items.push_back(item);
        if items.len() >= self.capacity {
            self.flare.extinguish(1);
        }
        drop(items);
        self.worker_wakeup.notify_one();
    }

    /// Worker side: take up to `max` items, waiting until at least one is
    /// available or the queue shuts down. Returns an empty batch only on
    /// shutdown.
    pub async fn consume(&self, max: usize) -> Vec<T> {
        loop {
            {
                let mut items = self.items.lock();
                if !items.is_empty() {
                    let n = items.len().min(max);
                    let batch: Vec<T> = items.drain(..n).collect();
                    if items.len() < self.capacity {
                        self.flare.fire(1);
                        self.not_full.notify_one();
                    }
                    return batch;
                }
                if self.shutting_down() {
                    return Vec::new();
                }
            }
            self.worker_wakeup.notified().await;
        }
    }
}

/// Queue a worker task fills and the application drains.
///
/// The flare carries one readiness byte per buffered item, so the
/// descriptor stays readable exactly while messages are pending. A full
/// queue drops the newest message; the overflow counter records it.
#[derive(Debug)]
pub struct SubscriberQueue<T> {
    items: Mutex<VecDeque<T>>,
    flare: Flare,
    max_size: usize,
    dropped: std::sync::atomic::AtomicU64,
}

impl<T> SubscriberQueue<T> {
    pub fn new(max_size: usize) -> std::io::Result<Self> {
        Ok(Self {
            items: Mutex::new(VecDeque::new()),
            flare: Flare::new()?,
            max_size: max_size.max(1),
            dropped: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Readiness descriptor: readable while messages are pending.
    pub fn fd(&self) -> RawFd {
        self.flare.fd()
    }

    /// Number of pending messages.
    pub fn available(&self) -> usize {
        self.items.lock().len()
    }

    /// Messages dropped due to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Worker side: append one item, dropping it when the queue is full.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() >= self.max_size {
            self.dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        }
        items.push_back(item);
        drop(items);
        self.flare.fire(1);
    }

    /// Take one message without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front();
        if item.is_some() {
            self.flare.extinguish(1);
        }
        item
    }

    /// Take all pending messages without blocking.
    pub fn pop_all(&self) -> Vec<T> {
        let mut items = self.items.lock();
        let batch: Vec<T> = items.drain(..).collect();
        self.flare.extinguish(batch.len());
        batch
    }

    /// Block until one message is available.
    pub fn pop_blocking(&self) -> T {
        loop {
            self.flare.await_one();
            let mut items = self.items.lock();
            if let Some(item) = items.pop_front() {
                return item;
            }
            // Raced with a poll; the byte we consumed was stale.
        }
    }

    /// Block until one message is available or the timeout expires.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            if !self.flare.await_one_timeout(Some(remaining)) {
                return self.try_pop();
            }
            let mut items = self.items.lock();
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flare_fire_and_extinguish() {
        let flare = Flare::new().unwrap();
        assert!(flare.fd() >= 0);

        flare.fire(3);
        assert_eq!(flare.extinguish(2), 2);
        assert_eq!(flare.extinguish(10), 1);
        assert_eq!(flare.extinguish(1), 0);
    }

    #[test]
    fn test_flare_await_with_timeout() {
        let flare = Flare::new().unwrap();
        assert!(!flare.await_one_timeout(Some(Duration::from_millis(20))));
        flare.fire(1);
        assert!(flare.await_one_timeout(Some(Duration::from_millis(20))));
    }

    #[test]
    fn test_subscriber_queue_drops_on_overflow() {
        let queue = SubscriberQueue::new(2).unwrap();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.available(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop_all(), vec![1, 2]);
        assert_eq!(queue.available(), 0);
    }

    #[test]
    fn test_subscriber_queue_timeout_pop() {
        let queue = SubscriberQueue::<u32>::new(4).unwrap();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
        queue.push(7);
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), Some(7));
    }

    #[tokio::test]
    async fn test_publisher_queue_hand_off() {
        let queue = PublisherQueue::new(8).unwrap();
        queue.produce(1u32);
        queue.produce(2u32);
        assert_eq!(queue.buffer_size(), 2);

        let batch = queue.consume(8).await;
        assert_eq!(batch, vec![1, 2]);
        assert_eq!(queue.buffer_size(), 0);
    }

    #[tokio::test]
    async fn test_publisher_queue_shutdown_returns_empty_batch() {
        let queue = PublisherQueue::<u32>::new(8).unwrap();
        queue.shutdown();
        assert!(queue.consume(8).await.is_empty());
    }
}

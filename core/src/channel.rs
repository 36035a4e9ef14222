//! Event channel
//!
//! Bounded multi-producer, single-consumer delivery of change records.
//! Submission never waits: when the buffer is full the record is either
//! dropped or routed to a fallback sink, depending on the channel-wide
//! [`OverflowPolicy`]. Every hook shares one channel, so every hook
//! follows the same policy.

use crate::event::{ChangeRecord, RECORD_SIZE};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{
    sync_channel, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Byte budget of the ring the channel stands in for
pub const EVENTS_RING_BYTES: usize = 1 << 22;

/// Default channel capacity in records
pub const DEFAULT_CHANNEL_CAPACITY: usize = EVENTS_RING_BYTES / RECORD_SIZE;

/// What to do with a record when the channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Lose the record (best-effort delivery, lowest per-event cost)
    #[default]
    Drop,
    /// Hand the record to the fallback sink (slower, no loss unless the
    /// sink itself fails)
    Fallback,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Drop => write!(f, "drop"),
            OverflowPolicy::Fallback => write!(f, "fallback"),
        }
    }
}

/// Outcome of one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Queued on the primary buffer
    Delivered,
    /// Primary buffer full, accepted by the fallback sink
    Fallback,
    /// Lost
    Dropped,
}

/// Secondary output path used under [`OverflowPolicy::Fallback`]
pub trait FallbackSink: Send + Sync {
    /// Emit a record; returns `false` if the sink could not take it
    fn emit(&self, record: &ChangeRecord) -> bool;
}

/// Fallback sink writing each record as a `tracing` event on target
/// `watchd::fallback`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFallback;

impl FallbackSink for TracingFallback {
    fn emit(&self, record: &ChangeRecord) -> bool {
        warn!(
            target: "watchd::fallback",
            kind = %record.kind,
            parent = %record.parent,
            subject = %record.subject,
            uid = record.uid,
            gid = record.gid,
            tty = %record.tty,
            before_size = record.before_size,
            after_size = record.after_size,
            filename = %record.filename,
            "event buffer full, record emitted on fallback path"
        );
        true
    }
}

/// Fallback sink collecting records in memory
#[derive(Debug, Default)]
pub struct CollectingFallback {
    records: Mutex<Vec<ChangeRecord>>,
}

impl CollectingFallback {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything collected so far
    pub fn drain(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl FallbackSink for CollectingFallback {
    fn emit(&self, record: &ChangeRecord) -> bool {
        self.records.lock().push(*record);
        true
    }
}

/// Delivery counters shared by both channel ends
#[derive(Debug, Default)]
pub struct ChannelStats {
    delivered: AtomicU64,
    fallback: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelCounters {
    pub delivered: u64,
    pub fallback: u64,
    pub dropped: u64,
}

impl ChannelStats {
    fn record(&self, delivery: Delivery) {
        let counter = match delivery {
            Delivery::Delivered => &self.delivered,
            Delivery::Fallback => &self.fallback,
            Delivery::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> ChannelCounters {
        ChannelCounters {
            delivered: self.delivered.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Producer end, cloned into every hook context
#[derive(Clone)]
pub struct EventChannel {
    tx: SyncSender<ChangeRecord>,
    overflow: OverflowPolicy,
    fallback: Arc<dyn FallbackSink>,
    stats: Arc<ChannelStats>,
}

/// Consumer end
pub struct EventReceiver {
    rx: Receiver<ChangeRecord>,
    stats: Arc<ChannelStats>,
}

/// Create a channel holding at most `capacity` undelivered records.
///
/// A zero capacity is raised to one; a rendezvous channel would make every
/// submission without a waiting consumer overflow.
pub fn channel(capacity: usize, overflow: OverflowPolicy) -> (EventChannel, EventReceiver) {
    let (tx, rx) = sync_channel(capacity.max(1));
    let stats = Arc::new(ChannelStats::default());

    (
        EventChannel {
            tx,
            overflow,
            fallback: Arc::new(TracingFallback),
            stats: stats.clone(),
        },
        EventReceiver { rx, stats },
    )
}

impl EventChannel {
    /// Replace the fallback sink
    pub fn with_fallback(mut self, sink: Arc<dyn FallbackSink>) -> Self {
        self.fallback = sink;
        self
    }

    /// Overflow policy in force
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Submit a record without waiting
    pub fn submit(&self, record: ChangeRecord) -> Delivery {
        let delivery = match self.tx.try_send(record) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(record)) => self.spill(&record),
            Err(TrySendError::Disconnected(_)) => {
                debug!("event consumer gone, record dropped");
                Delivery::Dropped
            }
        };
        self.stats.record(delivery);
        delivery
    }

    fn spill(&self, record: &ChangeRecord) -> Delivery {
        match self.overflow {
            OverflowPolicy::Drop => {
                debug!(
                    kind = %record.kind,
                    subject = %record.subject,
                    "event buffer full, record dropped"
                );
                Delivery::Dropped
            }
            OverflowPolicy::Fallback if self.fallback.emit(record) => Delivery::Fallback,
            OverflowPolicy::Fallback => Delivery::Dropped,
        }
    }

    /// Delivery counters
    pub fn stats(&self) -> ChannelCounters {
        self.stats.snapshot()
    }
}

impl EventReceiver {
    /// Wait up to `timeout` for the next record. `None` on timeout or when
    /// every producer is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeRecord> {
        match self.rx.recv_timeout(timeout) {
            Ok(record) => Some(record),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next record if one is queued
    pub fn try_recv(&self) -> Option<ChangeRecord> {
        match self.rx.try_recv() {
            Ok(record) => Some(record),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Everything currently queued, in arrival order
    pub fn drain(&self) -> Vec<ChangeRecord> {
        self.rx.try_iter().collect()
    }

    /// Delivery counters
    pub fn stats(&self) -> ChannelCounters {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeKind, FileName};
    use crate::key::EntityKey;
    use std::time::Instant;

    fn record(n: u64) -> ChangeRecord {
        ChangeRecord::new(
            ChangeKind::Create,
            EntityKey::new(1, 1),
            EntityKey::new(n, 1),
            FileName::from("f"),
        )
    }

    #[test]
    fn test_default_capacity_fits_ring() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, (1 << 22) / 336);
        assert!(DEFAULT_CHANNEL_CAPACITY * RECORD_SIZE <= EVENTS_RING_BYTES);
    }

    #[test]
    fn test_submit_and_receive_in_order() {
        let (tx, rx) = channel(8, OverflowPolicy::Drop);
        for n in 0..3 {
            assert_eq!(tx.submit(record(n)), Delivery::Delivered);
        }

        let inodes: Vec<u64> = rx.drain().iter().map(|r| r.subject.inode_number).collect();
        assert_eq!(inodes, vec![0, 1, 2]);
        assert_eq!(rx.stats().delivered, 3);
    }

    #[test]
    fn test_full_channel_drops() {
        let (tx, rx) = channel(2, OverflowPolicy::Drop);
        assert_eq!(tx.submit(record(1)), Delivery::Delivered);
        assert_eq!(tx.submit(record(2)), Delivery::Delivered);
        assert_eq!(tx.submit(record(3)), Delivery::Dropped);

        assert_eq!(rx.drain().len(), 2);
        assert_eq!(
            tx.stats(),
            ChannelCounters {
                delivered: 2,
                fallback: 0,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_full_channel_fallback() {
        let sink = Arc::new(CollectingFallback::new());
        let (tx, _rx) = channel(1, OverflowPolicy::Fallback);
        let tx = tx.with_fallback(sink.clone());

        assert_eq!(tx.submit(record(1)), Delivery::Delivered);
        assert_eq!(tx.submit(record(2)), Delivery::Fallback);

        let spilled = sink.drain();
        assert_eq!(spilled.len(), 1);
        assert_eq!(spilled[0].subject.inode_number, 2);
    }

    struct RefusingSink;

    impl FallbackSink for RefusingSink {
        fn emit(&self, _record: &ChangeRecord) -> bool {
            false
        }
    }

    #[test]
    fn test_failing_fallback_drops() {
        let (tx, _rx) = channel(1, OverflowPolicy::Fallback);
        let tx = tx.with_fallback(Arc::new(RefusingSink));

        tx.submit(record(1));
        assert_eq!(tx.submit(record(2)), Delivery::Dropped);
    }

    #[test]
    fn test_disconnected_consumer_drops() {
        let (tx, rx) = channel(4, OverflowPolicy::Fallback);
        drop(rx);
        assert_eq!(tx.submit(record(1)), Delivery::Dropped);
    }

    #[test]
    fn test_tracing_fallback_accepts() {
        assert!(TracingFallback.emit(&record(1)));
    }

    #[test]
    fn test_saturation_never_blocks_drop_policy() {
        let capacity = 16;
        let (tx, rx) = channel(capacity, OverflowPolicy::Drop);
        let started = Instant::now();

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let tx = tx.clone();
                s.spawn(move || {
                    for n in 0..500 {
                        tx.submit(record(t * 1000 + n));
                    }
                });
            }
        });

        // No consumer ran: anything past capacity must have returned at once
        assert!(started.elapsed() < Duration::from_secs(10));
        let stats = tx.stats();
        assert_eq!(stats.delivered, capacity as u64);
        assert_eq!(stats.dropped, 8 * 500 - capacity as u64);
        assert_eq!(stats.fallback, 0);
        assert_eq!(rx.drain().len(), capacity);
    }

    #[test]
    fn test_saturation_never_blocks_fallback_policy() {
        let capacity = 16;
        let sink = Arc::new(CollectingFallback::new());
        let (tx, rx) = channel(capacity, OverflowPolicy::Fallback);
        let tx = tx.with_fallback(sink.clone());

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let tx = tx.clone();
                s.spawn(move || {
                    for n in 0..500 {
                        tx.submit(record(t * 1000 + n));
                    }
                });
            }
        });

        let stats = tx.stats();
        assert_eq!(stats.delivered, capacity as u64);
        assert_eq!(stats.fallback, 8 * 500 - capacity as u64);
        assert_eq!(stats.dropped, 0);
        assert_eq!(sink.drain().len() + rx.drain().len(), 8 * 500);
    }

    #[test]
    fn test_recv_timeout_empty() {
        let (_tx, rx) = channel(1, OverflowPolicy::Drop);
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_none());
        assert!(rx.try_recv().is_none());
    }
}

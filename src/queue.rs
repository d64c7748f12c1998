// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-budgeted ingress queue between transport callbacks and the writer
//!
//! Many producers push from transport callback threads; exactly one consumer
//! (the writer thread) pops. The queue is bounded by bytes, not items: a
//! record whose size would push the in-flight total over the budget is
//! dropped and counted. Producers never block.
//!
//! # Drop policy
//!
//! Drop-new: the incoming record is discarded, records already queued are
//! kept. A single record larger than the whole budget is always dropped.
//!
//! # Close
//!
//! `close()` is drain-then-stop. Records queued before the close are still
//! delivered by `pop_blocking`, after which it reports `Closed`. Pushes that
//! race with or follow the close are rejected and counted separately.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::record::Record;

const DROP_LOG_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Admitting the record would exceed the byte budget
    OverBudget,
    /// The queue was already closed
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Dropped(DropReason),
}

impl PushOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushOutcome::Accepted)
    }
}

#[derive(Debug)]
pub enum PopResult {
    Record(Record),
    Timeout,
    Closed,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    pub rejected_after_close: u64,
    pub bytes_in_flight: usize,
    pub budget_bytes: usize,
}

enum Slot {
    Record(Record, usize),
    // enqueued by close(); everything before it has been delivered
    Wake,
}

struct QueueInner {
    tx: Sender<Slot>,
    rx: Receiver<Slot>,
    closed: RwLock<bool>,
    drained: AtomicBool,
    budget: usize,
    bytes_in_flight: AtomicUsize,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    rejected_after_close: AtomicU64,
}

/// Cloneable handle; all clones share the same queue
#[derive(Clone)]
pub struct IngressQueue {
    inner: Arc<QueueInner>,
}

impl IngressQueue {
    pub fn new(budget_bytes: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            inner: Arc::new(QueueInner {
                tx,
                rx,
                closed: RwLock::new(false),
                drained: AtomicBool::new(false),
                budget: budget_bytes,
                bytes_in_flight: AtomicUsize::new(0),
                pushed: AtomicU64::new(0),
                popped: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                rejected_after_close: AtomicU64::new(0),
            }),
        }
    }

    /// Offer a record; never blocks on the consumer
    pub fn push(&self, record: Record) -> PushOutcome {
        let size = record.size_bytes();

        // Held across reserve + send so close() cannot slip in between
        let closed = self.inner.closed.read();
        if *closed {
            self.inner.rejected_after_close.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Queue closed, rejecting record for '{}'",
                record.stream_name()
            );
            return PushOutcome::Dropped(DropReason::Closed);
        }

        if !self.reserve(size) {
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
                warn!(
                    "Cache budget of {} bytes exhausted, dropping record for '{}' ({} bytes, {} dropped so far)",
                    self.inner.budget,
                    record.stream_name(),
                    size,
                    dropped
                );
            }
            return PushOutcome::Dropped(DropReason::OverBudget);
        }

        if self.inner.tx.send(Slot::Record(record, size)).is_err() {
            // receiver lives in `inner`, so this only happens during teardown
            self.inner.bytes_in_flight.fetch_sub(size, Ordering::AcqRel);
            self.inner.rejected_after_close.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Dropped(DropReason::Closed);
        }

        self.inner.pushed.fetch_add(1, Ordering::Relaxed);
        drop(closed);
        PushOutcome::Accepted
    }

    fn reserve(&self, size: usize) -> bool {
        let mut current = self.inner.bytes_in_flight.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(size) {
                Some(next) if next <= self.inner.budget => next,
                _ => return false,
            };
            match self.inner.bytes_in_flight.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Consumer side: wait up to `timeout` for the next record
    pub fn pop_blocking(&self, timeout: Duration) -> PopResult {
        if self.inner.drained.load(Ordering::Acquire) {
            return PopResult::Closed;
        }

        match self.inner.rx.recv_timeout(timeout) {
            Ok(Slot::Record(record, size)) => {
                self.inner.bytes_in_flight.fetch_sub(size, Ordering::AcqRel);
                self.inner.popped.fetch_add(1, Ordering::Relaxed);
                PopResult::Record(record)
            }
            Ok(Slot::Wake) => {
                self.inner.drained.store(true, Ordering::Release);
                PopResult::Closed
            }
            Err(RecvTimeoutError::Timeout) => PopResult::Timeout,
            Err(RecvTimeoutError::Disconnected) => PopResult::Closed,
        }
    }

    /// Stop accepting records and wake the consumer once the backlog is drained
    pub fn close(&self) {
        let mut closed = self.inner.closed.write();
        if *closed {
            return;
        }
        *closed = true;
        // cannot fail: we own the receiver
        let _ = self.inner.tx.send(Slot::Wake);
        debug!(
            "Ingress queue closed with {} records pending",
            self.inner.rx.len().saturating_sub(1)
        );
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.read()
    }

    pub fn budget_bytes(&self) -> usize {
        self.inner.budget
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.inner.bytes_in_flight.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.inner.pushed.load(Ordering::Relaxed),
            popped: self.inner.popped.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            rejected_after_close: self.inner.rejected_after_close.load(Ordering::Relaxed),
            bytes_in_flight: self.bytes_in_flight(),
            budget_bytes: self.inner.budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StreamDescriptor;
    use bytes::Bytes;

    fn record(stream: &Arc<StreamDescriptor>, payload: &[u8]) -> Record {
        Record::new(stream.clone(), Bytes::copy_from_slice(payload), None)
    }

    #[test]
    fn test_push_pop_single() {
        let queue = IngressQueue::new(1024);
        let stream = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));

        assert!(queue.push(record(&stream, b"x")).is_accepted());
        assert!(queue.bytes_in_flight() > 0);

        match queue.pop_blocking(Duration::from_millis(10)) {
            PopResult::Record(r) => assert_eq!(r.payload().as_ref(), b"x"),
            other => panic!("expected record, got {:?}", other),
        }
        assert_eq!(queue.bytes_in_flight(), 0);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = IngressQueue::new(1024);
        assert!(matches!(
            queue.pop_blocking(Duration::from_millis(5)),
            PopResult::Timeout
        ));
    }

    #[test]
    fn test_over_budget_is_dropped_and_counted() {
        let stream = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));
        let one = record(&stream, &[0u8; 10]).size_bytes();
        let queue = IngressQueue::new(one * 2);

        assert!(queue.push(record(&stream, &[0u8; 10])).is_accepted());
        assert!(queue.push(record(&stream, &[0u8; 10])).is_accepted());
        assert_eq!(
            queue.push(record(&stream, &[0u8; 10])),
            PushOutcome::Dropped(DropReason::OverBudget)
        );
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.bytes_in_flight(), one * 2);
    }

    #[test]
    fn test_record_larger_than_budget_is_dropped() {
        let queue = IngressQueue::new(16);
        let stream = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));
        assert!(!queue.push(record(&stream, &[0u8; 64])).is_accepted());
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let queue = IngressQueue::new(1024);
        let stream = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));
        queue.push(record(&stream, b"1"));
        queue.push(record(&stream, b"2"));
        queue.close();

        assert_eq!(
            queue.push(record(&stream, b"3")),
            PushOutcome::Dropped(DropReason::Closed)
        );

        let mut seen = Vec::new();
        loop {
            match queue.pop_blocking(Duration::from_millis(10)) {
                PopResult::Record(r) => seen.push(r.payload().clone()),
                PopResult::Closed => break,
                PopResult::Timeout => panic!("closed queue must not time out"),
            }
        }
        assert_eq!(seen, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
        assert!(matches!(
            queue.pop_blocking(Duration::from_millis(1)),
            PopResult::Closed
        ));
        assert_eq!(queue.stats().rejected_after_close, 1);
        assert_eq!(queue.stats().dropped, 0);
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue = IngressQueue::new(1024);
        let consumer = queue.clone();
        let handle =
            std::thread::spawn(move || matches!(consumer.pop_blocking(Duration::from_secs(30)), PopResult::Closed));
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(handle.join().unwrap());
    }
}

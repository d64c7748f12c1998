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

//! Writer thread
//!
//! The single consumer of the ingress queue. It owns the storage backend
//! for the whole session: records are popped in arrival order, run through
//! the compression stage and appended to storage. A pop timeout, or
//! `flush_interval` elapsing under continuous traffic, triggers a flush.
//!
//! Storage errors never stop the loop. The failing record is counted, the
//! session is marked degraded and the writer moves on, so a full disk cannot
//! take the process down.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::compression::CompressionStage;
use crate::error::{RecorderError, Result};
use crate::queue::{IngressQueue, PopResult};
use crate::record::Record;
use crate::storage::{BagMessage, StorageBackend};

const FAILURE_LOG_EVERY: u64 = 1000;

/// Counters shared between the writer thread and status queries
#[derive(Debug, Default)]
pub struct WriterStats {
    written: AtomicU64,
    write_failures: AtomicU64,
    bytes_written: AtomicU64,
    flushes: AtomicU64,
    degraded: AtomicBool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStatsSnapshot {
    pub written: u64,
    pub write_failures: u64,
    pub bytes_written: u64,
    pub flushes: u64,
    pub degraded: bool,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            written: self.written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// What the writer did over the session, returned on join
#[derive(Debug, Clone, Default)]
pub struct WriterReport {
    pub stats: WriterStatsSnapshot,
    /// Records written per stream name
    pub per_stream: BTreeMap<String, u64>,
    pub first_log_time_ns: Option<u64>,
    pub last_log_time_ns: Option<u64>,
}

pub struct WriterThread {
    handle: JoinHandle<(Box<dyn StorageBackend>, WriterReport)>,
    stats: Arc<WriterStats>,
}

impl WriterThread {
    pub fn spawn(
        queue: IngressQueue,
        backend: Box<dyn StorageBackend>,
        compression: CompressionStage,
        flush_interval: Duration,
    ) -> Result<Self> {
        let stats = Arc::new(WriterStats::default());
        let mut worker = Worker {
            queue,
            backend,
            compression,
            flush_interval,
            stats: stats.clone(),
            report: WriterReport::default(),
            dirty: false,
        };

        let handle = thread::Builder::new()
            .name("bag-writer".to_string())
            .spawn(move || {
                worker.run();
                let Worker {
                    backend, mut report, stats, ..
                } = worker;
                report.stats = stats.snapshot();
                (backend, report)
            })?;

        Ok(Self { handle, stats })
    }

    pub fn stats(&self) -> &Arc<WriterStats> {
        &self.stats
    }

    /// Wait for the writer to drain the queue and hand the backend back.
    /// The queue must have been closed, otherwise this waits forever.
    pub fn join(self) -> Result<(Box<dyn StorageBackend>, WriterReport)> {
        self.handle
            .join()
            .map_err(|_| RecorderError::storage("writer thread panicked"))
    }
}

struct Worker {
    queue: IngressQueue,
    backend: Box<dyn StorageBackend>,
    compression: CompressionStage,
    flush_interval: Duration,
    stats: Arc<WriterStats>,
    report: WriterReport,
    dirty: bool,
}

impl Worker {
    fn run(&mut self) {
        info!(
            "Writer started for {} (flush interval {:?})",
            self.backend.path().display(),
            self.flush_interval
        );
        let mut last_flush = Instant::now();

        loop {
            match self.queue.pop_blocking(self.flush_interval) {
                PopResult::Record(record) => {
                    self.write(&record);
                    if last_flush.elapsed() >= self.flush_interval {
                        self.flush();
                        last_flush = Instant::now();
                    }
                }
                PopResult::Timeout => {
                    self.flush();
                    last_flush = Instant::now();
                }
                PopResult::Closed => break,
            }
        }

        self.flush();
        info!(
            "Writer drained: {} records written, {} failures",
            self.stats.written.load(Ordering::Relaxed),
            self.stats.write_failures.load(Ordering::Relaxed)
        );
    }

    fn write(&mut self, record: &Record) {
        match self.try_write(record) {
            Ok(()) => {
                self.dirty = true;
                self.stats.written.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_written
                    .fetch_add(record.payload_len() as u64, Ordering::Relaxed);
                *self
                    .report
                    .per_stream
                    .entry(record.stream_name().to_string())
                    .or_insert(0) += 1;

                let ts = record.receive_time_ns();
                self.report.first_log_time_ns.get_or_insert(ts);
                self.report.last_log_time_ns = Some(ts);
            }
            Err(e) => self.fail(record.stream_name(), &e),
        }
    }

    fn try_write(&mut self, record: &Record) -> Result<()> {
        let payload = record.payload();
        let compressed = self.compression.compress_message(payload)?;
        let (data, uncompressed_len) = match &compressed {
            Some(c) => (c.as_slice(), Some(payload.len() as u64)),
            None => (&payload[..], None),
        };

        self.backend.write_record(&BagMessage {
            stream: record.stream().as_ref(),
            log_time_ns: record.receive_time_ns(),
            publish_time_ns: record.publish_time_ns(),
            data,
            uncompressed_len,
        })
    }

    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        match self.backend.flush() {
            Ok(()) => {
                self.dirty = false;
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                debug!("Flushed {}", self.backend.path().display());
            }
            Err(e) => {
                if !self.stats.degraded.swap(true, Ordering::Relaxed) {
                    warn!("Session degraded");
                }
                error!("Flush of {} failed: {}", self.backend.path().display(), e);
            }
        }
    }

    fn fail(&mut self, stream: &str, e: &RecorderError) {
        let failures = self.stats.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.stats.degraded.swap(true, Ordering::Relaxed) {
            warn!("Session degraded after a storage failure");
        }
        if failures == 1 || failures % FAILURE_LOG_EVERY == 0 {
            error!(
                "Failed to write record for '{}': {} ({} failures so far)",
                stream, e, failures
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StreamDescriptor;
    use crate::storage::StorageId;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};

    /// In-memory backend that fails writes once `fail_after` records were taken
    struct MemoryBackend {
        path: PathBuf,
        written: Arc<Mutex<Vec<(String, Vec<u8>, Option<u64>)>>>,
        fail_after: usize,
        flushes: usize,
    }

    impl StorageBackend for MemoryBackend {
        fn storage_id(&self) -> StorageId {
            StorageId::Sqlite3
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn register_stream(&mut self, _stream: &crate::record::StreamDescriptor) -> Result<()> {
            Ok(())
        }

        fn write_record(&mut self, message: &BagMessage<'_>) -> Result<()> {
            let mut written = self.written.lock();
            if written.len() >= self.fail_after {
                return Err(RecorderError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "No space left on device",
                )));
            }
            written.push((
                message.stream.name.clone(),
                message.data.to_vec(),
                message.uncompressed_len,
            ));
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<PathBuf> {
            Ok(self.path.clone())
        }
    }

    fn backend(fail_after: usize) -> (Box<MemoryBackend>, Arc<Mutex<Vec<(String, Vec<u8>, Option<u64>)>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(MemoryBackend {
                path: PathBuf::from("memory"),
                written: written.clone(),
                fail_after,
                flushes: 0,
            }),
            written,
        )
    }

    fn push(queue: &IngressQueue, stream: &Arc<StreamDescriptor>, payload: &[u8]) {
        assert!(queue
            .push(Record::new(stream.clone(), Bytes::copy_from_slice(payload), None))
            .is_accepted());
    }

    #[test]
    fn test_drains_queue_in_order_before_exit() {
        let queue = IngressQueue::new(1024 * 1024);
        let (backend, written) = backend(usize::MAX);
        let writer = WriterThread::spawn(
            queue.clone(),
            backend,
            CompressionStage::disabled(),
            Duration::from_millis(20),
        )
        .unwrap();

        let a = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));
        let b = Arc::new(StreamDescriptor::unresolved("/b", "cdr"));
        for i in 0..100u32 {
            let stream = if i % 3 == 0 { &b } else { &a };
            push(&queue, stream, &i.to_le_bytes());
        }
        queue.close();

        let (_backend, report) = writer.join().unwrap();
        assert_eq!(report.stats.written, 100);
        assert_eq!(report.per_stream["/b"], 34);
        assert!(!report.stats.degraded);

        let written = written.lock();
        let a_values: Vec<u32> = written
            .iter()
            .filter(|(s, _, _)| s == "/a")
            .map(|(_, d, _)| u32::from_le_bytes([d[0], d[1], d[2], d[3]]))
            .collect();
        let mut sorted = a_values.clone();
        sorted.sort();
        assert_eq!(a_values, sorted);
    }

    #[test]
    fn test_write_failures_degrade_without_stopping() {
        let queue = IngressQueue::new(1024 * 1024);
        let (backend, written) = backend(3);
        let writer = WriterThread::spawn(
            queue.clone(),
            backend,
            CompressionStage::disabled(),
            Duration::from_millis(20),
        )
        .unwrap();

        let a = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));
        for i in 0..10u8 {
            push(&queue, &a, &[i]);
        }
        queue.close();

        let (_backend, report) = writer.join().unwrap();
        assert_eq!(report.stats.written, 3);
        assert_eq!(report.stats.write_failures, 7);
        assert!(report.stats.degraded);
        assert_eq!(written.lock().len(), 3);
    }

    #[test]
    fn test_message_compression_records_original_length() {
        let queue = IngressQueue::new(1024 * 1024);
        let (backend, written) = backend(usize::MAX);
        let stage = CompressionStage::from_names("message", "zstd", 1).unwrap();
        let writer =
            WriterThread::spawn(queue.clone(), backend, stage, Duration::from_millis(20)).unwrap();

        let a = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));
        let payload = vec![7u8; 4096];
        push(&queue, &a, &payload);
        queue.close();
        writer.join().unwrap();

        let written = written.lock();
        let (_, data, len) = &written[0];
        assert_eq!(*len, Some(4096));
        assert!(data.len() < payload.len());
        let restored = crate::compression::decompress(
            crate::compression::CompressionType::Zstd,
            data.as_slice(),
        )
        .unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_idle_writer_flushes_on_timeout() {
        let queue = IngressQueue::new(1024);
        let (backend, _written) = backend(usize::MAX);
        let writer = WriterThread::spawn(
            queue.clone(),
            backend,
            CompressionStage::disabled(),
            Duration::from_millis(5),
        )
        .unwrap();

        let a = Arc::new(StreamDescriptor::unresolved("/a", "cdr"));
        push(&queue, &a, b"x");
        std::thread::sleep(Duration::from_millis(50));
        assert!(writer.stats().snapshot().flushes >= 1);

        queue.close();
        writer.join().unwrap();
    }
}

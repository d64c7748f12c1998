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

//! One recording session, from open bag to finished bag
//!
//! `start` wires storage, writer thread and subscriptions together in that
//! order and undoes whatever was already done if a later step fails.
//! `stop` runs the pipeline down in reverse: subscriptions go first, the
//! queue is closed, the writer drains it and hands the backend back, the
//! backend is closed and finally the bag metadata is written.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::options::SessionConfig;
use crate::compression::CompressionMode;
use crate::error::Result;
use crate::protocol::{RecordingState, StatusResponse};
use crate::queue::{IngressQueue, QueueStats};
use crate::record::{wall_clock_ns, StreamDescriptor};
use crate::storage::metadata::{
    write_metadata, BagMetadata, Duration as BagDuration, StartingTime, TopicInformation,
    TopicMetadata, METADATA_VERSION,
};
use crate::storage::StorageFactory;
use crate::subscription::TopicSubscriptionSet;
use crate::transport::Transport;
use crate::writer::{WriterReport, WriterThread};

pub struct RecordingSession {
    id: String,
    config: SessionConfig,
    queue: IngressQueue,
    writer: WriterThread,
    subscriptions: TopicSubscriptionSet,
    started_at_ns: u64,
}

/// What a finished session left on disk
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub recording_id: String,
    pub bag_path: PathBuf,
    /// The storage artefact, compressed when per-file compression is on
    pub storage_file: PathBuf,
    pub metadata: BagMetadata,
    pub queue: QueueStats,
    pub writer: WriterReport,
}

impl RecordingSession {
    pub fn start(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        storage: &dyn StorageFactory,
    ) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let started_at_ns = wall_clock_ns();
        let bag_path = config.storage.bag_path.clone();
        info!(
            "Starting recording {} to {} ({})",
            id,
            bag_path.display(),
            config.storage.storage_id
        );

        let queue = IngressQueue::new(config.max_cache_size);
        let backend = storage.open(&config.storage, &config.subscription.static_streams())?;

        let writer = match WriterThread::spawn(
            queue.clone(),
            backend,
            config.compression.clone(),
            config.flush_interval,
        ) {
            Ok(writer) => writer,
            Err(e) => {
                remove_bag_directory(&bag_path);
                return Err(e);
            }
        };

        let subscriptions = TopicSubscriptionSet::configure(
            transport,
            queue.clone(),
            config.subscription.clone(),
        )
        .and_then(|mut set| set.start().map(|_| set));

        let subscriptions = match subscriptions {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!("Rolling back recording {}: {}", id, e);
                queue.close();
                match writer.join() {
                    Ok((backend, _)) => {
                        if let Err(close_err) = backend.close() {
                            warn!("Failed to close storage during rollback: {}", close_err);
                        }
                    }
                    Err(join_err) => warn!("{}", join_err),
                }
                remove_bag_directory(&bag_path);
                return Err(e);
            }
        };

        info!(
            "Recording {} started with {} subscriptions",
            id,
            subscriptions.subscription_count()
        );

        Ok(Self {
            id,
            config,
            queue,
            writer,
            subscriptions,
            started_at_ns,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bag_path(&self) -> &Path {
        &self.config.storage.bag_path
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> &TopicSubscriptionSet {
        &self.subscriptions
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            state: RecordingState::Recording,
            recording_id: Some(self.id.clone()),
            bag_path: Some(self.bag_path().display().to_string()),
            streams: self.subscriptions.streams(),
            received: self.subscriptions.received(),
            queue: self.queue.stats(),
            writer: self.writer.stats().snapshot(),
        }
    }

    /// Drain everything still queued and finish the bag.
    /// Blocks until the bag on disk is complete.
    pub fn stop(self) -> Result<SessionSummary> {
        let RecordingSession {
            id,
            config,
            queue,
            writer,
            mut subscriptions,
            started_at_ns,
        } = self;

        info!("Stopping recording {}", id);
        let streams = subscriptions.streams();
        subscriptions.shutdown();

        queue.close();
        let (backend, report) = writer.join()?;
        let queue = queue.stats();

        let storage_id = backend.storage_id();
        let opened_at = backend.path().to_path_buf();

        // a failed close or wrap still leaves a bag directory that describes
        // whatever made it to disk; the first error is returned afterwards
        let mut failure = None;
        let closed = backend.close().unwrap_or_else(|e| {
            error!("Failed to close storage {}: {}", opened_at.display(), e);
            failure.get_or_insert(e);
            opened_at
        });
        let storage_file = match config.compression.wrap_file(&closed) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                error!("Failed to compress {}: {}", closed.display(), e);
                failure.get_or_insert(e);
                closed
            }
        };

        let metadata = BagMetadata {
            version: METADATA_VERSION,
            storage_identifier: storage_id.as_str().to_string(),
            recording_id: id.clone(),
            relative_file_paths: storage_file
                .file_name()
                .filter(|_| storage_file.is_file())
                .map(|n| vec![n.to_string_lossy().into_owned()])
                .unwrap_or_default(),
            message_count: report.stats.written,
            topics_with_message_count: topic_information(
                &streams,
                &report,
                &config.subscription.serialization_format,
            ),
            dropped_message_count: queue.dropped + report.stats.write_failures,
            ..timing(&report, started_at_ns, &config)
        };
        let written = write_metadata(&config.storage.bag_path, &metadata);
        if let Some(e) = failure {
            if let Err(meta) = written {
                error!("Failed to write metadata for {}: {}", id, meta);
            }
            return Err(e);
        }
        written?;

        if queue.dropped > 0 || report.stats.write_failures > 0 {
            warn!(
                "Recording {} finished with {} dropped records and {} write failures",
                id, queue.dropped, report.stats.write_failures
            );
        }
        info!(
            "Recording {} finished: {} messages in {}",
            id,
            metadata.message_count,
            config.storage.bag_path.display()
        );

        Ok(SessionSummary {
            recording_id: id,
            bag_path: config.storage.bag_path,
            storage_file,
            metadata,
            queue,
            writer: report,
        })
    }
}

/// Per-topic counts; subscribed streams without messages are listed too
fn topic_information(
    streams: &[StreamDescriptor],
    report: &WriterReport,
    serialization_format: &str,
) -> Vec<TopicInformation> {
    let info = |name: &str, message_type: &str, format: &str| TopicInformation {
        topic_metadata: TopicMetadata {
            name: name.to_string(),
            message_type: message_type.to_string(),
            serialization_format: format.to_string(),
            offered_qos_profiles: String::new(),
        },
        message_count: 0,
    };

    let mut topics: BTreeMap<&str, TopicInformation> = BTreeMap::new();
    for stream in streams {
        topics.insert(
            stream.name.as_str(),
            info(&stream.name, stream.type_name(), &stream.serialization_format),
        );
    }
    for (name, count) in &report.per_stream {
        topics
            .entry(name.as_str())
            .or_insert_with(|| info(name, "", serialization_format))
            .message_count = *count;
    }
    topics.into_values().collect()
}

/// Metadata skeleton carrying start time, duration and compression fields
fn timing(report: &WriterReport, started_at_ns: u64, config: &SessionConfig) -> BagMetadata {
    let starting = report.first_log_time_ns.unwrap_or(started_at_ns);
    let ending = report.last_log_time_ns.unwrap_or(starting);
    let compression = &config.compression;

    BagMetadata {
        version: METADATA_VERSION,
        storage_identifier: String::new(),
        recording_id: String::new(),
        relative_file_paths: Vec::new(),
        duration: BagDuration {
            nanoseconds: ending.saturating_sub(starting),
        },
        starting_time: StartingTime {
            nanoseconds_since_epoch: starting,
        },
        message_count: 0,
        topics_with_message_count: Vec::new(),
        compression_format: match compression.mode() {
            CompressionMode::None => String::new(),
            _ => compression.format().as_str().to_string(),
        },
        compression_mode: compression.mode().as_str().to_string(),
        dropped_message_count: 0,
    }
}

fn remove_bag_directory(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!("Failed to remove bag directory {}: {}", path.display(), e);
    }
}

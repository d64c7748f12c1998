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

/// Recorder state machine and session lifecycle tests, driven over the
/// in-process transport
///
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use zenoh_bag_recorder::config::RecorderSettings;
use zenoh_bag_recorder::error::{ErrorKind, RecorderError, Result};
use zenoh_bag_recorder::protocol::RecordingState;
use zenoh_bag_recorder::record::StreamDescriptor;
use zenoh_bag_recorder::recorder::{RecorderManager, StartOutcome, StopOutcome};
use zenoh_bag_recorder::storage::{
    read_bag, BackendFactory, BagMessage, StorageBackend, StorageFactory, StorageId, StorageOptions,
    METADATA_FILENAME,
};
use zenoh_bag_recorder::transport::{LocalTransport, MessageSink, Subscription, Transport};

fn test_settings(dir: &TempDir, topics: &[&str]) -> RecorderSettings {
    RecorderSettings {
        topics: topics.iter().map(|t| t.to_string()).collect(),
        output_dir: Some(dir.path().display().to_string()),
        compression_mode: "none".to_string(),
        flush_interval_ms: 50,
        ..RecorderSettings::default()
    }
}

fn manager(settings: RecorderSettings, bus: &LocalTransport) -> RecorderManager {
    RecorderManager::new(settings, Arc::new(bus.clone()))
}

fn started_path(outcome: StartOutcome) -> PathBuf {
    match outcome {
        StartOutcome::Started { bag_path, .. } => bag_path,
        StartOutcome::AlreadyRecording => panic!("expected a new session"),
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_start_stop_round_trip() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &["/chatter"]), &bus);

    let start = manager.trigger_start();
    assert!(start.success);
    assert_eq!(start.message, "started recording!");
    assert_eq!(manager.state(), RecordingState::Recording);
    assert_eq!(bus.subscriber_count("/chatter"), 1);

    let stop = manager.trigger_stop();
    assert!(stop.success);
    assert_eq!(stop.message, "stopped recording!");
    assert_eq!(manager.state(), RecordingState::Idle);
    assert_eq!(bus.subscriber_count("/chatter"), 0);
}

#[test]
fn test_double_start_reports_already_recording() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &["/chatter"]), &bus);

    let first = manager.trigger_start();
    assert!(first.success);
    let status_before = manager.status();

    let second = manager.trigger_start();
    assert!(!second.success);
    assert_eq!(second.message, "already recording!");

    // the live session is untouched
    let status_after = manager.status();
    assert_eq!(status_after.state, RecordingState::Recording);
    assert_eq!(status_after.recording_id, status_before.recording_id);
    assert_eq!(bus.subscriber_count("/chatter"), 1);

    manager.trigger_stop();
}

#[test]
fn test_stop_while_idle_reports_not_recording() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &["/chatter"]), &bus);

    let response = manager.trigger_stop();
    assert!(!response.success);
    assert_eq!(response.message, "not recording!");
    assert_eq!(manager.state(), RecordingState::Idle);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_every_accepted_message_is_in_the_bag_after_stop() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &["/chatter", "/imu"]), &bus);

    let bag_path = started_path(manager.start_recording().unwrap());
    for i in 0..500u32 {
        assert_eq!(bus.publish("/chatter", format!("hello {}", i).into_bytes()), 1);
        if i % 5 == 0 {
            bus.publish("/imu", i.to_le_bytes().to_vec());
        }
    }

    let summary = match manager.stop_recording().unwrap() {
        StopOutcome::Stopped(summary) => summary,
        StopOutcome::NotRecording => panic!("session vanished"),
    };
    assert_eq!(summary.queue.pushed, 600);
    assert_eq!(summary.queue.dropped, 0);
    assert_eq!(summary.writer.stats.written, 600);
    assert_eq!(summary.metadata.message_count, 600);
    assert_eq!(summary.metadata.dropped_message_count, 0);

    let bag = read_bag(&bag_path).unwrap();
    let chatter = bag.payloads("/chatter");
    assert_eq!(chatter.len(), 500);
    for (i, payload) in chatter.iter().enumerate() {
        assert_eq!(*payload, format!("hello {}", i).as_bytes());
    }
    assert_eq!(bag.payloads("/imu").len(), 100);
    assert_eq!(bag.metadata.topic("/chatter").unwrap().message_count, 500);
    assert_eq!(bag.metadata.topic("/imu").unwrap().message_count, 100);
}

#[test]
fn test_publishing_after_stop_is_not_recorded() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &["/chatter"]), &bus);

    let bag_path = started_path(manager.start_recording().unwrap());
    bus.publish("/chatter", &b"kept"[..]);
    manager.stop_recording().unwrap();
    assert_eq!(bus.publish("/chatter", &b"late"[..]), 0);

    let bag = read_bag(&bag_path).unwrap();
    assert_eq!(bag.payloads("/chatter"), vec![&b"kept"[..]]);
}

#[test]
fn test_small_cache_drops_are_counted() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let mut settings = test_settings(&dir, &["/camera"]);
    // smaller than any single record
    settings.max_cache_size = 1;
    let manager = manager(settings, &bus);

    let bag_path = started_path(manager.start_recording().unwrap());
    for _ in 0..10 {
        bus.publish("/camera", vec![0u8; 64]);
    }
    assert_eq!(manager.status().queue.dropped, 10);

    let summary = match manager.stop_recording().unwrap() {
        StopOutcome::Stopped(summary) => summary,
        StopOutcome::NotRecording => panic!("session vanished"),
    };
    assert_eq!(summary.queue.dropped, 10);
    assert_eq!(summary.metadata.message_count, 0);
    assert_eq!(summary.metadata.dropped_message_count, 10);

    let bag = read_bag(&bag_path).unwrap();
    assert!(bag.messages.is_empty());
    assert_eq!(bag.metadata.dropped_message_count, 10);
}

#[test]
fn test_record_all_without_discovery_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let mut settings = test_settings(&dir, &[]);
    settings.record_all = true;
    settings.disable_discovery = true;
    let manager = manager(settings, &bus);

    let err = manager.start_recording().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(manager.state(), RecordingState::Idle);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let response = manager.trigger_start();
    assert!(!response.success);
    assert!(response.message.starts_with("runtime error occurred:"));
}

#[test]
fn test_no_topics_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &[]), &bus);

    let err = manager.start_recording().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(manager.state(), RecordingState::Idle);
}

struct FailingStorage;

impl StorageFactory for FailingStorage {
    fn open(&self, options: &StorageOptions, _: &[StreamDescriptor]) -> Result<Box<dyn StorageBackend>> {
        Err(RecorderError::storage(format!(
            "cannot open {}",
            options.bag_path.display()
        )))
    }
}

#[test]
fn test_storage_failure_leaves_recorder_idle() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &["/chatter"]), &bus)
        .with_storage_factory(Arc::new(FailingStorage));

    let err = manager.start_recording().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(manager.state(), RecordingState::Idle);
    assert_eq!(bus.subscriber_count("/chatter"), 0);

    // a later stop sees no session
    assert_eq!(manager.trigger_stop().message, "not recording!");
}

/// Real storage underneath, but payloads starting with `bad` fail to write
/// and closing reports an error after the file is finished
struct FlakyStorage;

struct FlakyBackend {
    inner: Box<dyn StorageBackend>,
}

impl StorageFactory for FlakyStorage {
    fn open(&self, options: &StorageOptions, hints: &[StreamDescriptor]) -> Result<Box<dyn StorageBackend>> {
        let inner = BackendFactory::open(options, hints)?;
        Ok(Box::new(FlakyBackend { inner }))
    }
}

impl StorageBackend for FlakyBackend {
    fn storage_id(&self) -> StorageId {
        self.inner.storage_id()
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn register_stream(&mut self, stream: &StreamDescriptor) -> Result<()> {
        self.inner.register_stream(stream)
    }

    fn write_record(&mut self, message: &BagMessage<'_>) -> Result<()> {
        if message.data.starts_with(b"bad") {
            return Err(RecorderError::storage("disk full"));
        }
        self.inner.write_record(message)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(self: Box<Self>) -> Result<PathBuf> {
        self.inner.close()?;
        Err(RecorderError::storage("close failed"))
    }
}

#[test]
fn test_failed_close_still_writes_metadata() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let mut settings = test_settings(&dir, &["/chatter"]);
    settings.bag_name = Some("flaky".to_string());
    let manager = manager(settings, &bus).with_storage_factory(Arc::new(FlakyStorage));

    let bag_path = started_path(manager.start_recording().unwrap());
    for i in 0..10 {
        let payload = if i % 3 == 0 { format!("bad {}", i) } else { format!("good {}", i) };
        bus.publish("/chatter", payload.into_bytes());
    }

    let err = manager.stop_recording().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(manager.state(), RecordingState::Idle);
    assert!(bag_path.join(METADATA_FILENAME).is_file());

    let bag = read_bag(&bag_path).unwrap();
    assert_eq!(bag.metadata.dropped_message_count, 4);
    assert_eq!(bag.metadata.message_count, 6);
    assert_eq!(bag.metadata.relative_file_paths, vec!["flaky_0.db3".to_string()]);
    let payloads = bag.payloads("/chatter");
    assert_eq!(payloads.len(), 6);
    assert!(payloads.iter().all(|p| p.starts_with(b"good")));
}

struct RefusingTransport;

impl Transport for RefusingTransport {
    fn name(&self) -> &str {
        "refusing"
    }

    fn subscribe(&self, stream: &StreamDescriptor, _: MessageSink) -> Result<Box<dyn Subscription>> {
        Err(RecorderError::Transport(format!("cannot subscribe to {}", stream.name)))
    }

    fn discover(&self) -> Result<Vec<StreamDescriptor>> {
        Ok(Vec::new())
    }
}

#[test]
fn test_subscription_failure_rolls_back_the_bag() {
    let dir = TempDir::new().unwrap();
    let manager = RecorderManager::new(test_settings(&dir, &["/chatter"]), Arc::new(RefusingTransport));

    let err = manager.start_recording().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(manager.state(), RecordingState::Idle);
    // the bag directory opened before subscribing is removed again
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_restart_after_stop_creates_a_new_bag() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let mut settings = test_settings(&dir, &["/chatter"]);
    settings.bag_name = Some("first".to_string());
    let first_manager = manager(settings.clone(), &bus);
    let first = started_path(first_manager.start_recording().unwrap());
    bus.publish("/chatter", &b"one"[..]);
    first_manager.stop_recording().unwrap();

    settings.bag_name = Some("second".to_string());
    let second_manager = manager(settings, &bus);
    let second = started_path(second_manager.start_recording().unwrap());
    bus.publish("/chatter", &b"two"[..]);
    second_manager.stop_recording().unwrap();

    assert_ne!(first, second);
    assert_eq!(read_bag(&first).unwrap().payloads("/chatter"), vec![&b"one"[..]]);
    assert_eq!(read_bag(&second).unwrap().payloads("/chatter"), vec![&b"two"[..]]);
}

#[test]
fn test_existing_bag_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("taken")).unwrap();
    let bus = LocalTransport::new();
    let mut settings = test_settings(&dir, &["/chatter"]);
    settings.bag_name = Some("taken".to_string());
    let manager = manager(settings, &bus);

    let err = manager.start_recording().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(manager.state(), RecordingState::Idle);
    // the pre-existing directory is left alone
    assert!(dir.path().join("taken").is_dir());
}

#[test]
fn test_status_reports_live_counters() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = manager(test_settings(&dir, &["/chatter"]), &bus);

    let idle = manager.status();
    assert_eq!(idle.state, RecordingState::Idle);
    assert!(idle.recording_id.is_none());

    let bag_path = started_path(manager.start_recording().unwrap());
    for _ in 0..3 {
        bus.publish("/chatter", &b"x"[..]);
    }

    let status = manager.status();
    assert_eq!(status.state, RecordingState::Recording);
    assert_eq!(status.bag_path, Some(bag_path.display().to_string()));
    assert_eq!(status.received, 3);
    assert_eq!(status.streams.len(), 1);
    assert_eq!(status.streams[0].name, "/chatter");
    assert!(wait_until(Duration::from_secs(2), || manager.status().writer.written == 3));

    manager.stop_recording().unwrap();
    assert_eq!(manager.status().state, RecordingState::Idle);
}

#[test]
fn test_launch_starts_immediately_when_configured() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let mut settings = test_settings(&dir, &["/chatter"]);
    settings.start_recording_immediately = true;

    let manager = RecorderManager::launch(settings, Arc::new(bus.clone())).unwrap();
    assert_eq!(manager.state(), RecordingState::Recording);
    assert_eq!(manager.trigger_start().message, "already recording!");
    manager.shutdown().unwrap();
    assert_eq!(manager.state(), RecordingState::Idle);
}

#[test]
fn test_launch_stays_idle_by_default() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = RecorderManager::launch(test_settings(&dir, &["/chatter"]), Arc::new(bus)).unwrap();
    assert_eq!(manager.state(), RecordingState::Idle);
    // shutdown without a session is fine
    manager.shutdown().unwrap();
}

#[test]
fn test_discovery_picks_up_streams_advertised_later() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let mut settings = test_settings(&dir, &[]);
    settings.record_all = true;
    settings.disable_discovery = false;
    settings.topic_polling_interval_ms = 20;
    let manager = manager(settings, &bus);

    let bag_path = started_path(manager.start_recording().unwrap());
    bus.advertise(StreamDescriptor::resolved("/late", "std_msgs/msg/String", "cdr"));
    assert!(wait_until(Duration::from_secs(5), || bus.subscriber_count("/late") == 1));

    bus.publish("/late", &b"found"[..]);
    manager.stop_recording().unwrap();

    let bag = read_bag(&bag_path).unwrap();
    assert_eq!(bag.payloads("/late"), vec![&b"found"[..]]);
    assert_eq!(bag.messages[0].message_type, "std_msgs/msg/String");
    let topic = bag.metadata.topic("/late").unwrap();
    assert_eq!(topic.topic_metadata.message_type, "std_msgs/msg/String");
}

#[test]
fn test_concurrent_triggers_start_exactly_one_session() {
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = Arc::new(manager(test_settings(&dir, &["/chatter"]), &bus));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || manager.trigger_start())
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.success)
        .count();

    assert_eq!(successes, 1);
    assert_eq!(bus.subscriber_count("/chatter"), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    manager.trigger_stop();
}

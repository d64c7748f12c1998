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

/// Control interface tests
///
/// Queries go through a real Zenoh session to the queryables; the recorder
/// itself records from the in-process transport.
///
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zenoh_bag_recorder::config::RecorderSettings;
use zenoh_bag_recorder::control::ControlInterface;
use zenoh_bag_recorder::protocol::*;
use zenoh_bag_recorder::recorder::RecorderManager;
use zenoh_bag_recorder::transport::LocalTransport;

/// Helper to create an isolated test session
async fn create_test_session() -> zenoh::Session {
    let mut config = zenoh::Config::default();
    config
        .insert_json5("scouting/multicast/enabled", "false")
        .unwrap();
    zenoh::open(config).await.unwrap()
}

fn test_manager(dir: &TempDir, bus: &LocalTransport) -> Arc<RecorderManager> {
    let settings = RecorderSettings {
        topics: vec!["/chatter".to_string()],
        output_dir: Some(dir.path().display().to_string()),
        compression_mode: "none".to_string(),
        ..RecorderSettings::default()
    };
    Arc::new(RecorderManager::new(settings, Arc::new(bus.clone())))
}

async fn query(session: &zenoh::Session, key: &str) -> Vec<u8> {
    let replies = session.get(key).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), replies.recv_async())
        .await
        .expect("no reply in time")
        .unwrap();
    match reply.result() {
        Ok(sample) => sample.payload().to_bytes().to_vec(),
        Err(e) => panic!("query on {} failed: {:?}", key, e),
    }
}

async fn trigger(session: &zenoh::Session, key: &str) -> TriggerResponse {
    serde_json::from_slice(&query(session, key).await).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_control_interface_run_timeout() {
    let session = create_test_session().await;
    let dir = TempDir::new().unwrap();
    let control = ControlInterface::new(session.clone(), test_manager(&dir, &LocalTransport::new()), "idle-test");

    // Run with timeout to avoid blocking forever
    let result = tokio::time::timeout(Duration::from_millis(500), control.run()).await;
    assert!(result.is_err(), "Control interface should keep serving");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_status_stop_over_queries() {
    let session = create_test_session().await;
    let dir = TempDir::new().unwrap();
    let bus = LocalTransport::new();
    let manager = test_manager(&dir, &bus);

    let control = ControlInterface::new(session.clone(), manager.clone(), "/recorder-test/");
    assert_eq!(control.key("status"), "recorder-test/status");
    let control_handle = tokio::spawn(async move { control.run().await });

    // Give the queryables time to be declared
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status: StatusResponse =
        serde_json::from_slice(&query(&session, "recorder-test/status").await).unwrap();
    assert_eq!(status.state, RecordingState::Idle);

    let stop = trigger(&session, "recorder-test/stop_recording").await;
    assert!(!stop.success);
    assert_eq!(stop.message, "not recording!");

    let start = trigger(&session, "recorder-test/start_recording").await;
    assert!(start.success, "{}", start.message);
    assert_eq!(start.message, "started recording!");

    let again = trigger(&session, "recorder-test/start_recording").await;
    assert!(!again.success);
    assert_eq!(again.message, "already recording!");

    bus.publish("/chatter", &b"over zenoh control"[..]);
    let status: StatusResponse =
        serde_json::from_slice(&query(&session, "recorder-test/status").await).unwrap();
    assert_eq!(status.state, RecordingState::Recording);
    assert_eq!(status.received, 1);
    let bag_path = status.bag_path.clone().unwrap();

    let stop = trigger(&session, "recorder-test/stop_recording").await;
    assert!(stop.success);
    assert_eq!(stop.message, "stopped recording!");
    assert_eq!(manager.state(), RecordingState::Idle);

    let bag = zenoh_bag_recorder::storage::read_bag(std::path::Path::new(&bag_path)).unwrap();
    assert_eq!(bag.payloads("/chatter"), vec![&b"over zenoh control"[..]]);

    control_handle.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_failure_is_reported_in_reply() {
    let session = create_test_session().await;
    let dir = TempDir::new().unwrap();
    let settings = RecorderSettings {
        record_all: true,
        disable_discovery: true,
        output_dir: Some(dir.path().display().to_string()),
        ..RecorderSettings::default()
    };
    let manager = Arc::new(RecorderManager::new(settings, Arc::new(LocalTransport::new())));

    let control = ControlInterface::new(session.clone(), manager.clone(), "recorder-fail");
    let control_handle = tokio::spawn(async move { control.run().await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let start = trigger(&session, "recorder-fail/start_recording").await;
    assert!(!start.success);
    assert!(start.message.starts_with("runtime error occurred:"), "{}", start.message);
    assert_eq!(manager.state(), RecordingState::Idle);

    control_handle.abort();
}

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

// Recorder manager: the state machine the control surface drives
//
// At most one session is live. Start and stop serialize on one control
// lock, so two starts or an interleaved start/stop can never be observed.
// The state itself sits behind a separate lock so status queries stay
// answerable while a transition is in progress.

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::options::SessionConfig;
use super::session::{RecordingSession, SessionSummary};
use crate::config::RecorderSettings;
use crate::error::Result;
use crate::protocol::{RecordingState, StatusResponse, TriggerResponse};
use crate::storage::{BackendFactory, StorageFactory};
use crate::transport::Transport;

pub const MSG_STARTED: &str = "started recording!";
pub const MSG_ALREADY_RECORDING: &str = "already recording!";
pub const MSG_STOPPED: &str = "stopped recording!";
pub const MSG_NOT_RECORDING: &str = "not recording!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { recording_id: String, bag_path: PathBuf },
    AlreadyRecording,
}

#[derive(Debug, Clone)]
pub enum StopOutcome {
    Stopped(SessionSummary),
    NotRecording,
}

pub struct RecorderManager {
    settings: RecorderSettings,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn StorageFactory>,
    session: Mutex<Option<RecordingSession>>,
    state: RwLock<RecordingState>,
}

impl RecorderManager {
    pub fn new(settings: RecorderSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
            storage: Arc::new(BackendFactory),
            session: Mutex::new(None),
            state: RwLock::new(RecordingState::Idle),
        }
    }

    /// Substitute the storage backend factory
    pub fn with_storage_factory(mut self, storage: Arc<dyn StorageFactory>) -> Self {
        self.storage = storage;
        self
    }

    /// Build the manager and start recording right away when configured to
    pub fn launch(settings: RecorderSettings, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let immediately = settings.start_recording_immediately;
        let manager = Arc::new(Self::new(settings, transport));
        if immediately {
            info!("start_recording_immediately is set");
            manager.start_recording()?;
        }
        Ok(manager)
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    fn set_state(&self, state: RecordingState) {
        *self.state.write() = state;
    }

    /// Idle -> Starting -> Recording, or back to Idle on failure
    pub fn start_recording(&self) -> Result<StartOutcome> {
        let mut session = self.session.lock();
        if session.is_some() {
            warn!("{}", MSG_ALREADY_RECORDING);
            return Ok(StartOutcome::AlreadyRecording);
        }

        info!("starting recording...");
        self.set_state(RecordingState::Starting);

        let started = SessionConfig::resolve(&self.settings, Local::now()).and_then(|config| {
            RecordingSession::start(config, self.transport.clone(), self.storage.as_ref())
        });

        match started {
            Ok(started) => {
                let outcome = StartOutcome::Started {
                    recording_id: started.id().to_string(),
                    bag_path: started.bag_path().to_path_buf(),
                };
                *session = Some(started);
                self.set_state(RecordingState::Recording);
                info!("started recording successfully");
                Ok(outcome)
            }
            Err(e) => {
                self.set_state(RecordingState::Idle);
                error!("Failed to start recording: {}", e);
                Err(e)
            }
        }
    }

    /// Recording -> Stopping -> Idle. Blocks until the bag is complete.
    ///
    /// The state returns to Idle even when finishing the bag fails; the
    /// error is still reported.
    pub fn stop_recording(&self) -> Result<StopOutcome> {
        let mut session = self.session.lock();
        let Some(live) = session.take() else {
            info!("Not recording...");
            return Ok(StopOutcome::NotRecording);
        };

        info!("stopping recording...");
        self.set_state(RecordingState::Stopping);
        let stopped = live.stop();
        self.set_state(RecordingState::Idle);

        match stopped {
            Ok(summary) => Ok(StopOutcome::Stopped(summary)),
            Err(e) => {
                error!("Failed to finish recording: {}", e);
                Err(e)
            }
        }
    }

    /// Control-surface view of [`start_recording`](Self::start_recording)
    pub fn trigger_start(&self) -> TriggerResponse {
        match self.start_recording() {
            Ok(StartOutcome::Started { .. }) => TriggerResponse::success(MSG_STARTED),
            Ok(StartOutcome::AlreadyRecording) => TriggerResponse::failure(MSG_ALREADY_RECORDING),
            Err(e) => TriggerResponse::failure(format!("runtime error occurred: {}", e)),
        }
    }

    /// Control-surface view of [`stop_recording`](Self::stop_recording)
    pub fn trigger_stop(&self) -> TriggerResponse {
        match self.stop_recording() {
            Ok(StopOutcome::Stopped(_)) => TriggerResponse::success(MSG_STOPPED),
            Ok(StopOutcome::NotRecording) => TriggerResponse::failure(MSG_NOT_RECORDING),
            Err(e) => TriggerResponse::failure(format!("runtime error occurred: {}", e)),
        }
    }

    pub fn status(&self) -> StatusResponse {
        match self.session.try_lock() {
            Some(session) => match session.as_ref() {
                Some(live) => live.status(),
                None => StatusResponse::idle(),
            },
            None => StatusResponse::transitioning(self.state()),
        }
    }

    /// Finish any live session
    pub fn shutdown(&self) -> Result<()> {
        if let StopOutcome::Stopped(summary) = self.stop_recording()? {
            info!("Recording saved to {}", summary.bag_path.display());
        }
        Ok(())
    }
}

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

use serde::{Deserialize, Serialize};

use crate::queue::QueueStats;
use crate::record::StreamDescriptor;
use crate::writer::WriterStatsSnapshot;

/// Recorder state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// Reply to `start_recording` / `stop_recording`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
}

impl TriggerResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Reply to `status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: RecordingState,
    pub recording_id: Option<String>,
    pub bag_path: Option<String>,
    pub streams: Vec<StreamDescriptor>,
    /// Messages delivered by the transport
    pub received: u64,
    pub queue: QueueStats,
    pub writer: WriterStatsSnapshot,
}

impl StatusResponse {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Status while a start or stop is in progress; counters are not sampled
    pub fn transitioning(state: RecordingState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }
}

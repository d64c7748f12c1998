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

// Error types shared by the recording engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;

/// Broad classification used by the control surface and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Io,
    Transport,
}

#[derive(Debug, Error)]
pub enum RecorderError {
    /// Invalid or contradictory configuration, detected before anything is opened
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("mcap error: {0}")]
    Mcap(#[from] mcap::McapError),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_yaml::Error),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl RecorderError {
    pub fn config(msg: impl Into<String>) -> Self {
        RecorderError::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        RecorderError::Storage(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::Config(_) => ErrorKind::Config,
            RecorderError::Transport(_) => ErrorKind::Transport,
            RecorderError::Io(_)
            | RecorderError::Storage(_)
            | RecorderError::Sqlite(_)
            | RecorderError::Mcap(_)
            | RecorderError::Metadata(_)
            | RecorderError::Compression(_) => ErrorKind::Io,
        }
    }
}

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

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use zenoh::query::Query;
use zenoh::Session;

use crate::protocol::TriggerResponse;
use crate::recorder::RecorderManager;

pub const START_RECORDING: &str = "start_recording";
pub const STOP_RECORDING: &str = "stop_recording";
pub const STATUS: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Status,
}

/// Control interface for the recorder via Zenoh queryables
///
/// Declares `<prefix>/start_recording`, `<prefix>/stop_recording` and
/// `<prefix>/status`. Replies are JSON.
pub struct ControlInterface {
    session: Session,
    recorder_manager: Arc<RecorderManager>,
    key_prefix: String,
}

impl ControlInterface {
    pub fn new(session: Session, recorder_manager: Arc<RecorderManager>, key_prefix: &str) -> Self {
        Self {
            session,
            recorder_manager,
            key_prefix: key_prefix.trim_matches('/').to_string(),
        }
    }

    pub fn key(&self, operation: &str) -> String {
        format!("{}/{}", self.key_prefix, operation)
    }

    /// Run the control interface (blocks until stopped)
    pub async fn run(&self) -> Result<()> {
        let start = self
            .session
            .declare_queryable(self.key(START_RECORDING))
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let stop = self
            .session
            .declare_queryable(self.key(STOP_RECORDING))
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let status = self
            .session
            .declare_queryable(self.key(STATUS))
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        info!("Control interface listening on '{}/*'", self.key_prefix);

        // Handle queries in parallel
        loop {
            let (query, command) = tokio::select! {
                Ok(query) = start.recv_async() => (query, Command::Start),
                Ok(query) = stop.recv_async() => (query, Command::Stop),
                Ok(query) = status.recv_async() => (query, Command::Status),
                else => break,
            };

            let recorder_manager = self.recorder_manager.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_query(query, command, recorder_manager).await {
                    error!("Error handling {:?} query: {}", command, e);
                }
            });
        }

        info!("Control queryables closed");
        Ok(())
    }

    async fn handle_query(
        query: Query,
        command: Command,
        recorder_manager: Arc<RecorderManager>,
    ) -> Result<()> {
        info!("Received control query on '{}'", query.selector());

        let payload = match command {
            Command::Status => to_json(&recorder_manager.status())?,
            Command::Start | Command::Stop => {
                // start and stop block on storage and thread joins
                let response = tokio::task::spawn_blocking(move || match command {
                    Command::Start => recorder_manager.trigger_start(),
                    _ => recorder_manager.trigger_stop(),
                })
                .await
                .unwrap_or_else(|e| TriggerResponse::failure(format!("runtime error occurred: {}", e)));
                info!("{:?}: {}", command, response.message);
                to_json(&response)?
            }
        };

        query
            .reply(query.key_expr().clone(), payload)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context("Failed to encode control response")
}

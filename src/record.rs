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

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Fixed per-record accounting overhead (timestamps, lengths, format tag)
pub const RECORD_OVERHEAD_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStatus {
    /// Type information is known
    Resolved,
    /// Subscribed by name only; type unknown
    Unresolved,
}

/// Metadata for one subscribed stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    pub message_type: Option<String>,
    pub serialization_format: String,
    pub status: DiscoveryStatus,
}

impl StreamDescriptor {
    pub fn resolved(
        name: impl Into<String>,
        message_type: impl Into<String>,
        serialization_format: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message_type: Some(message_type.into()),
            serialization_format: serialization_format.into(),
            status: DiscoveryStatus::Resolved,
        }
    }

    pub fn unresolved(name: impl Into<String>, serialization_format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_type: None,
            serialization_format: serialization_format.into(),
            status: DiscoveryStatus::Unresolved,
        }
    }

    /// Type name written to storage; unresolved streams get an empty type
    pub fn type_name(&self) -> &str {
        self.message_type.as_deref().unwrap_or("")
    }
}

/// A message as handed over by the transport callback
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub stream: String,
    pub payload: Bytes,
    /// Publisher-side timestamp, when the transport carries one
    pub publish_time_ns: Option<u64>,
}

/// One captured message instance. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Record {
    stream: Arc<StreamDescriptor>,
    receive_time_ns: u64,
    receive_instant: Instant,
    publish_time_ns: u64,
    payload: Bytes,
}

impl Record {
    pub fn new(stream: Arc<StreamDescriptor>, payload: Bytes, publish_time_ns: Option<u64>) -> Self {
        let receive_time_ns = wall_clock_ns();
        Self {
            stream,
            receive_time_ns,
            receive_instant: Instant::now(),
            publish_time_ns: publish_time_ns.unwrap_or(receive_time_ns),
            payload,
        }
    }

    pub fn stream(&self) -> &Arc<StreamDescriptor> {
        &self.stream
    }

    pub fn stream_name(&self) -> &str {
        &self.stream.name
    }

    pub fn serialization_format(&self) -> &str {
        &self.stream.serialization_format
    }

    /// Wall-clock receive time in nanoseconds since the Unix epoch
    pub fn receive_time_ns(&self) -> u64 {
        self.receive_time_ns
    }

    /// Monotonic receive time
    pub fn receive_instant(&self) -> Instant {
        self.receive_instant
    }

    pub fn publish_time_ns(&self) -> u64 {
        self.publish_time_ns
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Bytes charged against the ingress cache budget
    pub fn size_bytes(&self) -> usize {
        self.payload.len() + self.stream.name.len() + RECORD_OVERHEAD_BYTES
    }
}

pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

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

// Zenoh Bag Recorder
//
// Records a configurable set of streams into a bag on disk:
// - Subscribes to allow-listed or discovered streams
// - Buffers bursts in a byte-budgeted ingress queue
// - Writes from a single writer thread into sqlite3 or MCAP storage
// - Compresses per message or per file with zstd, lz4 or gzip
// - Starts and stops on request through Zenoh queryables

pub mod compression;
pub mod config;
pub mod control;
pub mod error;
pub mod names;
pub mod protocol;
pub mod queue;
pub mod record;
pub mod recorder;
pub mod storage;
pub mod subscription;
pub mod transport;
pub mod writer;

// Re-export main types
pub use compression::{CompressionLevel, CompressionMode, CompressionStage, CompressionType};
pub use config::{load_config, load_config_with_env, RecorderConfig, RecorderSettings};
pub use control::ControlInterface;
pub use error::{ErrorKind, RecorderError, Result};
pub use protocol::{RecordingState, StatusResponse, TriggerResponse};
pub use queue::{IngressQueue, PopResult, PushOutcome, QueueStats};
pub use record::{IncomingMessage, Record, StreamDescriptor};
pub use recorder::{RecorderManager, RecordingSession, SessionConfig, StartOutcome, StopOutcome};
pub use storage::{read_bag, BackendFactory, StorageBackend, StorageId};
pub use subscription::TopicSubscriptionSet;
pub use transport::{LocalTransport, Transport, ZenohTransport};
pub use writer::WriterThread;

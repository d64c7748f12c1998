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

// Storage backend trait for write-only recording

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::compression::CompressionType;
use crate::error::{RecorderError, Result};
use crate::record::StreamDescriptor;

/// Storage variant selector (`storage_id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageId {
    Sqlite3,
    Mcap,
}

impl StorageId {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageId::Sqlite3 => "sqlite3",
            StorageId::Mcap => "mcap",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            StorageId::Sqlite3 => "db3",
            StorageId::Mcap => "mcap",
        }
    }

    /// Reject preset profiles the backend does not know
    pub fn validate_preset(self, preset: Option<&str>) -> Result<()> {
        let known: &[&str] = match self {
            StorageId::Sqlite3 => &["none", "resilient"],
            StorageId::Mcap => &["none", "fastwrite", "zstd_fast", "zstd_small"],
        };
        match preset {
            None | Some("") => Ok(()),
            Some(p) if known.contains(&p) => Ok(()),
            Some(p) => Err(RecorderError::config(format!(
                "unknown storage_preset_profile '{}' for {} (supported: {})",
                p,
                self,
                known.join(", ")
            ))),
        }
    }
}

impl FromStr for StorageId {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sqlite3" => Ok(StorageId::Sqlite3),
            "mcap" => Ok(StorageId::Mcap),
            other => Err(RecorderError::config(format!(
                "unknown storage_id '{}' (supported: sqlite3, mcap)",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a backend needs to open a bag
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub storage_id: StorageId,
    /// Bag directory; must not exist yet
    pub bag_path: PathBuf,
    pub preset_profile: Option<String>,
    /// Algorithm used for per-message compression, `None` when payloads are stored as is
    pub message_compression: CompressionType,
}

impl StorageOptions {
    pub fn new(storage_id: StorageId, bag_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_id,
            bag_path: bag_path.into(),
            preset_profile: None,
            message_compression: CompressionType::None,
        }
    }

    /// `<bag>/<bag-name>_0.<ext>`
    pub fn storage_file_path(&self) -> PathBuf {
        let base = self
            .bag_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bag".to_string());
        self.bag_path
            .join(format!("{}_0.{}", base, self.storage_id.file_extension()))
    }

    pub fn preset(&self) -> Option<&str> {
        self.preset_profile.as_deref().filter(|p| !p.is_empty())
    }
}

/// A message as it reaches storage, after the compression stage
#[derive(Debug, Clone, Copy)]
pub struct BagMessage<'a> {
    pub stream: &'a StreamDescriptor,
    /// Receive time, nanoseconds since the Unix epoch
    pub log_time_ns: u64,
    pub publish_time_ns: u64,
    pub data: &'a [u8],
    /// Set when `data` is compressed; holds the original payload length
    pub uncompressed_len: Option<u64>,
}

/// Open storage file for one session
///
/// The writer thread owns the backend exclusively; nothing else writes to
/// the file. Implementations buffer or batch internally so `write_record`
/// stays cheap at high rates. Query operations are NOT part of this trait.
pub trait StorageBackend: Send {
    /// Backend identifier
    fn storage_id(&self) -> StorageId;

    /// Path of the file being written
    fn path(&self) -> &Path;

    /// Declare a stream ahead of its first record. Repeated calls are no-ops.
    fn register_stream(&mut self, stream: &StreamDescriptor) -> Result<()>;

    /// Append one record. Unregistered streams are registered on the fly.
    fn write_record(&mut self, message: &BagMessage<'_>) -> Result<()>;

    /// Make every record written so far durable
    fn flush(&mut self) -> Result<()>;

    /// Flush, finalize indexes/footers and release the file.
    /// Returns the path of the finished file, which is readable standalone.
    fn close(self: Box<Self>) -> Result<PathBuf>;
}

/// Opens storage backends; the seam used to substitute storage in tests
pub trait StorageFactory: Send + Sync {
    fn open(
        &self,
        options: &StorageOptions,
        schema_hints: &[StreamDescriptor],
    ) -> Result<Box<dyn StorageBackend>>;
}

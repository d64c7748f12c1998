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

// Configuration types for zenoh-bag-recorder

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub zenoh: ZenohConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Zenoh configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZenohConfig {
    #[serde(default = "default_mode")]
    pub mode: String, // "peer", "client", or "router"

    #[serde(default)]
    pub connect: Option<EndpointsConfig>,

    #[serde(default)]
    pub listen: Option<EndpointsConfig>,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: None,
            listen: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointsConfig {
    pub endpoints: Vec<String>,
}

/// Recording parameters; every field maps to one recorder option
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    /// Node name used for `~` expansion of topic names
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// "sqlite3" or "mcap"; unset picks by `use_compressed_container`
    #[serde(default)]
    pub storage_id: Option<String>,

    #[serde(default)]
    pub use_compressed_container: bool,

    #[serde(default)]
    pub storage_preset_profile: Option<String>,

    /// Ingress cache budget in bytes
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: u64,

    /// Used verbatim as the bag directory when set
    #[serde(default)]
    pub bag_name: Option<String>,

    #[serde(default = "default_bag_prefix")]
    pub bag_prefix: String,

    /// Directory the bag is created in
    #[serde(default)]
    pub output_dir: Option<String>,

    #[serde(default)]
    pub record_all: bool,

    #[serde(default = "default_true")]
    pub disable_discovery: bool,

    #[serde(default = "default_serialization_format")]
    pub serialization_format: String,

    #[serde(default)]
    pub topics: Vec<String>,

    #[serde(default = "default_topic_polling_interval_ms")]
    pub topic_polling_interval_ms: u64,

    #[serde(default = "default_compression_mode")]
    pub compression_mode: String, // "none", "message", "file"

    #[serde(default = "default_compression_format")]
    pub compression_format: String, // "zstd", "lz4", "gzip"

    #[serde(default = "default_compression_level")]
    pub compression_level: u8, // 0-4

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default)]
    pub start_recording_immediately: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            namespace: default_namespace(),
            storage_id: None,
            use_compressed_container: false,
            storage_preset_profile: None,
            max_cache_size: default_max_cache_size(),
            bag_name: None,
            bag_prefix: default_bag_prefix(),
            output_dir: None,
            record_all: false,
            disable_discovery: true,
            serialization_format: default_serialization_format(),
            topics: Vec::new(),
            topic_polling_interval_ms: default_topic_polling_interval_ms(),
            compression_mode: default_compression_mode(),
            compression_format: default_compression_format(),
            compression_level: default_compression_level(),
            flush_interval_ms: default_flush_interval_ms(),
            start_recording_immediately: false,
        }
    }
}

impl RecorderSettings {
    pub fn topic_polling_interval(&self) -> Duration {
        Duration::from_millis(self.topic_polling_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Queryables live at `<key_prefix>/start_recording|stop_recording|status`
    #[serde(default = "default_control_prefix")]
    pub key_prefix: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_control_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_mode() -> String { "peer".to_string() }
fn default_node_name() -> String { "rosbag2_recorder".to_string() }
fn default_namespace() -> String { "/".to_string() }
fn default_max_cache_size() -> u64 { 100 * 1024 * 1024 }
fn default_bag_prefix() -> String { "rosbag2_".to_string() }
fn default_true() -> bool { true }
fn default_serialization_format() -> String { "cdr".to_string() }
fn default_topic_polling_interval_ms() -> u64 { 100 }
fn default_compression_mode() -> String { "file".to_string() }
fn default_compression_format() -> String { "zstd".to_string() }
fn default_compression_level() -> u8 { 2 }
fn default_flush_interval_ms() -> u64 { 1000 }
fn default_control_prefix() -> String { "recorder".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

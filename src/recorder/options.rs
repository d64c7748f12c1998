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

// Immutable per-session configuration, resolved and validated at start

use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use crate::compression::{CompressionStage, CompressionType};
use crate::config::RecorderSettings;
use crate::error::{RecorderError, Result};
use crate::names::TopicMatcher;
use crate::storage::{StorageId, StorageOptions};
use crate::subscription::SubscriptionOptions;

/// `YYYY-MM-DD-HH-MM-SS`, local time
pub const BAG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

const DEFAULT_CONTAINER_PRESET: &str = "zstd_fast";

/// Snapshot of recording parameters for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub storage: StorageOptions,
    pub compression: CompressionStage,
    /// Ingress cache budget in bytes
    pub max_cache_size: usize,
    pub subscription: SubscriptionOptions,
    pub flush_interval: Duration,
}

impl SessionConfig {
    /// Validate `settings` and pin down everything a session needs,
    /// including the bag directory derived from `now`.
    pub fn resolve<Tz>(settings: &RecorderSettings, now: DateTime<Tz>) -> Result<Self>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let storage_id = resolve_storage_id(settings)?;

        let preset_profile = match settings.storage_preset_profile.as_deref() {
            Some(p) if !p.is_empty() => Some(p.to_string()),
            _ if settings.use_compressed_container => Some(DEFAULT_CONTAINER_PRESET.to_string()),
            _ => None,
        };
        storage_id.validate_preset(preset_profile.as_deref())?;

        let compression = CompressionStage::from_names(
            &settings.compression_mode,
            &settings.compression_format,
            settings.compression_level,
        )?;

        if settings.max_cache_size == 0 {
            return Err(RecorderError::config("max_cache_size must be greater than zero"));
        }
        let max_cache_size = usize::try_from(settings.max_cache_size).map_err(|_| {
            RecorderError::config(format!(
                "max_cache_size {} does not fit in memory on this platform",
                settings.max_cache_size
            ))
        })?;

        if settings.flush_interval_ms == 0 {
            return Err(RecorderError::config("flush_interval_ms must be greater than zero"));
        }

        let subscription = SubscriptionOptions {
            matcher: TopicMatcher::new(settings.topics.as_slice(), &settings.node_name, &settings.namespace)?,
            record_all: settings.record_all,
            discovery_enabled: !settings.disable_discovery,
            serialization_format: settings.serialization_format.clone(),
            polling_interval: settings.topic_polling_interval(),
        };
        subscription.validate()?;

        let message_compression = if compression.compresses_messages() {
            compression.format()
        } else {
            CompressionType::None
        };

        Ok(Self {
            storage: StorageOptions {
                storage_id,
                bag_path: resolve_bag_path(settings, now)?,
                preset_profile,
                message_compression,
            },
            compression,
            max_cache_size,
            subscription,
            flush_interval: settings.flush_interval(),
        })
    }
}

fn resolve_storage_id(settings: &RecorderSettings) -> Result<StorageId> {
    let explicit = settings
        .storage_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match (explicit, settings.use_compressed_container) {
        (None, false) => Ok(StorageId::Sqlite3),
        (None, true) => Ok(StorageId::Mcap),
        (Some(id), compressed) => {
            let id: StorageId = id.parse()?;
            if compressed && id != StorageId::Mcap {
                return Err(RecorderError::config(format!(
                    "use_compressed_container requires the mcap storage, but storage_id is '{}'",
                    id
                )));
            }
            Ok(id)
        }
    }
}

/// Bag directory for a session started at `now`
///
/// An explicit `bag_name` is used verbatim. Otherwise the name is
/// `bag_prefix` followed by the local timestamp; if that directory already
/// exists a `_1`, `_2`, ... suffix is added.
pub fn resolve_bag_path<Tz>(settings: &RecorderSettings, now: DateTime<Tz>) -> Result<PathBuf>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let base = settings
        .output_dir
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(PathBuf::from);
    let in_base = |name: &str| match &base {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    };

    if let Some(name) = settings.bag_name.as_deref().filter(|n| !n.is_empty()) {
        return Ok(in_base(name));
    }

    let generated = format!("{}{}", settings.bag_prefix, now.format(BAG_TIMESTAMP_FORMAT));
    let candidate = in_base(&generated);
    if !candidate.exists() {
        return Ok(candidate);
    }
    first_free(&generated, &in_base)
}

fn first_free(generated: &str, in_base: &dyn Fn(&str) -> PathBuf) -> Result<PathBuf> {
    for n in 1..1000u32 {
        let candidate = in_base(&format!("{}_{}", generated, n));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(RecorderError::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free bag directory name for '{}'", generated),
    )))
}

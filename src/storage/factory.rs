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

// Backend factory for opening storage backends from session options

use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

use super::backend::{StorageBackend, StorageFactory, StorageId, StorageOptions};
use super::mcap::McapBackend;
use super::sqlite::SqliteBackend;
use crate::error::{RecorderError, Result};
use crate::record::StreamDescriptor;

#[derive(Debug, Default, Clone, Copy)]
pub struct BackendFactory;

impl BackendFactory {
    /// Create the bag directory and open the configured backend inside it
    pub fn open(
        options: &StorageOptions,
        schema_hints: &[StreamDescriptor],
    ) -> Result<Box<dyn StorageBackend>> {
        options.storage_id.validate_preset(options.preset())?;
        prepare_bag_directory(&options.bag_path)?;

        match Self::open_in_directory(options, schema_hints) {
            Ok(backend) => {
                info!(
                    "Opened {} bag at {}",
                    backend.storage_id(),
                    backend.path().display()
                );
                Ok(backend)
            }
            Err(e) => {
                // the directory is ours and holds nothing worth keeping
                if let Err(cleanup) = fs::remove_dir_all(&options.bag_path) {
                    warn!(
                        "Failed to remove bag directory {}: {}",
                        options.bag_path.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    fn open_in_directory(
        options: &StorageOptions,
        schema_hints: &[StreamDescriptor],
    ) -> Result<Box<dyn StorageBackend>> {
        let file = options.storage_file_path();
        let mut backend: Box<dyn StorageBackend> = match options.storage_id {
            StorageId::Sqlite3 => Box::new(SqliteBackend::open(&file, options.preset())?),
            StorageId::Mcap => Box::new(McapBackend::open(
                &file,
                options.preset(),
                options.message_compression,
            )?),
        };
        for hint in schema_hints {
            backend.register_stream(hint)?;
        }
        Ok(backend)
    }
}

impl StorageFactory for BackendFactory {
    fn open(
        &self,
        options: &StorageOptions,
        schema_hints: &[StreamDescriptor],
    ) -> Result<Box<dyn StorageBackend>> {
        BackendFactory::open(options, schema_hints)
    }
}

fn prepare_bag_directory(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(RecorderError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("bag directory already exists: {}", path.display()),
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir(path)?;
    Ok(())
}

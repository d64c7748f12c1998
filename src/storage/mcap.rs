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

//! Chunked, self-describing container backend (MCAP)
//!
//! Each stream becomes an MCAP channel (with a schema record when the type
//! is known). Messages are grouped into chunks, optionally compressed, and
//! the summary written on close carries chunk indexes plus per-channel
//! message index offsets, so a reader can reach one stream's messages
//! without scanning the whole file.
//!
//! # Per-message compression
//!
//! When payloads were compressed upstream, the channel metadata carries
//! `message_compression=<format>` and every message is stored as
//! `[u64 LE original length][compressed bytes]`.
//!
//! # Presets
//!
//! | preset       | chunk compression | chunk size |
//! |--------------|-------------------|------------|
//! | `fastwrite`  | none              | 1 MiB      |
//! | `zstd_fast`  | zstd              | 1 MiB      |
//! | `zstd_small` | zstd              | 4 MiB      |
//!
//! No preset behaves like `zstd_fast`.

use ::mcap::records::MessageHeader;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::backend::{BagMessage, StorageBackend, StorageId};
use crate::compression::CompressionType;
use crate::error::{RecorderError, Result};
use crate::record::StreamDescriptor;

pub const PROFILE: &str = "ros2";
pub const SCHEMA_ENCODING: &str = "ros2msg";
pub const MESSAGE_COMPRESSION_KEY: &str = "message_compression";
/// Bytes of the original-length prefix on per-message compressed payloads
pub const LENGTH_PREFIX_BYTES: usize = 8;

const MIB: u64 = 1024 * 1024;

pub struct McapBackend {
    writer: Option<::mcap::Writer<BufWriter<File>>>,
    /// Second handle on the output file, used to push flushed data to disk
    file: File,
    path: PathBuf,
    channels: HashMap<String, u16>,
    sequences: HashMap<u16, u32>,
    message_compression: CompressionType,
    scratch: Vec<u8>,
}

impl McapBackend {
    pub fn open(path: &Path, preset: Option<&str>, message_compression: CompressionType) -> Result<Self> {
        let (compression, chunk_size) = match preset {
            Some("fastwrite") | Some("none") => (None, MIB),
            Some("zstd_small") => (Some(::mcap::Compression::Zstd), 4 * MIB),
            _ => (Some(::mcap::Compression::Zstd), MIB),
        };

        let file = File::create(path)?;
        let sync_handle = file.try_clone()?;
        let writer = ::mcap::WriteOptions::new()
            .profile(PROFILE)
            .compression(compression)
            .chunk_size(Some(chunk_size))
            .create(BufWriter::new(file))?;

        info!(
            "MCAP storage opened at {} (preset: {}, chunk size: {} bytes)",
            path.display(),
            preset.unwrap_or("zstd_fast"),
            chunk_size
        );

        Ok(Self {
            writer: Some(writer),
            file: sync_handle,
            path: path.to_path_buf(),
            channels: HashMap::new(),
            sequences: HashMap::new(),
            message_compression,
            scratch: Vec::new(),
        })
    }

    fn writer(&mut self) -> Result<&mut ::mcap::Writer<BufWriter<File>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| RecorderError::storage("mcap writer already finished"))
    }

    fn channel_id(&mut self, stream: &StreamDescriptor) -> Result<u16> {
        if let Some(id) = self.channels.get(&stream.name) {
            return Ok(*id);
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("offered_qos_profiles".to_string(), String::new());
        if self.message_compression != CompressionType::None {
            metadata.insert(
                MESSAGE_COMPRESSION_KEY.to_string(),
                self.message_compression.as_str().to_string(),
            );
        }

        let writer = self.writer()?;
        let schema_id = match stream.message_type.as_deref() {
            Some(message_type) => writer.add_schema(message_type, SCHEMA_ENCODING, &[])?,
            None => 0,
        };
        let channel_id = writer.add_channel(
            schema_id,
            &stream.name,
            &stream.serialization_format,
            &metadata,
        )?;

        debug!("Registered channel {} for '{}'", channel_id, stream.name);
        self.channels.insert(stream.name.clone(), channel_id);
        Ok(channel_id)
    }
}

impl StorageBackend for McapBackend {
    fn storage_id(&self) -> StorageId {
        StorageId::Mcap
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn register_stream(&mut self, stream: &StreamDescriptor) -> Result<()> {
        self.channel_id(stream).map(|_| ())
    }

    fn write_record(&mut self, message: &BagMessage<'_>) -> Result<()> {
        let channel_id = self.channel_id(message.stream)?;
        let sequence = self.sequences.entry(channel_id).or_insert(0);
        *sequence = sequence.wrapping_add(1);

        let header = MessageHeader {
            channel_id,
            sequence: *sequence,
            log_time: message.log_time_ns,
            publish_time: message.publish_time_ns,
        };

        match message.uncompressed_len {
            Some(len) => {
                let mut framed = std::mem::take(&mut self.scratch);
                framed.clear();
                framed.reserve(LENGTH_PREFIX_BYTES + message.data.len());
                framed.extend_from_slice(&len.to_le_bytes());
                framed.extend_from_slice(message.data);
                let result = self.writer()?.write_to_known_channel(&header, &framed);
                self.scratch = framed;
                result?;
            }
            None => self.writer()?.write_to_known_channel(&header, message.data)?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // closes the open chunk, then gets it onto the disk
        self.writer()?.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<PathBuf> {
        if let Some(mut writer) = self.writer.take() {
            writer.finish()?;
            drop(writer);
        }
        self.file.sync_all()?;
        info!(
            "MCAP storage closed: {} ({} channels)",
            self.path.display(),
            self.channels.len()
        );
        Ok(self.path.clone())
    }
}

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

// Offline reader for finished bags
//
// Reads a closed bag directory without the recorder running. Used to verify
// that bags are self-contained; this is not a playback engine.

use rusqlite::{Connection, OpenFlags};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use super::backend::StorageId;
use super::mcap::{LENGTH_PREFIX_BYTES, MESSAGE_COMPRESSION_KEY};
use super::metadata::{read_metadata, BagMetadata};
use crate::compression::{decoder, decompress, CompressionType};
use crate::error::{RecorderError, Result};

/// One message as stored in a bag, payload restored to its original bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub stream: String,
    pub message_type: String,
    pub serialization_format: String,
    pub log_time_ns: u64,
    pub publish_time_ns: u64,
    pub payload: Vec<u8>,
}

/// A finished bag: its metadata plus every message in storage order
#[derive(Debug, Clone)]
pub struct BagContents {
    pub metadata: BagMetadata,
    pub messages: Vec<StoredMessage>,
}

impl BagContents {
    /// Payloads of one stream, in storage order
    pub fn payloads(&self, stream: &str) -> Vec<&[u8]> {
        self.messages
            .iter()
            .filter(|m| m.stream == stream)
            .map(|m| m.payload.as_slice())
            .collect()
    }
}

pub fn read_bag(bag_dir: &Path) -> Result<BagContents> {
    let metadata = read_metadata(bag_dir)?;
    let storage_id: StorageId = metadata.storage_identifier.parse()?;

    let mut messages = Vec::new();
    for relative in &metadata.relative_file_paths {
        let path = bag_dir.join(relative);
        let file_compression = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(CompressionType::from_file_extension);

        debug!(
            "Reading {} ({}, file compression: {:?})",
            path.display(),
            storage_id,
            file_compression
        );

        let mut part = match storage_id {
            StorageId::Mcap => {
                let bytes = match file_compression {
                    Some(format) => decompress(format, BufReader::new(File::open(&path)?))?,
                    None => fs::read(&path)?,
                };
                read_mcap(&bytes)?
            }
            StorageId::Sqlite3 => {
                let message_format: CompressionType = metadata.compression_format.parse()?;
                match file_compression {
                    Some(format) => {
                        let scratch = inflate_to_scratch(&path, format)?;
                        read_sqlite(scratch.path(), message_format)?
                    }
                    None => read_sqlite(&path, message_format)?,
                }
            }
        };
        messages.append(&mut part);
    }

    Ok(BagContents { metadata, messages })
}

/// Topics that the summary section indexes, read without scanning chunks
pub fn mcap_indexed_streams(path: &Path) -> Result<BTreeSet<String>> {
    let bytes = fs::read(path)?;
    let summary = ::mcap::Summary::read(&bytes)?
        .ok_or_else(|| RecorderError::storage(format!("{} has no summary section", path.display())))?;

    let indexed: BTreeSet<u16> = summary
        .chunk_indexes
        .iter()
        .flat_map(|index| index.message_index_offsets.keys().copied())
        .collect();

    Ok(summary
        .channels
        .values()
        .filter(|channel| indexed.contains(&channel.id))
        .map(|channel| channel.topic.clone())
        .collect())
}

fn read_mcap(bytes: &[u8]) -> Result<Vec<StoredMessage>> {
    let mut messages = Vec::new();
    for message in ::mcap::MessageStream::new(bytes)? {
        let message = message?;
        let channel = &message.channel;

        let payload = match channel.metadata.get(MESSAGE_COMPRESSION_KEY) {
            Some(format) => {
                let format: CompressionType = format.parse()?;
                restore_prefixed(&message.data, format)?
            }
            None => message.data.to_vec(),
        };

        messages.push(StoredMessage {
            stream: channel.topic.clone(),
            message_type: channel
                .schema
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            serialization_format: channel.message_encoding.clone(),
            log_time_ns: message.log_time,
            publish_time_ns: message.publish_time,
            payload,
        });
    }
    Ok(messages)
}

fn restore_prefixed(data: &[u8], format: CompressionType) -> Result<Vec<u8>> {
    if data.len() < LENGTH_PREFIX_BYTES {
        return Err(RecorderError::storage("compressed message shorter than its length prefix"));
    }
    let (prefix, body) = data.split_at(LENGTH_PREFIX_BYTES);
    let mut len = [0u8; LENGTH_PREFIX_BYTES];
    len.copy_from_slice(prefix);
    restore(body, format, u64::from_le_bytes(len))
}

fn restore(body: &[u8], format: CompressionType, expected_len: u64) -> Result<Vec<u8>> {
    let payload = decompress(format, body)?;
    if payload.len() as u64 != expected_len {
        return Err(RecorderError::storage(format!(
            "decompressed {} bytes, expected {}",
            payload.len(),
            expected_len
        )));
    }
    Ok(payload)
}

fn read_sqlite(path: &Path, message_format: CompressionType) -> Result<Vec<StoredMessage>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let mut topics = HashMap::new();
    {
        let mut stmt = conn.prepare("SELECT id, name, type, serialization_format FROM topics")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                (
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ),
            ))
        })?;
        for row in rows {
            let (id, topic) = row?;
            topics.insert(id, topic);
        }
    }

    let mut stmt =
        conn.prepare("SELECT topic_id, timestamp, data, uncompressed_size FROM messages ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Vec<u8>>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (topic_id, timestamp, data, uncompressed_size) = row?;
        let (name, message_type, format) = topics
            .get(&topic_id)
            .ok_or_else(|| RecorderError::storage(format!("message references unknown topic {}", topic_id)))?;

        let payload = match uncompressed_size {
            Some(len) => restore(&data, message_format, len as u64)?,
            None => data,
        };

        messages.push(StoredMessage {
            stream: name.clone(),
            message_type: message_type.clone(),
            serialization_format: format.clone(),
            log_time_ns: timestamp as u64,
            publish_time_ns: timestamp as u64,
            payload,
        });
    }
    Ok(messages)
}

/// Decompressed copy of a per-file compressed database, removed on drop
fn inflate_to_scratch(source: &Path, format: CompressionType) -> Result<NamedTempFile> {
    let mut scratch = tempfile::Builder::new()
        .prefix("bag-")
        .suffix(".db3")
        .tempfile()?;
    let mut input = decoder(format, BufReader::new(File::open(source)?))?;
    io::copy(&mut input, scratch.as_file_mut()).map_err(|e| {
        RecorderError::Compression(format!("{} decompression of {} failed: {}", format, source.display(), e))
    })?;
    debug!("Inflated {} to {}", source.display(), scratch.path().display());
    Ok(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_prefixed_checks_length() {
        let original = b"hello hello hello".to_vec();
        let stage = crate::compression::CompressionStage::from_names("message", "zstd", 1).unwrap();
        let compressed = stage.compress(&original).unwrap();

        let mut framed = (original.len() as u64).to_le_bytes().to_vec();
        framed.extend_from_slice(&compressed);
        assert_eq!(restore_prefixed(&framed, CompressionType::Zstd).unwrap(), original);

        let mut wrong = 3u64.to_le_bytes().to_vec();
        wrong.extend_from_slice(&compressed);
        assert!(restore_prefixed(&wrong, CompressionType::Zstd).is_err());
        assert!(restore_prefixed(&[1, 2], CompressionType::Zstd).is_err());
    }

    #[test]
    fn test_scratch_copy_is_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let original = b"SQLite format 3\0 pretend database".repeat(64);
        let stage = crate::compression::CompressionStage::from_names("message", "gzip", 1).unwrap();
        let source = dir.path().join("bag_0.db3.gz");
        fs::write(&source, stage.compress(&original).unwrap()).unwrap();

        let scratch = inflate_to_scratch(&source, CompressionType::Gzip).unwrap();
        let scratch_path = scratch.path().to_path_buf();
        assert_eq!(fs::read(&scratch_path).unwrap(), original);
        assert!(scratch_path.extension().is_some_and(|ext| ext == "db3"));
        drop(scratch);
        assert!(!scratch_path.exists());
    }

    #[test]
    fn test_corrupt_artefact_fails_to_inflate() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("bag_0.db3.zstd");
        fs::write(&source, b"definitely not zstd").unwrap();
        let err = inflate_to_scratch(&source, CompressionType::Zstd).unwrap_err();
        assert!(matches!(err, RecorderError::Compression(_)), "{}", err);
    }
}

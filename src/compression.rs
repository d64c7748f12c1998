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

//! Compression stage applied between the ingress queue and storage
//!
//! Two modes are supported:
//!
//! - `message`: every payload is compressed on its own before it reaches the
//!   storage backend. The backend keeps the original length next to the
//!   compressed bytes.
//! - `file`: the finished storage file is streamed through a compressing
//!   encoder once the backend has closed it. Both storage variants need a
//!   seekable file while writing, so the wrap happens at finalization.
//!
//! # Performance
//!
//! - LZ4: ~500 MB/s compression, ~2 GB/s decompression
//! - Zstd: ~100-200 MB/s compression, ~500 MB/s decompression
//! - Gzip: slowest of the three, kept for tooling compatibility

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{RecorderError, Result};

/// Compression level (0-4)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    Fastest = 0,
    Fast = 1,
    #[default]
    Default = 2,
    Slow = 3,
    Slowest = 4,
}

impl CompressionLevel {
    pub fn from_u8(level: u8) -> Result<Self> {
        match level {
            0 => Ok(CompressionLevel::Fastest),
            1 => Ok(CompressionLevel::Fast),
            2 => Ok(CompressionLevel::Default),
            3 => Ok(CompressionLevel::Slow),
            4 => Ok(CompressionLevel::Slowest),
            other => Err(RecorderError::config(format!(
                "compression_level must be 0-4, got {}",
                other
            ))),
        }
    }

    pub fn to_zstd_level(self) -> i32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 10,
            CompressionLevel::Slowest => 19,
        }
    }

    pub fn to_lz4_level(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 9,
            CompressionLevel::Slowest => 12,
        }
    }

    pub fn to_gzip_level(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 6,
            CompressionLevel::Slow => 8,
            CompressionLevel::Slowest => 9,
        }
    }
}

/// Compression algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Lz4,
    #[default]
    Zstd,
    Gzip,
}

impl CompressionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionType::None => "",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
            CompressionType::Gzip => "gzip",
        }
    }

    /// Extension appended to per-file compressed artefacts
    pub fn file_extension(self) -> Option<&'static str> {
        match self {
            CompressionType::None => None,
            CompressionType::Lz4 => Some("lz4"),
            CompressionType::Zstd => Some("zstd"),
            CompressionType::Gzip => Some("gz"),
        }
    }

    pub fn from_file_extension(ext: &str) -> Option<Self> {
        match ext {
            "lz4" => Some(CompressionType::Lz4),
            "zstd" | "zst" => Some(CompressionType::Zstd),
            "gz" => Some(CompressionType::Gzip),
            _ => None,
        }
    }
}

impl FromStr for CompressionType {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(CompressionType::None),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            "gzip" | "gz" => Ok(CompressionType::Gzip),
            other => Err(RecorderError::config(format!(
                "unsupported compression format '{}' (supported: zstd, lz4, gzip)",
                other
            ))),
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    None,
    Message,
    File,
}

impl CompressionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionMode::None => "",
            CompressionMode::Message => "message",
            CompressionMode::File => "file",
        }
    }
}

impl FromStr for CompressionMode {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(CompressionMode::None),
            "message" | "per-message" | "per_message" => Ok(CompressionMode::Message),
            "file" | "per-file" | "per_file" => Ok(CompressionMode::File),
            other => Err(RecorderError::config(format!(
                "unsupported compression mode '{}' (supported: none, message, file)",
                other
            ))),
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured compression for one session
#[derive(Debug, Clone)]
pub struct CompressionStage {
    mode: CompressionMode,
    format: CompressionType,
    level: CompressionLevel,
}

impl CompressionStage {
    pub fn new(mode: CompressionMode, format: CompressionType, level: CompressionLevel) -> Result<Self> {
        if mode != CompressionMode::None && format == CompressionType::None {
            return Err(RecorderError::config(format!(
                "compression_mode '{}' requires a compression_format",
                mode
            )));
        }
        let format = if mode == CompressionMode::None {
            CompressionType::None
        } else {
            format
        };
        Ok(Self { mode, format, level })
    }

    /// Build from configuration strings; unknown names are configuration errors
    pub fn from_names(mode: &str, format: &str, level: u8) -> Result<Self> {
        let mode: CompressionMode = mode.parse()?;
        // the format is irrelevant when compression is off
        let format = if mode == CompressionMode::None {
            CompressionType::None
        } else {
            format.parse()?
        };
        Self::new(mode, format, CompressionLevel::from_u8(level)?)
    }

    pub fn disabled() -> Self {
        Self {
            mode: CompressionMode::None,
            format: CompressionType::None,
            level: CompressionLevel::Default,
        }
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    pub fn format(&self) -> CompressionType {
        self.format
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn compresses_messages(&self) -> bool {
        self.mode == CompressionMode::Message
    }

    /// Compress one payload in message mode; `None` when messages are stored as is
    pub fn compress_message(&self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.compresses_messages() {
            return Ok(None);
        }
        self.compress(payload).map(Some)
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        let written = encode_stream(self.format, self.level, data, &mut out)?;
        debug!(
            "Compressed {} bytes to {} using {} (ratio: {:.2}x)",
            written,
            out.len(),
            self.format,
            written as f64 / out.len().max(1) as f64
        );
        Ok(out)
    }

    /// Per-file mode: replace the closed file at `path` with a compressed copy
    ///
    /// Returns the path of the artefact that now holds the data. Other modes
    /// return `path` unchanged.
    pub fn wrap_file(&self, path: &Path) -> Result<PathBuf> {
        if self.mode != CompressionMode::File {
            return Ok(path.to_path_buf());
        }
        let ext = self.format.file_extension().ok_or_else(|| {
            RecorderError::config("file compression requires a compression_format")
        })?;

        let input = File::open(path)?;
        let target = append_extension(path, ext);
        let (original_size, compressed_size) = match self.write_compressed(input, &target) {
            Ok(sizes) => sizes,
            Err(e) => {
                // the original stays authoritative
                if target.exists() {
                    if let Err(cleanup) = fs::remove_file(&target) {
                        warn!("Failed to remove partial {}: {}", target.display(), cleanup);
                    }
                }
                return Err(e);
            }
        };

        fs::remove_file(path)?;

        info!(
            "Compressed {} ({} bytes) to {} ({} bytes) using {}",
            path.display(),
            original_size,
            target.display(),
            compressed_size,
            self.format
        );
        Ok(target)
    }

    fn write_compressed(&self, input: File, target: &Path) -> Result<(u64, u64)> {
        let mut output = BufWriter::new(File::create(target)?);
        let original_size = encode_stream(self.format, self.level, BufReader::new(input), &mut output)?;
        output.flush()?;
        let file = output.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok((original_size, file.metadata()?.len()))
    }
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Stream `input` through the encoder for `format` into `output`.
/// Returns the number of uncompressed bytes consumed.
fn encode_stream<R: Read, W: Write>(
    format: CompressionType,
    level: CompressionLevel,
    mut input: R,
    output: W,
) -> Result<u64> {
    let compression_err = |what: &str, e: std::io::Error| {
        RecorderError::Compression(format!("{} {} failed: {}", format, what, e))
    };

    match format {
        CompressionType::None => {
            let mut output = output;
            Ok(std::io::copy(&mut input, &mut output)?)
        }
        CompressionType::Zstd => {
            let mut encoder = zstd::stream::write::Encoder::new(output, level.to_zstd_level())
                .map_err(|e| compression_err("encoder setup", e))?;
            let n = std::io::copy(&mut input, &mut encoder)
                .map_err(|e| compression_err("compression", e))?;
            encoder
                .finish()
                .map_err(|e| compression_err("finish", e))?;
            Ok(n)
        }
        CompressionType::Lz4 => {
            let mut encoder = lz4::EncoderBuilder::new()
                .level(level.to_lz4_level())
                .build(output)
                .map_err(|e| compression_err("encoder setup", e))?;
            let n = std::io::copy(&mut input, &mut encoder)
                .map_err(|e| compression_err("compression", e))?;
            let (_, result) = encoder.finish();
            result.map_err(|e| compression_err("finish", e))?;
            Ok(n)
        }
        CompressionType::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(
                output,
                flate2::Compression::new(level.to_gzip_level()),
            );
            let n = std::io::copy(&mut input, &mut encoder)
                .map_err(|e| compression_err("compression", e))?;
            encoder
                .finish()
                .map_err(|e| compression_err("finish", e))?;
            Ok(n)
        }
    }
}

/// Inverse of [`CompressionStage::compress`]; also used for per-file artefacts
pub fn decompress<R: Read>(format: CompressionType, input: R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decoder(format, input)?
        .read_to_end(&mut out)
        .map_err(|e| RecorderError::Compression(format!("{} decompression failed: {}", format, e)))?;
    Ok(out)
}

/// Streaming counterpart of [`decompress`]
pub fn decoder<'a, R: Read + 'a>(format: CompressionType, input: R) -> Result<Box<dyn Read + 'a>> {
    let decoder: Box<dyn Read + 'a> = match format {
        CompressionType::None => Box::new(input),
        CompressionType::Zstd => Box::new(zstd::stream::read::Decoder::new(input).map_err(|e| {
            RecorderError::Compression(format!("{} decoder setup failed: {}", format, e))
        })?),
        CompressionType::Lz4 => Box::new(lz4::Decoder::new(input).map_err(|e| {
            RecorderError::Compression(format!("{} decoder setup failed: {}", format, e))
        })?),
        CompressionType::Gzip => Box::new(flate2::read::GzDecoder::new(input)),
    };
    Ok(decoder)
}

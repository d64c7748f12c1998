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

// SQLite backend: one relational file per bag
//
// Records are appended inside an open transaction that is committed on
// every flush, so a crash loses at most the records since the last flush
// and never corrupts committed ones.
//
// SQLite may roll the open transaction back on its own (disk full, I/O
// error). The connection then sits in autocommit mode; the next write or
// flush notices, drops the topic ids that went with the rollback and opens
// a fresh transaction.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::backend::{BagMessage, StorageBackend, StorageId};
use crate::error::Result;
use crate::record::StreamDescriptor;

const SCHEMA: &str = r#"
CREATE TABLE topics (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL,
    serialization_format TEXT NOT NULL,
    offered_qos_profiles TEXT NOT NULL
);
CREATE TABLE messages (
    id INTEGER PRIMARY KEY,
    topic_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    data BLOB NOT NULL,
    uncompressed_size INTEGER
);
CREATE INDEX timestamp_idx ON messages (timestamp ASC);
CREATE INDEX topic_idx ON messages (topic_id, id);
"#;

const INSERT_MESSAGE: &str =
    "INSERT INTO messages (topic_id, timestamp, data, uncompressed_size) VALUES (?1, ?2, ?3, ?4)";

pub struct SqliteBackend {
    conn: Connection,
    path: PathBuf,
    topics: HashMap<String, i64>,
    pending: usize,
}

impl SqliteBackend {
    pub fn open(path: &Path, preset: Option<&str>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // synchronous: 1 = NORMAL, 2 = FULL
        let (journal_mode, synchronous) = match preset {
            Some("resilient") => ("WAL", 1),
            _ => ("DELETE", 2),
        };
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", synchronous)?;
        debug!("SQLite journal_mode={} synchronous={}", mode, synchronous);
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch("BEGIN")?;

        info!(
            "SQLite storage opened at {} (preset: {})",
            path.display(),
            preset.unwrap_or("none")
        );

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            topics: HashMap::new(),
            pending: 0,
        })
    }

    /// Reopens the write transaction if SQLite rolled it back
    fn ensure_transaction(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            return Ok(());
        }
        warn!(
            "SQLite transaction on {} was rolled back, {} uncommitted messages lost",
            self.path.display(),
            self.pending
        );
        // rows inserted since the last commit are gone, so are their ids
        self.topics.clear();
        self.pending = 0;
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn topic_id(&mut self, stream: &StreamDescriptor) -> Result<i64> {
        if let Some(id) = self.topics.get(&stream.name) {
            return Ok(*id);
        }
        // the row may already exist when the cache was dropped after a rollback
        self.conn.execute(
            "INSERT OR IGNORE INTO topics (name, type, serialization_format, offered_qos_profiles) VALUES (?1, ?2, ?3, '')",
            params![stream.name, stream.type_name(), stream.serialization_format],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM topics WHERE name = ?1",
            params![stream.name],
            |row| row.get(0),
        )?;
        debug!("Registered topic '{}' with id {}", stream.name, id);
        self.topics.insert(stream.name.clone(), id);
        Ok(id)
    }
}

impl StorageBackend for SqliteBackend {
    fn storage_id(&self) -> StorageId {
        StorageId::Sqlite3
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn register_stream(&mut self, stream: &StreamDescriptor) -> Result<()> {
        self.ensure_transaction()?;
        self.topic_id(stream).map(|_| ())
    }

    fn write_record(&mut self, message: &BagMessage<'_>) -> Result<()> {
        self.ensure_transaction()?;
        let topic_id = self.topic_id(message.stream)?;
        let mut stmt = self.conn.prepare_cached(INSERT_MESSAGE)?;
        stmt.execute(params![
            topic_id,
            message.log_time_ns as i64,
            message.data,
            message.uncompressed_len.map(|len| len as i64),
        ])?;
        self.pending += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_transaction()?;
        if self.pending == 0 {
            return Ok(());
        }
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            // a failed COMMIT may or may not have rolled back; either way the
            // next call starts from a consistent state
            self.ensure_transaction()?;
            return Err(e.into());
        }
        debug!("Committed {} messages to {}", self.pending, self.path.display());
        self.pending = 0;
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<PathBuf> {
        let committed = if self.conn.is_autocommit() {
            Ok(())
        } else {
            self.conn.execute_batch("COMMIT")
        };
        if committed.is_err() && !self.conn.is_autocommit() {
            // leave the file in its last committed state
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        self.pending = 0;
        let SqliteBackend { conn, path, .. } = *self;
        let closed = conn.close().map_err(|(_, e)| e);
        committed?;
        closed?;
        info!("SQLite storage closed: {}", path.display());
        Ok(path)
    }
}

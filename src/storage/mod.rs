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

// Storage backend module
//
// Provides a trait-based abstraction for bag storage, with a relational
// (sqlite3) and a chunked container (mcap) variant.
//
// Backends are WRITE-ONLY. The reader exists to verify finished bags.

pub mod backend;
pub mod factory;
pub mod mcap;
pub mod metadata;
pub mod reader;
pub mod sqlite;

pub use backend::{BagMessage, StorageBackend, StorageFactory, StorageId, StorageOptions};
pub use factory::BackendFactory;
pub use self::mcap::McapBackend;
pub use metadata::{read_metadata, write_metadata, BagMetadata, METADATA_FILENAME};
pub use reader::{read_bag, BagContents, StoredMessage};
pub use sqlite::SqliteBackend;

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

// Bag-level metadata written next to the storage file on close

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

pub const METADATA_FILENAME: &str = "metadata.yaml";
pub const METADATA_VERSION: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFile {
    pub rosbag2_bagfile_information: BagMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BagMetadata {
    pub version: u32,
    pub storage_identifier: String,
    #[serde(default)]
    pub recording_id: String,
    pub relative_file_paths: Vec<String>,
    pub duration: Duration,
    pub starting_time: StartingTime,
    pub message_count: u64,
    pub topics_with_message_count: Vec<TopicInformation>,
    #[serde(default)]
    pub compression_format: String,
    #[serde(default)]
    pub compression_mode: String,
    #[serde(default)]
    pub dropped_message_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub nanoseconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartingTime {
    pub nanoseconds_since_epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicInformation {
    pub topic_metadata: TopicMetadata,
    pub message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub serialization_format: String,
    #[serde(default)]
    pub offered_qos_profiles: String,
}

impl BagMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicInformation> {
        self.topics_with_message_count
            .iter()
            .find(|t| t.topic_metadata.name == name)
    }
}

/// Write `metadata.yaml` into the bag directory
pub fn write_metadata(bag_dir: &Path, metadata: &BagMetadata) -> Result<()> {
    let file = MetadataFile {
        rosbag2_bagfile_information: metadata.clone(),
    };
    let yaml = serde_yaml::to_string(&file)?;
    let mut out = fs::File::create(bag_dir.join(METADATA_FILENAME))?;
    out.write_all(yaml.as_bytes())?;
    out.sync_all()?;
    Ok(())
}

pub fn read_metadata(bag_dir: &Path) -> Result<BagMetadata> {
    let content = fs::read_to_string(bag_dir.join(METADATA_FILENAME))?;
    let file: MetadataFile = serde_yaml::from_str(&content)?;
    Ok(file.rosbag2_bagfile_information)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_file_layout() {
        let dir = TempDir::new().unwrap();
        let metadata = BagMetadata {
            version: METADATA_VERSION,
            storage_identifier: "sqlite3".to_string(),
            recording_id: "rec-1".to_string(),
            relative_file_paths: vec!["bag_0.db3".to_string()],
            duration: Duration { nanoseconds: 10 },
            starting_time: StartingTime {
                nanoseconds_since_epoch: 1_700_000_000_000_000_000,
            },
            message_count: 3,
            topics_with_message_count: vec![TopicInformation {
                topic_metadata: TopicMetadata {
                    name: "/chatter".to_string(),
                    message_type: "std_msgs/msg/String".to_string(),
                    serialization_format: "cdr".to_string(),
                    offered_qos_profiles: String::new(),
                },
                message_count: 3,
            }],
            compression_format: String::new(),
            compression_mode: String::new(),
            dropped_message_count: 0,
        };

        write_metadata(dir.path(), &metadata).unwrap();
        let raw = fs::read_to_string(dir.path().join(METADATA_FILENAME)).unwrap();
        assert!(raw.starts_with("rosbag2_bagfile_information:"));
        assert!(raw.contains("type: std_msgs/msg/String"));

        let loaded = read_metadata(dir.path()).unwrap();
        assert_eq!(loaded.topic("/chatter").unwrap().message_count, 3);
    }
}

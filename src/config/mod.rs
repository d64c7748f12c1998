// Configuration module for zenoh-bag-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut RecorderConfig) {
    if let Ok(bag_name) = std::env::var("BAG_NAME") {
        config.recorder.bag_name = Some(bag_name);
    }

    if let Ok(bag_prefix) = std::env::var("BAG_PREFIX") {
        config.recorder.bag_prefix = bag_prefix;
    }

    if let Ok(storage_id) = std::env::var("STORAGE_ID") {
        config.recorder.storage_id = Some(storage_id);
    }
}

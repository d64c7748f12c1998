// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse YAML text, substituting environment variables first
    pub fn parse(content: &str) -> Result<RecorderConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: RecorderConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${BAG_DIR:-/data/bags} -> /data/bags (if BAG_DIR not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Validate configuration
    ///
    /// Only checks that need no recording context live here; option
    /// combinations are checked when a session starts.
    pub fn validate(config: &RecorderConfig) -> Result<()> {
        let recorder = &config.recorder;

        if recorder.max_cache_size == 0 {
            bail!("recorder.max_cache_size must be > 0");
        }

        if recorder.flush_interval_ms == 0 {
            bail!("recorder.flush_interval_ms must be > 0");
        }

        if recorder.topic_polling_interval_ms == 0 {
            bail!("recorder.topic_polling_interval_ms must be > 0");
        }

        if recorder.compression_level > 4 {
            bail!("recorder.compression_level must be 0-4");
        }

        if recorder.bag_prefix.is_empty()
            && recorder.bag_name.as_deref().map_or(true, str::is_empty)
        {
            bail!("recorder.bag_prefix cannot be empty when bag_name is unset");
        }

        match config.zenoh.mode.as_str() {
            "peer" | "client" | "router" => {}
            unknown => bail!("Unknown zenoh mode: '{}'. Supported: peer, client, router", unknown),
        }

        match config.logging.format.as_str() {
            "text" | "json" => {}
            unknown => bail!("Unknown logging format: '{}'. Supported: text, json", unknown),
        }

        if config.control.key_prefix.trim_matches('/').is_empty() {
            bail!("control.key_prefix cannot be empty");
        }

        Ok(())
    }
}

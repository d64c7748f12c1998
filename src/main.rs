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

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use zenoh_bag_recorder::config::{load_config_with_env, LoggingConfig, ZenohConfig};
use zenoh_bag_recorder::{ControlInterface, RecorderManager, ZenohTransport};

/// Zenoh Bag Recorder - record Zenoh streams into bags on disk
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Bag directory name (overrides config file)
    #[arg(short, long)]
    bag_name: Option<String>,

    /// Start recording as soon as the recorder is up
    #[arg(long)]
    start_immediately: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut recorder_config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(bag_name) = args.bag_name {
        recorder_config.recorder.bag_name = Some(bag_name);
    }
    if args.start_immediately {
        recorder_config.recorder.start_recording_immediately = true;
    }

    init_tracing(&recorder_config.logging)?;

    info!("Starting Zenoh Bag Recorder");
    info!("Loaded configuration from: {:?}", args.config);
    info!(
        "Storage: {}",
        recorder_config
            .recorder
            .storage_id
            .as_deref()
            .unwrap_or(if recorder_config.recorder.use_compressed_container {
                "mcap"
            } else {
                "sqlite3"
            })
    );

    // Open Zenoh session
    let session = zenoh::open(zenoh_config(&recorder_config.zenoh)?)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open Zenoh session: {}", e))?;

    info!("Zenoh session opened");

    let transport = Arc::new(ZenohTransport::new(
        session.clone(),
        recorder_config.recorder.serialization_format.clone(),
    ));

    // Create recorder manager; may start recording right away
    let settings = recorder_config.recorder.clone();
    let recorder_manager = tokio::task::spawn_blocking(move || RecorderManager::launch(settings, transport))
        .await
        .context("Recorder start task failed")??;

    // Start control interface
    let control_interface = ControlInterface::new(
        session.clone(),
        recorder_manager.clone(),
        &recorder_config.control.key_prefix,
    );

    // Run the control interface (blocks until Ctrl+C)
    tokio::select! {
        result = control_interface.run() => {
            if let Err(e) = result {
                tracing::error!("Control interface error: {}", e);
            }
            info!("Control interface stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Cleanup: finish any live bag before the session goes away
    let manager = recorder_manager.clone();
    tokio::task::spawn_blocking(move || manager.shutdown())
        .await
        .context("Recorder shutdown task failed")??;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("Zenoh Bag Recorder shut down successfully");

    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid logging level")?;

    if logging.format == "json" {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn zenoh_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    zenoh_config
        .insert_json5("mode", &serde_json::to_string(&config.mode)?)
        .map_err(|e| anyhow::anyhow!("Invalid zenoh mode: {}", e))?;

    if let Some(connect) = &config.connect {
        zenoh_config
            .insert_json5("connect/endpoints", &serde_json::to_string(&connect.endpoints)?)
            .map_err(|e| anyhow::anyhow!("Invalid connect endpoints: {}", e))?;
    }

    if let Some(listen) = &config.listen {
        zenoh_config
            .insert_json5("listen/endpoints", &serde_json::to_string(&listen.endpoints)?)
            .map_err(|e| anyhow::anyhow!("Invalid listen endpoints: {}", e))?;
    }

    Ok(zenoh_config)
}

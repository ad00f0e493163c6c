//! Top-level configuration: one section per context.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use content_connector::ConnectorConfig;
use extensions_bridge::BridgeConfig;
use network_tap::TapConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HintbridgeConfig {
    pub tap: TapConfig,
    pub bridge: BridgeConfig,
    pub connector: ConnectorConfig,
}

pub struct LoadedConfig {
    pub config: HintbridgeConfig,
    pub path: PathBuf,
}

/// Where the configuration is looked up when no path is given.
pub fn default_config_path() -> Result<PathBuf> {
    // Priority: ./config/hintbridge.yaml > <config dir>/hintbridge/config.yaml
    let local_config = PathBuf::from("config/hintbridge.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("hintbridge");
    path.push("config.yaml");
    Ok(path)
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    if config_path.exists() {
        let config = read_config(&config_path).await?;
        info!("Loaded configuration from: {}", config_path.display());
        Ok(LoadedConfig {
            config,
            path: config_path,
        })
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        Ok(LoadedConfig {
            config: HintbridgeConfig::default(),
            path: config_path,
        })
    }
}

async fn read_config(path: &Path) -> Result<HintbridgeConfig> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

pub async fn save_config(path: &Path, config: &HintbridgeConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let serialized = serde_yaml::to_string(config)?;
    fs::write(path, serialized)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

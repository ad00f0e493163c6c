use std::path::{Path, PathBuf};

use crate::config::HintbridgeConfig;

pub struct CliContext {
    config: HintbridgeConfig,
    config_path: PathBuf,
}

impl CliContext {
    pub fn new(config: HintbridgeConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &HintbridgeConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

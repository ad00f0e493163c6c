use crate::cli::context::CliContext;
use crate::config::{save_config, HintbridgeConfig};
use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde_json::Value as JsonValue;
use tracing::info;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (default)
    Show,

    /// Get one configuration value, e.g. `tap.request_ttl_ms`
    Get {
        /// Dotted configuration key
        key: String,
    },

    /// Write the default configuration to the config path
    Reset,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    match args.action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            println!("# Effective configuration ({})", ctx.config_path().display());
            print!("{}", serde_yaml::to_string(ctx.config())?);
        }
        ConfigAction::Get { key } => {
            let json = serde_json::to_value(ctx.config())?;
            let segments = split_key(&key)?;
            match get_json_value(&json, &segments) {
                Some(value) => print!("{}", serde_yaml::to_string(value)?),
                None => bail!("{} not found in configuration", key),
            }
        }
        ConfigAction::Reset => {
            let path = ctx.config_path();
            save_config(path, &HintbridgeConfig::default()).await?;
            info!("Wrote default configuration to {}", path.display());
            println!(
                "Configuration reset to defaults and written to {}",
                path.display()
            );
        }
    }
    Ok(())
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        bail!("configuration key must not be empty");
    }
    Ok(segments)
}

fn get_json_value<'a>(value: &'a JsonValue, segments: &[&str]) -> Option<&'a JsonValue> {
    segments
        .iter()
        .try_fold(value, |current, segment| current.get(*segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_keys_walk_sections() {
        let json = serde_json::to_value(HintbridgeConfig::default()).unwrap();
        let segments = split_key("bridge.injection_attempts").unwrap();
        assert_eq!(get_json_value(&json, &segments), Some(&JsonValue::from(3)));
        assert!(get_json_value(&json, &["tap", "missing"]).is_none());
        assert!(split_key("..").is_err());
    }
}

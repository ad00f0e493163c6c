use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::config::HintbridgeConfig;
use crate::replay::{replay, ReplayOptions, Scenario};

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Scenario file (JSON)
    pub scenario: PathBuf,

    /// Attach an inspection panel to the tab
    #[arg(long)]
    pub panel: bool,

    /// Capture response bodies from the stream
    #[arg(long, conflicts_with = "no_stream_capture")]
    pub stream_capture: bool,

    /// Fall back to re-fetching response bodies
    #[arg(long)]
    pub no_stream_capture: bool,

    /// Pretty-print the report
    #[arg(long)]
    pub pretty: bool,
}

impl ReplayArgs {
    fn options(&self) -> ReplayOptions {
        ReplayOptions {
            panel: self.panel.then_some(true),
            stream_capture: match (self.stream_capture, self.no_stream_capture) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
        }
    }
}

pub async fn cmd_replay(args: ReplayArgs, config: &HintbridgeConfig) -> Result<()> {
    let scenario = Scenario::from_path(&args.scenario).await?;
    info!(
        "Replaying {} ({} steps)",
        args.scenario.display(),
        scenario.steps.len()
    );
    let report = replay(config, scenario, args.options()).await?;

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .context("Failed to serialize replay report")?;
    println!("{rendered}");
    Ok(())
}

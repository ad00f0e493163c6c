use clap::Subcommand;

use super::config::ConfigArgs;
use super::replay::ReplayArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Replay a recorded page load through the background, analysis and panel contexts
    Replay(ReplayArgs),

    /// Show the effective configuration
    Config(ConfigArgs),

    /// Show version and build information
    Version,
}

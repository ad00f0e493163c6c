//! Hintbridge: request correlation and event delivery between a browser's network observer and
//! the analysis context of a page.
//!
//! The library crates do the work; this crate loads configuration, sets up logging and wires the
//! contexts together for replays.

pub mod cli;
pub mod config;
pub mod engine;
pub mod replay;

pub use config::{load_config, HintbridgeConfig, LoadedConfig};
pub use engine::{TranscriptEngine, TranscriptEntry};
pub use replay::{replay, ReplayOptions, ReplayReport, Scenario, Step};

pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod output;
pub mod replay;
pub mod runtime;
pub mod version;

pub use app::run;
pub use env::CliArgs;

//! CLI definitions.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coincache")]
#[command(author, version, about = "Read-through cache for cryptocurrency reference data and prices")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Log level, overriding the configured one
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Enable JSON log format
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API with background price refresh
    Serve(ServeArgs),
    /// Run one price refresh cycle and exit
    Refresh,
    /// Validate configuration
    ValidateConfig,
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Listen address, overriding the configured host
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port, overriding the configured port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not start the background refresh loop
    #[arg(long)]
    pub no_refresh: bool,
}

mod api;
mod auth;
mod cli;
mod commands;
mod config;
mod error;
mod utils;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose only changes the default
    let default_filter = if cli.verbose { "docscan=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Ok(config) = Config::load(cli.config.as_deref()) {
        if !config.color_output {
            colored::control::set_override(false);
        }
    }

    if let Err(e) = cli.execute().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

#![cfg_attr(not(test), forbid(unsafe_code))]

//! Main entry point for the Parley backend CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;
use std::path::PathBuf;

mod app_state;
mod db;
mod handlers;
mod http;
mod middleware;
mod openapi;
mod realtime;
mod routes;
mod server;
mod services;

#[cfg(test)]
mod testing;

/// Main CLI structure for the Parley server.
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Backend server for the Parley live-chat platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the Parley CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the backend server
    Serve {
        /// Port to bind, overriding configuration (e.g. `--port 8080`)
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a TOML or JSON configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved = Config::load(config, port)?;
    server::run(resolved).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}

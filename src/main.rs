//! jscp application server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (router per port, request ID, tracing)
//!                         │
//!                         ▼
//!                     http::dispatcher ──▶ site (registry, statics, error pages)
//!                         │
//!                         ▼
//!                     coordinator ──▶ runtime (interpreter, builtins, files)
//!                         │               ▲
//!                         │               └── template (compiled handlers)
//!                         ▼
//!     Client Response ◀── http::response
//!
//!     Cross-cutting: config, logging (Log Sink), observability, lifecycle
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use jscp::config::load_config;
use jscp::lifecycle::startup;
use jscp::observability::subscriber;

#[derive(Parser)]
#[command(name = "jscp")]
#[command(about = "Application server for .jscp template sites", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "jscp.toml")]
    config: PathBuf,

    /// Load and compile every site, report, and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("jscp: {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    subscriber::init(&config.logging.level);
    tracing::info!(
        config = %cli.config.display(),
        sites = config.sites.len(),
        "Configuration loaded"
    );

    if cli.check {
        return match startup::check(&config) {
            Ok(count) => {
                println!("{}: {} site(s) OK", cli.config.display(), count);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("jscp: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match startup::run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

// src/main.rs
use clap::Parser;
use dart_identity::cli::Cli;
use dart_identity::commands;
use dart_identity::config::Config;
use dart_identity::error::AppError;
use dart_identity::logging::setup_logging;
use std::io::stdout;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let config = Config::load().await?;

    // The guard must be kept alive for the duration of the program
    // to ensure logs are flushed properly
    let (log_file_path, _guard) = setup_logging(&cli, &config).await?;
    info!("Logging to {log_file_path}");

    let mut out = stdout().lock();
    let result = commands::run(&cli, &config, &mut out).await;
    if let Err(err) = &result {
        error!("Command failed: {err}");
    }
    result
}

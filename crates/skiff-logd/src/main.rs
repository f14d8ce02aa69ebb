//! `skiff-logd` binary.

use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use skiff_logd::{Cli, LogServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            eprintln!("ERROR while parsing request: {e}");
            eprintln!("goodbye logger...");
            return ExitCode::FAILURE;
        }
    };

    let default_level = if cli.is_debug() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("log server error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config()?;
    let server = LogServer::new(config)?;
    let listener = server.bind().await?;

    let abort = server.abort_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            abort.cancel();
        }
    });

    info!(addr = %listener.local_addr()?, "listening for job logs");
    server.serve(listener).await?;
    Ok(())
}

//! parcel command-line client

use anyhow::Result;
use parcel_client::{CancellationToken, Client};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli::build_cli().get_matches();
    let (name, sub_matches) = match matches.subcommand() {
        Some(subcommand) => subcommand,
        None => anyhow::bail!("no command given"),
    };
    // Global flags are visible on the subcommand wherever they were given
    let config = cli::client_config(sub_matches)?;
    let client = Client::new(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    info!("Running {} against {}", name, client.config().endpoint);

    commands::run(&client, name, sub_matches, cancel).await
}

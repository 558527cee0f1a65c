mod cli;
mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use authkeep_client::OAuthFactory;
use authkeep_client::config::{KeeperConfig, load_config};
use authkeep_client::observability::init_tracing_with_level;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(path) = &cli.store {
        config.store.path = Some(path.clone());
    }
    if config.store.path.is_none() {
        config.store.path = Some(default_store_path()?);
    }
    init_tracing_with_level(&config.logging.level);

    let factory = OAuthFactory::from_config(&config).await?;
    let result = dispatch(&cli, &factory, &config, format).await;

    // Reap explicitly handles its own sweep; everything else reaps on the way out.
    if !matches!(cli.command, Commands::Reap) {
        if let Err(e) = factory.shutdown().await {
            tracing::warn!(error = %e, "Shutdown reap failed");
        }
    }
    result
}

async fn dispatch(
    cli: &Cli,
    factory: &OAuthFactory,
    config: &KeeperConfig,
    format: cli::OutputFormat,
) -> Result<()> {
    match &cli.command {
        Commands::Register(args) => {
            commands::registration::register(factory, args, config.client.expiry_buffer_secs).await?;
        }
        Commands::Show(args) => commands::registration::show(factory, &args.handle, format).await?,
        Commands::Handles => commands::registration::handles(factory, format).await,
        Commands::Remove(args) => commands::registration::remove(factory, &args.handle).await?,
        Commands::Reap => commands::registration::reap(factory).await?,
        Commands::Authorize(args) => commands::grant::authorize(factory, args, format).await?,
        Commands::Password(args) => commands::grant::password(factory, args, format).await?,
        Commands::ClientCredentials(args) => {
            commands::grant::client_credentials(factory, args, format).await?;
        }
        Commands::Device(args) => commands::device::device(factory, args, format).await?,
        Commands::Import(args) => commands::grant::import(factory, args).await?,
        Commands::Token(args) => commands::grant::token(factory, &args.handle, format).await?,
        Commands::Refresh(args) => commands::grant::refresh(factory, &args.handle, format).await?,
    }
    Ok(())
}

fn default_store_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .or_else(dirs::home_dir)
        .context("Cannot determine a data directory for the token store")?;
    Ok(dir.join("authkeep").join("tokens.json"))
}

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "authkeep")]
#[command(about = "authkeep CLI - register OAuth clients and manage their cached tokens")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./authkeep.toml)
    #[arg(short, long, global = true, env = "AUTHKEEP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Token store file (overrides store.path)
    #[arg(short, long, global = true, env = "AUTHKEEP_STORE")]
    pub store: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register (or re-register) an OAuth client under a handle
    Register(RegisterArgs),
    /// Show a registration
    Show(HandleArgs),
    /// List registered handles
    Handles,
    /// Delete a handle and every record cached for it
    Remove(HandleArgs),
    /// Authorization code flow: print the URL, then paste the redirect
    Authorize(AuthorizeArgs),
    /// Resource owner password grant
    Password(PasswordArgs),
    /// Client credentials grant
    ClientCredentials(ScopeArgs),
    /// Device authorization grant (RFC 8628)
    Device(DeviceArgs),
    /// Import a token obtained elsewhere (JSON token response)
    Import(ImportArgs),
    /// Print the cached token, refreshing it when expired
    Token(HandleArgs),
    /// Force a refresh of the cached token
    Refresh(HandleArgs),
    /// Remove handles unused for longer than the retention period
    Reap,
}

#[derive(clap::Args)]
pub struct HandleArgs {
    /// Registration handle
    pub handle: String,
}

#[derive(clap::Args)]
pub struct RegisterArgs {
    /// Registration handle
    pub handle: String,
    /// Token endpoint
    #[arg(long)]
    pub token_url: Option<String>,
    /// Authorization endpoint (device authorization endpoint for `device`)
    #[arg(long)]
    pub authorization_url: Option<String>,
    #[arg(long)]
    pub client_id: Option<String>,
    #[arg(long, env = "AUTHKEEP_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
    /// Default scope
    #[arg(long)]
    pub scope: Option<String>,
    #[arg(long)]
    pub redirect_uri: Option<String>,
    /// Send client credentials with HTTP Basic auth
    #[arg(long)]
    pub basic_auth: bool,
    /// Seconds before expiry at which a token counts as expired
    #[arg(long)]
    pub expiry_buffer: Option<i64>,
}

#[derive(clap::Args)]
pub struct AuthorizeArgs {
    /// Registration handle
    pub handle: String,
    /// Redirect URI (defaults to the registered one)
    #[arg(long)]
    pub redirect_uri: Option<String>,
    /// Scope (defaults to the registered one)
    #[arg(long)]
    pub scope: Option<String>,
}

#[derive(clap::Args)]
pub struct PasswordArgs {
    /// Registration handle
    pub handle: String,
    #[arg(short, long)]
    pub username: String,
    #[arg(long, env = "AUTHKEEP_PASSWORD", hide_env_values = true)]
    pub password: String,
    #[arg(long)]
    pub scope: Option<String>,
}

#[derive(clap::Args)]
pub struct ScopeArgs {
    /// Registration handle
    pub handle: String,
    #[arg(long)]
    pub scope: Option<String>,
}

#[derive(clap::Args)]
pub struct DeviceArgs {
    /// Registration handle
    pub handle: String,
    /// Give up after this many seconds (defaults to the device code lifetime)
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(clap::Args)]
pub struct ImportArgs {
    /// Registration handle
    pub handle: String,
    /// Path to a JSON token response (reads from stdin if omitted)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

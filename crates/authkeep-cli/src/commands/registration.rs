use anyhow::Result;
use authkeep_client::OAuthFactory;
use authkeep_core::Registration;
use authkeep_store::ReapOutcome;
use colored::Colorize;

use super::require_service;
use crate::cli::{OutputFormat, RegisterArgs};
use crate::output::{print_handles, print_registration, print_success};

pub async fn register(factory: &OAuthFactory, args: &RegisterArgs, default_buffer: i64) -> Result<()> {
    let mut registration = Registration::new(&args.handle)
        .with_basic_auth(args.basic_auth)
        .with_expiry_buffer(args.expiry_buffer.unwrap_or(default_buffer));
    registration.token_url = args.token_url.clone();
    registration.authorization_url = args.authorization_url.clone();
    registration.client_id = args.client_id.clone();
    registration.client_secret = args.client_secret.clone();
    registration.scope = args.scope.clone();
    registration.redirect_uri = args.redirect_uri.clone();

    factory.create_service(registration).await?;
    print_success(&format!("Registered {}", args.handle.cyan()));
    Ok(())
}

pub async fn show(factory: &OAuthFactory, handle: &str, format: OutputFormat) -> Result<()> {
    let service = require_service(factory, handle).await?;
    print_registration(&service.registration().await, format);
    Ok(())
}

pub async fn handles(factory: &OAuthFactory, format: OutputFormat) {
    print_handles(&factory.handles().await, format);
}

pub async fn remove(factory: &OAuthFactory, handle: &str) -> Result<()> {
    if factory.get_service(handle).await?.is_none() {
        println!("No registration found for handle \"{handle}\"");
        return Ok(());
    }
    factory.delete_service_and_access_token(handle).await?;
    print_success(&format!("Removed {}", handle.cyan()));
    Ok(())
}

pub async fn reap(factory: &OAuthFactory) -> Result<()> {
    match factory.store().reap().await? {
        ReapOutcome::Completed { removed } if removed.is_empty() => {
            println!("Nothing to reap");
        }
        ReapOutcome::Completed { removed } => {
            print_success(&format!("Reaped {} handle(s): {}", removed.len(), removed.join(", ")));
        }
        ReapOutcome::Skipped => {
            println!("{}", "Token store busy, reap skipped".yellow());
        }
    }
    Ok(())
}

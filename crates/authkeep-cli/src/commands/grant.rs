use std::io::{self, BufRead, Read, Write};

use anyhow::{Context, Result};
use authkeep_client::{OAuthConnector, OAuthFactory};
use colored::Colorize;

use super::require_service;
use crate::cli::{AuthorizeArgs, ImportArgs, OutputFormat, PasswordArgs, ScopeArgs};
use crate::output::{print_success, print_token};

pub async fn authorize(factory: &OAuthFactory, args: &AuthorizeArgs, format: OutputFormat) -> Result<()> {
    let service = require_service(factory, &args.handle).await?;
    let url = service
        .authorization_url(args.redirect_uri.as_deref(), args.scope.as_deref(), None)
        .await?;

    println!("Open this URL in a browser and approve access:\n\n  {}\n", url.cyan());
    print!("Paste the URL you were redirected to: ");
    io::stdout().flush()?;
    let mut redirect = String::new();
    io::stdin()
        .lock()
        .read_line(&mut redirect)
        .context("failed to read redirect URL")?;

    let code = service.extract_auth_code(redirect.trim()).await?;
    let token = service
        .access_token_by_authorization_code(&code, args.redirect_uri.as_deref())
        .await?;
    print_success(&format!("Authorized {}", args.handle.cyan()));
    print_token(&token, format);
    Ok(())
}

pub async fn password(factory: &OAuthFactory, args: &PasswordArgs, format: OutputFormat) -> Result<()> {
    let service = require_service(factory, &args.handle).await?;
    let token = service
        .access_token_by_password(&args.username, &args.password, args.scope.as_deref())
        .await?;
    print_token(&token, format);
    Ok(())
}

pub async fn client_credentials(factory: &OAuthFactory, args: &ScopeArgs, format: OutputFormat) -> Result<()> {
    let service = require_service(factory, &args.handle).await?;
    let token = service
        .access_token_by_client_credentials(args.scope.as_deref())
        .await?;
    print_token(&token, format);
    Ok(())
}

pub async fn token(factory: &OAuthFactory, handle: &str, format: OutputFormat) -> Result<()> {
    let service = require_service(factory, handle).await?;
    match service.access_token().await? {
        Some(token) => print_token(&token, format),
        None => anyhow::bail!("No access token cached for {handle}"),
    }
    Ok(())
}

pub async fn refresh(factory: &OAuthFactory, handle: &str, format: OutputFormat) -> Result<()> {
    let service = require_service(factory, handle).await?;
    let token = service.refresh_token().await?;
    print_token(&token, format);
    Ok(())
}

pub async fn import(factory: &OAuthFactory, args: &ImportArgs) -> Result<()> {
    let service = require_service(factory, &args.handle).await?;
    let raw = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let token = OAuthConnector::parse_token_response(&raw)?;
    service.import_access_token(&token).await?;
    print_success(&format!("Imported token for {}", args.handle.cyan()));
    Ok(())
}

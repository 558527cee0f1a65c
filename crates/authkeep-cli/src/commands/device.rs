use std::time::Duration;

use anyhow::Result;
use authkeep_client::{OAuthFactory, PollOutcome};
use colored::Colorize;

use super::require_service;
use crate::cli::{DeviceArgs, OutputFormat};
use crate::output::{print_success, print_token};

/// Starts a device authorization and waits until the user approves it.
pub async fn device(factory: &OAuthFactory, args: &DeviceArgs, format: OutputFormat) -> Result<()> {
    let service = require_service(factory, &args.handle).await?;

    let Some(grant) = service.device_code_grant().await? else {
        print_success("A fresh access token is already cached");
        return Ok(());
    };

    println!(
        "Open {} and enter the code {}",
        grant.verification_uri.cyan(),
        grant.user_code.bold()
    );
    if let Some(complete) = &grant.verification_uri_complete {
        println!("or open {}", complete.cyan());
    }

    let lifetime = Duration::from_secs(u64::try_from(grant.expires_in).unwrap_or(0));
    let wait = args.timeout.map_or(lifetime, Duration::from_secs);
    tracing::debug!(handle = %args.handle, ?wait, "Waiting for device authorization");

    let outcome = tokio::select! {
        outcome = service.wait_for_device_authorization() => outcome,
        () = tokio::time::sleep(wait) => {
            service.close().await;
            anyhow::bail!("Device authorization was not completed in time");
        }
        _ = tokio::signal::ctrl_c() => {
            service.close().await;
            anyhow::bail!("Interrupted");
        }
    };

    match outcome {
        Some(PollOutcome::Authorized) => {}
        Some(PollOutcome::Expired) => anyhow::bail!("Device code expired before it was approved"),
        Some(PollOutcome::Denied(reason)) => anyhow::bail!("Device authorization failed: {reason}"),
        Some(PollOutcome::Cancelled) | None => anyhow::bail!("Device authorization was cancelled"),
    }

    match service.access_token().await? {
        Some(token) => {
            print_success(&format!("Authorized {}", args.handle.cyan()));
            print_token(&token, format);
            Ok(())
        }
        None => anyhow::bail!("Device authorization finished without a token"),
    }
}

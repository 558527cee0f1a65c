pub mod device;
pub mod grant;
pub mod registration;

use std::sync::Arc;

use anyhow::Result;
use authkeep_client::{OAuthClientService, OAuthFactory};

/// Looks up the service of a registered handle.
pub async fn require_service(factory: &OAuthFactory, handle: &str) -> Result<Arc<OAuthClientService>> {
    factory
        .get_service(handle)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Unknown handle: {handle}. Register it first"))
}

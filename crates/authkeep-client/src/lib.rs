//! OAuth2 client services for authkeep.
//!
//! One [`OAuthClientService`] manages one registered handle: it runs grant
//! exchanges through the [`OAuthConnector`], caches the result in the shared
//! [`TokenStore`](authkeep_store::TokenStore), refreshes on demand and tells
//! listeners about refreshed tokens. The [`OAuthFactory`] composes services
//! from a store and an [`HttpTransport`].
//!
//! # Example
//!
//! ```ignore
//! use authkeep_client::{OAuthFactory, config::KeeperConfig};
//! use authkeep_core::Registration;
//!
//! let factory = OAuthFactory::from_config(&KeeperConfig::default()).await?;
//! let service = factory
//!     .create_service(
//!         Registration::new("github")
//!             .with_token_url("https://github.com/login/oauth/access_token")
//!             .with_client_id("my-client")
//!             .with_client_secret("my-secret"),
//!     )
//!     .await?;
//!
//! let token = service.access_token_by_client_credentials(None).await?;
//! ```

pub mod config;
pub mod connector;
pub mod device;
pub mod factory;
pub mod listener;
pub mod observability;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{ClientAuth, DEFAULT_REQUEST_TIMEOUT, OAuthConnector};
pub use device::{DeviceCodeConnector, PollOutcome, Rfc8628Connector};
pub use factory::OAuthFactory;
pub use listener::{AccessTokenListener, ListenerSet};
pub use service::OAuthClientService;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};

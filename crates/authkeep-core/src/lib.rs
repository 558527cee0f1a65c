//! Core types shared by the authkeep crates.
//!
//! This crate holds the data model of an OAuth2 client registration and the
//! tokens it accumulates, plus the error taxonomy every other crate reports
//! through:
//!
//! - [`Registration`]: the persisted parameters of one handle
//! - [`AccessToken`]: a token pair with its freshness policy
//! - [`DeviceCodeGrant`]: an RFC 8628 device authorization response
//! - [`OAuthError`]: the typed, branchable failure returned to callers

pub mod device;
pub mod error;
pub mod registration;
pub mod time;
pub mod token;

pub use device::DeviceCodeGrant;
pub use error::{OAuthError, ProtocolError, Result};
pub use registration::{DEFAULT_EXPIRY_BUFFER_SECS, Registration};
pub use time::{Timestamp, now_utc};
pub use token::AccessToken;

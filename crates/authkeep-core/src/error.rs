//! OAuth client error types.
//!
//! Every failure a caller can observe is one of the variants of
//! [`OAuthError`]. The grouping mirrors how callers are expected to react:
//!
//! - configuration errors are raised before any network call and are never
//!   worth retrying
//! - protocol errors carry the provider's RFC 6749 error response verbatim
//! - service errors cover unexpected statuses and misuse of a handle
//! - transport errors are the only retryable class
//! - storage security errors distinguish an unreadable token from a token
//!   that was never issued

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result alias used throughout the authkeep crates.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Structured error response returned by a token endpoint (RFC 6749 5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Error code, e.g. `invalid_grant`. Empty when the provider omitted it.
    #[serde(default)]
    pub error: String,

    /// Human-readable description.
    #[serde(
        default,
        rename = "error_description",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    /// URI of a page describing the error.
    #[serde(default, rename = "error_uri", skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// State echoed back by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl ProtocolError {
    /// Creates a protocol error with only an error code.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            description: None,
            uri: None,
            state: None,
        }
    }

    /// Adds a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OAuth error response: {}", self.error)?;
        if let Some(description) = &self.description {
            write!(f, " ({description})")?;
        }
        Ok(())
    }
}

/// Errors surfaced by the OAuth client.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// A required URL, client id or scope is missing.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Which setting is missing or invalid.
        message: String,
    },

    /// The token endpoint answered 400 with a structured error body.
    #[error("{0}")]
    Protocol(ProtocolError),

    /// The token endpoint answered with a status other than 200 or 400.
    #[error("Bad http response, http code {status}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
    },

    /// The handle was closed or removed.
    #[error("Client service is closed")]
    Closed,

    /// The state returned in a redirect does not match the stored state.
    #[error("State mismatch: expected {expected:?}, received {received:?}")]
    StateMismatch {
        /// State generated for the authorization request.
        expected: Option<String>,
        /// State found in the redirect.
        received: Option<String>,
    },

    /// Misuse of the service that is not a configuration problem, or a
    /// provider answer that fits no other variant.
    #[error("Service error: {message}")]
    Service {
        /// Description of the failure.
        message: String,
    },

    /// Timeout, connection loss or interrupted exchange.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// Whether the request hit its timeout.
        timed_out: bool,
    },

    /// A response body could not be parsed.
    #[error("Response format error: {message}")]
    Format {
        /// Parser message.
        message: String,
    },

    /// A stored secret could not be decrypted.
    #[error("Storage security error: {message}")]
    StorageSecurity {
        /// Cipher message.
        message: String,
    },

    /// The persistence backend failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Backend message.
        message: String,
    },
}

impl OAuthError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Create a `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a `Service` error.
    #[must_use]
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Create a `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>, timed_out: bool) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out,
        }
    }

    /// Create a `Format` error.
    #[must_use]
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create a `StorageSecurity` error.
    #[must_use]
    pub fn storage_security(message: impl Into<String>) -> Self {
        Self::StorageSecurity {
            message: message.into(),
        }
    }

    /// Create a `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    /// Returns `true` if the error was raised before any network call.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns `true` for structured provider error responses.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` for generic service failures.
    #[must_use]
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedStatus { .. }
                | Self::Closed
                | Self::StateMismatch { .. }
                | Self::Service { .. }
        )
    }

    /// Returns `true` if retrying the same call may succeed.
    ///
    /// Only transport failures qualify. The client never retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns `true` if a stored secret could not be decrypted.
    #[must_use]
    pub fn is_storage_security_error(&self) -> bool {
        matches!(self, Self::StorageSecurity { .. })
    }

    /// Returns the provider error response, if any.
    #[must_use]
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ProtocolError> for OAuthError {
    fn from(error: ProtocolError) -> Self {
        Self::Protocol(error)
    }
}

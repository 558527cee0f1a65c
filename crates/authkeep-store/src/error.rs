//! Storage error types.

use authkeep_core::OAuthError;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the token store, its backends and ciphers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key-value backend failed.
    #[error("Storage backend error: {message}")]
    Backend { message: String },

    /// A record could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Encryption or decryption failed.
    #[error("Cipher error: {message}")]
    Cipher { message: String },

    /// No registered cipher matches the configured identifier.
    #[error("No cipher registered for '{target}'")]
    CipherNotFound { target: String },

    /// Key material could not be parsed.
    #[error("Invalid cipher key: {message}")]
    InvalidKey { message: String },
}

impl StoreError {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cipher(message: impl Into<String>) -> Self {
        Self::Cipher {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` when a secret could not be decrypted.
    #[must_use]
    pub fn is_security_error(&self) -> bool {
        matches!(self, Self::Cipher { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::backend(err.to_string())
    }
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cipher { message } => OAuthError::storage_security(message),
            StoreError::CipherNotFound { .. } | StoreError::InvalidKey { .. } => {
                OAuthError::configuration(err.to_string())
            }
            StoreError::Backend { message } => OAuthError::storage(message),
            StoreError::Serialization(e) => OAuthError::storage(e.to_string()),
        }
    }
}

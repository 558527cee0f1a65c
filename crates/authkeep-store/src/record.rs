//! Record kinds, the sealed on-disk envelope and the three-way lookup result.

use std::fmt;

use authkeep_core::{AccessToken, DeviceCodeGrant, Registration, Timestamp};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::cipher::StorageCipher;
use crate::error::{StoreError, StoreResult};

/// Key holding the JSON array of known handles.
pub const INDEX_KEY: &str = "INDEX_HANDLES";

/// The kinds of record kept per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    AccessToken,
    DeviceCodeGrant,
    Registration,
    LastUsed,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::AccessToken,
        RecordKind::DeviceCodeGrant,
        RecordKind::Registration,
        RecordKind::LastUsed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::AccessToken => "AccessToken",
            RecordKind::DeviceCodeGrant => "DeviceCodeGrant",
            RecordKind::Registration => "Registration",
            RecordKind::LastUsed => "LastUsed",
        }
    }

    /// Storage key of this kind for `handle`.
    pub fn key(&self, handle: &str) -> String {
        format!("{handle}.{}", self.as_str())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value stored under `(handle, kind)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRecord {
    AccessToken(AccessToken),
    DeviceCodeGrant(DeviceCodeGrant),
    Registration(Registration),
    LastUsed(Timestamp),
}

impl StorageRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            StorageRecord::AccessToken(_) => RecordKind::AccessToken,
            StorageRecord::DeviceCodeGrant(_) => RecordKind::DeviceCodeGrant,
            StorageRecord::Registration(_) => RecordKind::Registration,
            StorageRecord::LastUsed(_) => RecordKind::LastUsed,
        }
    }

    /// Serializes the record, sealing its secret fields with `cipher`.
    ///
    /// An encryption failure is not fatal: the record is written in
    /// cleartext, flagged as such, and a warning is logged.
    pub(crate) fn seal(&self, cipher: Option<&dyn StorageCipher>) -> StoreResult<String> {
        match self {
            StorageRecord::AccessToken(token) => seal_value(token.clone(), cipher),
            StorageRecord::DeviceCodeGrant(grant) => seal_value(grant.clone(), cipher),
            StorageRecord::Registration(registration) => {
                seal_value(registration.clone(), cipher)
            }
            StorageRecord::LastUsed(ts) => Ok(serde_json::to_string(ts)?),
        }
    }

    /// Parses a stored value of `kind`, decrypting sealed fields.
    pub(crate) fn unseal(
        kind: RecordKind,
        raw: &str,
        cipher: Option<&dyn StorageCipher>,
    ) -> StoreResult<Self> {
        Ok(match kind {
            RecordKind::AccessToken => StorageRecord::AccessToken(unseal_value(raw, cipher)?),
            RecordKind::DeviceCodeGrant => {
                StorageRecord::DeviceCodeGrant(unseal_value(raw, cipher)?)
            }
            RecordKind::Registration => StorageRecord::Registration(unseal_value(raw, cipher)?),
            RecordKind::LastUsed => StorageRecord::LastUsed(serde_json::from_str(raw)?),
        })
    }
}

/// Result of reading one record.
///
/// `Corrupt` keeps "never written" apart from "written but unreadable" so the
/// caller decides whether to degrade or to fail.
#[derive(Debug)]
pub enum Lookup<T> {
    Absent,
    Found(T),
    Corrupt(StoreError),
}

impl<T> Lookup<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Lookup::Corrupt(_))
    }

    /// Discards the distinction between absent and corrupt.
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Absent => Lookup::Absent,
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::Corrupt(err) => Lookup::Corrupt(err),
        }
    }
}

// =============================================================================
// Sealed envelope
// =============================================================================

/// On-disk wrapper recording whether secret fields are ciphertext.
#[derive(Serialize, Deserialize)]
struct Sealed<T> {
    #[serde(default)]
    encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cipher: Option<String>,
    value: T,
}

/// Records with fields that must not be stored in cleartext.
trait SecretFields: Sized {
    fn try_map_secrets(
        self,
        f: &mut dyn FnMut(String) -> StoreResult<String>,
    ) -> StoreResult<Self>;
}

fn map_opt(
    value: Option<String>,
    f: &mut dyn FnMut(String) -> StoreResult<String>,
) -> StoreResult<Option<String>> {
    value.map(|v| f(v)).transpose()
}

impl SecretFields for AccessToken {
    fn try_map_secrets(
        mut self,
        f: &mut dyn FnMut(String) -> StoreResult<String>,
    ) -> StoreResult<Self> {
        self.access_token = f(self.access_token)?;
        self.refresh_token = map_opt(self.refresh_token, f)?;
        Ok(self)
    }
}

impl SecretFields for DeviceCodeGrant {
    fn try_map_secrets(
        mut self,
        f: &mut dyn FnMut(String) -> StoreResult<String>,
    ) -> StoreResult<Self> {
        self.device_code = f(self.device_code)?;
        self.user_code = f(self.user_code)?;
        self.verification_uri = f(self.verification_uri)?;
        self.verification_uri_complete = map_opt(self.verification_uri_complete, f)?;
        Ok(self)
    }
}

impl SecretFields for Registration {
    fn try_map_secrets(
        mut self,
        f: &mut dyn FnMut(String) -> StoreResult<String>,
    ) -> StoreResult<Self> {
        self.client_secret = map_opt(self.client_secret, f)?;
        Ok(self)
    }
}

fn seal_value<T>(value: T, cipher: Option<&dyn StorageCipher>) -> StoreResult<String>
where
    T: SecretFields + Serialize + Clone,
{
    let sealed = match cipher {
        Some(cipher) => match value.clone().try_map_secrets(&mut |s: String| cipher.encrypt(&s)) {
            Ok(encrypted) => Sealed {
                encrypted: true,
                cipher: Some(cipher.id().to_string()),
                value: encrypted,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Encryption failed, storing record in cleartext");
                Sealed {
                    encrypted: false,
                    cipher: None,
                    value,
                }
            }
        },
        None => Sealed {
            encrypted: false,
            cipher: None,
            value,
        },
    };
    Ok(serde_json::to_string(&sealed)?)
}

fn unseal_value<T>(raw: &str, cipher: Option<&dyn StorageCipher>) -> StoreResult<T>
where
    T: SecretFields + DeserializeOwned,
{
    let sealed: Sealed<T> = serde_json::from_str(raw)?;
    if !sealed.encrypted {
        return Ok(sealed.value);
    }

    let cipher = cipher.ok_or_else(|| {
        StoreError::cipher("Record is encrypted but no cipher is configured")
    })?;
    if let Some(id) = sealed.cipher.as_deref()
        && id != cipher.id()
    {
        return Err(StoreError::cipher(format!(
            "Record was sealed with '{id}' but the active cipher is '{}'",
            cipher.id()
        )));
    }

    sealed.value.try_map_secrets(&mut |s: String| cipher.decrypt(&s))
}

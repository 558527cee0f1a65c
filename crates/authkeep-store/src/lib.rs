//! Durable, encrypted token persistence.
//!
//! [`TokenStore`] sits between the OAuth client and a raw
//! [`KeyValueStore`]. It owns the key layout, the handle index, the
//! encryption of secret-bearing fields and the retention sweep.
//!
//! # Key layout
//!
//! ```text
//! INDEX_HANDLES            JSON array of every known handle
//! <handle>.AccessToken     sealed AccessToken
//! <handle>.DeviceCodeGrant sealed DeviceCodeGrant
//! <handle>.Registration    sealed Registration
//! <handle>.LastUsed        RFC 3339 timestamp of the last write
//! ```
//!
//! # Ciphers
//!
//! Ciphers are registered in a [`CipherRegistry`] and selected once, by
//! identifier, when the store is built. A store without a cipher keeps
//! secrets in cleartext.

pub mod cipher;
pub mod error;
pub mod file;
pub mod kv;
pub mod record;
pub mod store;

pub use cipher::{CipherRegistry, StorageCipher, SymmetricKeyCipher};
pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
pub use kv::{InMemoryKeyValueStore, KeyValueStore};
pub use record::{Lookup, RecordKind, StorageRecord};
pub use store::{DEFAULT_REAP_LOCK_TIMEOUT, DEFAULT_RETENTION, ReapOutcome, StoreOptions, TokenStore};

//! Cache generation storage
//!
//! A generation is a named set of (request key → stored response) pairs. Names
//! follow `<kind>-v<versionToken>` so that each deployed version owns its own
//! generations and activation can garbage-collect everything else by name.
//!
//! The [`CacheStore`] trait is passed explicitly into the lifecycle controller
//! and the strategy executor. [`MemoryStore`] backs tests and ephemeral hosts;
//! [`DiskStore`] persists entries as JSON files in the XDG cache directory.

mod disk;
mod generation;
mod memory;

pub use disk::DiskStore;
pub use generation::{CacheKind, GenerationName};
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::Response;

/// Errors that can occur when reading or writing generations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be encoded or decoded
    #[error("Cache entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generation name is not usable as a storage location
    #[error("Invalid generation name: '{0}'")]
    InvalidName(String),
}

/// Identifies a cached response: method plus fully-qualified, cache-busted URL
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    /// HTTP method (only GET is ever stored)
    pub method: String,
    /// Absolute URL including the version marker
    pub url: String,
}

impl RequestKey {
    /// Key for a GET of the given absolute URL
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }
}

/// An immutable stored response
///
/// Refreshing an entry means writing a new one at the same key; entries are
/// never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Key this entry answers
    pub key: RequestKey,
    /// Status of the stored response
    pub status: u16,
    /// Stored response headers
    pub headers: Vec<(String, String)>,
    /// Stored response body
    #[serde(with = "body_base64")]
    pub body: Bytes,
    /// When the entry was written
    pub inserted_at: DateTime<Utc>,
}

impl CachedEntry {
    /// Snapshots a response under the given key
    pub fn from_response(key: RequestKey, response: &Response) -> Self {
        Self {
            key,
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            inserted_at: Utc::now(),
        }
    }

    /// Rebuilds the stored response
    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// Compares everything except the insertion time
    pub fn same_content(&self, other: &CachedEntry) -> bool {
        self.key == other.key
            && self.status == other.status
            && self.headers == other.headers
            && self.body == other.body
    }
}

/// Storage of named cache generations
///
/// Missing generations read as empty. `put` creates the generation on first
/// write; `replace_generation` swaps in a complete generation so readers never
/// observe a partially-populated one.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Lists every generation name currently stored
    async fn generation_names(&self) -> Result<Vec<String>, StoreError>;

    /// Returns true if the named generation exists
    async fn has_generation(&self, name: &str) -> Result<bool, StoreError>;

    /// Deletes a generation, returning whether it existed
    async fn delete_generation(&self, name: &str) -> Result<bool, StoreError>;

    /// Lists the keys stored in a generation
    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, StoreError>;

    /// Reads one entry
    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>, StoreError>;

    /// Writes one entry, replacing any entry at the same key
    async fn put(&self, name: &str, entry: CachedEntry) -> Result<(), StoreError>;

    /// Replaces the whole generation with exactly the given entries
    async fn replace_generation(&self, name: &str, entries: Vec<CachedEntry>)
        -> Result<(), StoreError>;
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

//! Disk-backed generation store
//!
//! Each generation is a directory under the cache root; each entry is a JSON
//! file named by the SHA-256 of its request key.

use std::path::PathBuf;

use async_trait::async_trait;
use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use tokio::fs;

use super::{CacheStore, CachedEntry, RequestKey, StoreError};

/// Prefix for directories that are being written and are not yet generations
const STAGING_PREFIX: &str = ".staging-";

/// Prefix of a replaced generation awaiting deletion
const RETIRED_PREFIX: &str = ".replaced-";

/// Persists generations to the filesystem
///
/// The store lives in an XDG-compliant cache directory (`~/.cache/cachewarden/`
/// on Linux). Directory layout:
///
/// ```text
/// {root}/
/// +-- static-v1.0.1-1699999999/
/// |   +-- 3f9a...e1.json
/// +-- dynamic-v1.0.1-1699999999/
///     +-- ...
/// ```
#[derive(Debug, Clone)]
pub struct DiskStore {
    /// Directory holding one subdirectory per generation
    root: PathBuf,
}

impl DiskStore {
    /// Creates a DiskStore in the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "cachewarden")?;
        Some(Self {
            root: project_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Creates a DiskStore rooted at a custom directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the store's root directory
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Returns the directory of a generation, rejecting names that would escape the root
    fn generation_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// File name for an entry within its generation directory
    fn entry_file(key: &RequestKey) -> String {
        let digest = Sha256::digest(format!("{} {}", key.method, key.url).as_bytes());
        format!("{:x}.json", digest)
    }

    /// Ensures the root directory exists
    async fn ensure_root(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    async fn write_entry(dir: &std::path::Path, entry: &CachedEntry) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entry)?;
        let path = dir.join(Self::entry_file(&entry.key));
        let partial = path.with_extension("json.partial");
        fs::write(&partial, json).await?;
        fs::rename(&partial, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn generation_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let name = item.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn has_generation(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.generation_dir(name)?;
        Ok(fs::try_exists(&dir).await?)
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.generation_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, StoreError> {
        let dir = self.generation_dir(name)?;
        let mut keys = Vec::new();
        let mut listing = match fs::read_dir(&dir).await {
            Ok(listing) => listing,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };

        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read(&path).await?;
            let entry: CachedEntry = serde_json::from_slice(&content)?;
            keys.push(entry.key);
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>, StoreError> {
        let path = self.generation_dir(name)?.join(Self::entry_file(key));
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: CachedEntry = serde_json::from_slice(&content)?;

        // Guard against a digest collision handing back a different key
        Ok((&entry.key == key).then_some(entry))
    }

    async fn put(&self, name: &str, entry: CachedEntry) -> Result<(), StoreError> {
        let dir = self.generation_dir(name)?;
        fs::create_dir_all(&dir).await?;
        Self::write_entry(&dir, &entry).await
    }

    async fn replace_generation(
        &self,
        name: &str,
        entries: Vec<CachedEntry>,
    ) -> Result<(), StoreError> {
        let dir = self.generation_dir(name)?;
        self.ensure_root().await?;

        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let staging = self.root.join(format!("{}{}-{}", STAGING_PREFIX, name, stamp));
        fs::create_dir_all(&staging).await?;

        for entry in &entries {
            if let Err(err) = Self::write_entry(&staging, entry).await {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(err);
            }
        }

        // The previous generation stays on disk until the new one is in place
        let retired = self.root.join(format!("{}{}-{}", RETIRED_PREFIX, name, stamp));
        let had_previous = match fs::rename(&dir, &retired).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(err.into());
            }
        };

        if let Err(err) = fs::rename(&staging, &dir).await {
            if had_previous {
                if let Err(restore) = fs::rename(&retired, &dir).await {
                    tracing::warn!(generation = name, error = %restore, "failed to restore previous generation");
                }
            }
            let _ = fs::remove_dir_all(&staging).await;
            return Err(err.into());
        }

        if had_previous {
            if let Err(err) = fs::remove_dir_all(&retired).await {
                tracing::warn!(generation = name, error = %err, "failed to remove replaced generation");
            }
        }
        tracing::debug!(generation = name, entries = entries.len(), "generation replaced");
        Ok(())
    }
}

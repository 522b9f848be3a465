//! Ordered key-value partitions.
//!
//! ```text
//!   TypedStore::get<V>(key) ──► StoreKey::key_bytes ──► KeyValueStore::get_raw
//!                                                            │
//!                          V::decode ◄── bytes ◄─────────────┘
//! ```
//!
//! A [`Partition`] is one sled database in its own directory. The directory is
//! guarded by an exclusive lock file for the lifetime of the handle, so a
//! second open (same process or another one) fails with
//! [`StoreError::AlreadyOpen`] instead of racing the first.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::codec::{Storable, StoreKey};
use crate::error::{StoreError, StoreResult};

const LOCK_FILE: &str = "LOCK";
const DB_DIR: &str = "db";

/// Raw byte-level store. Implementations must be safe to share across threads.
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;
    fn set_raw(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Typed access over any [`KeyValueStore`].
pub trait TypedStore: KeyValueStore {
    /// Encodes `value` with its codec and writes it under `key`.
    fn set<K, V>(&self, key: &K, value: &V) -> StoreResult<()>
    where
        K: StoreKey + ?Sized,
        V: Storable,
    {
        let bytes = value.encode()?;
        self.set_raw(&key.key_bytes(), &bytes)
    }

    /// Reads and decodes the value under `key`.
    ///
    /// Missing keys are [`StoreError::NotFound`]; bytes that do not decode as
    /// `V` are [`StoreError::Deserialization`].
    fn get<K, V>(&self, key: &K) -> StoreResult<V>
    where
        K: StoreKey + ?Sized,
        V: Storable,
    {
        let key = key.key_bytes();
        match self.get_raw(&key)? {
            Some(bytes) => V::decode(&bytes),
            None => Err(StoreError::not_found(&key)),
        }
    }

    /// Like [`TypedStore::get`] but a missing key yields `V::default()`.
    fn get_or_default<K, V>(&self, key: &K) -> StoreResult<V>
    where
        K: StoreKey + ?Sized,
        V: Storable + Default,
    {
        match self.get(key) {
            Err(err) if err.is_not_found() => Ok(V::default()),
            other => other,
        }
    }
}

impl<S: KeyValueStore + ?Sized> TypedStore for S {}

// ============================================================================
// Sled partition
// ============================================================================

pub struct Partition {
    path: PathBuf,
    db: sled::Db,
    // Held for the lifetime of the partition; the OS releases it on drop.
    _lock: File,
}

impl Partition {
    /// Opens (creating if needed) the partition rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::AlreadyOpen { path });
        }

        let db = sled::Config::new().path(path.join(DB_DIR)).open()?;
        tracing::debug!(path = %path.display(), "opened partition");

        Ok(Self {
            path,
            db,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Keys in byte order.
    pub fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        self.db
            .iter()
            .keys()
            .map(|key| key.map(|k| k.to_vec()).map_err(StoreError::from))
            .collect()
    }

    /// Flushes and releases the partition.
    pub fn close(self) -> StoreResult<()> {
        self.db.flush()?;
        tracing::debug!(path = %self.path.display(), "closed partition");
        Ok(())
    }
}

impl KeyValueStore for Partition {
    fn get_raw(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    fn set_raw(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("path", &self.path)
            .field("len", &self.db.len())
            .finish()
    }
}

//! # Database — Embedded Key/Value Storage
//!
//! The persistence layer for the server, built on sled's embedded
//! key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees", each an independent B+ tree
//! with its own keyspace:
//!
//! | Tree  | Key                            | Value                         |
//! |-------|--------------------------------|-------------------------------|
//! | `did` | method-specific id (UTF-8)     | `json(DidDocument)`           |
//! | `reg` | hex nonce (128 chars)          | `json(PendingRegistration)`   |
//! | `inv` | full DID (`did:web:...`)       | `json(InvoiceRecord)`         |
//!
//! ## Atomicity
//!
//! Every operation on a single key is linearizable. There are no
//! cross-key transactions. The two compound operations are
//! [`KvStore::take`], an atomic read-and-remove, and
//! [`KvStore::insert_if_absent`], an atomic check-and-write.

use std::fmt::Debug;
use std::path::Path;

use sled::{Db, Tree};

use crate::didweb::DidWebError;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record key: {0}")]
    InvalidKey(#[from] DidWebError),

    #[error("could not prepare storage directory: {0}")]
    Directory(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// File name of the sled database inside the storage directory.
const DB_FILE: &str = "dids.db";

// ---------------------------------------------------------------------------
// KvStore
// ---------------------------------------------------------------------------

/// Minimal key/value interface the record stores are written against.
///
/// A missing key and an empty value are the same thing: both read back as
/// `None`.
pub trait KvStore: Send + Sync + Debug {
    /// Insert or overwrite `key`.
    fn set(&self, key: &str, value: &[u8]) -> DbResult<()>;

    /// Read `key`.
    fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> DbResult<()>;

    /// Remove `key` and return what it held, in one atomic step. Of any
    /// number of concurrent `take`s on the same key, at most one sees the
    /// value.
    fn take(&self, key: &str) -> DbResult<Option<Vec<u8>>>;

    /// Write `key` only if it is not present, in one atomic step. Returns
    /// `false`, leaving the stored value untouched, when it already exists.
    fn insert_if_absent(&self, key: &str, value: &[u8]) -> DbResult<bool>;
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Handle to the sled database backing all record stores.
///
/// # Thread Safety
///
/// sled is inherently thread-safe. `Database` and the trees it hands out
/// can be shared across threads without external synchronization.
#[derive(Debug, Clone)]
pub struct Database {
    db: Db,
}

impl Database {
    /// Open or create the database inside `dir`.
    ///
    /// The directory is created if it does not exist. Failure here is the
    /// one storage error the server cannot recover from.
    pub fn open<P: AsRef<Path>>(dir: P) -> DbResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db = sled::open(dir.join(DB_FILE))?;
        Ok(Self { db })
    }

    /// Create a temporary database that lives in memory and is cleaned
    /// up automatically when dropped. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Open (or create) the named tree.
    pub fn tree(&self, name: &str) -> DbResult<SledTree> {
        Ok(SledTree {
            tree: self.db.open_tree(name)?,
        })
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SledTree
// ---------------------------------------------------------------------------

/// One named sled tree, exposed through [`KvStore`].
#[derive(Debug, Clone)]
pub struct SledTree {
    tree: Tree,
}

impl SledTree {
    /// Number of keys in the tree.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl KvStore for SledTree {
    fn set(&self, key: &str, value: &[u8]) -> DbResult<()> {
        self.tree.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self
            .tree
            .get(key.as_bytes())?
            .filter(|value| !value.is_empty())
            .map(|value| value.to_vec()))
    }

    fn delete(&self, key: &str) -> DbResult<()> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    fn take(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self
            .tree
            .remove(key.as_bytes())?
            .filter(|value| !value.is_empty())
            .map(|value| value.to_vec()))
    }

    fn insert_if_absent(&self, key: &str, value: &[u8]) -> DbResult<bool> {
        let swapped = self
            .tree
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

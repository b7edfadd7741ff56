//! Durable tier backed by LMDB through `heed`.
//!
//! Values use the shared binary encoding, so an entry read back after a
//! restart still carries its original write time and TTL. LMDB never
//! expires anything on its own: expired entries stay on disk until they
//! are overwritten or deleted, and reads filter them out.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use marketcache_core::{CacheEntry, CacheError, CacheResult, TierKind};

use super::CacheTier;
use crate::encoding::{decode_entry, encode_entry};

/// Error type for LMDB tier setup and transactions.
#[derive(Debug, thiserror::Error)]
pub enum LmdbTierError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbTierError> for CacheError {
    fn from(e: LmdbTierError) -> Self {
        CacheError::TierUnavailable {
            tier: TierKind::Durable,
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbTierError {
    LmdbTierError::Transaction(e.to_string())
}

/// LMDB-backed durable tier.
pub struct LmdbTier {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbTier {
    /// Open (or create) the tier under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbTierError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbTierError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbTierError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self { env, db })
    }

    /// Number of stored entries, including expired ones not yet overwritten.
    pub fn entry_count(&self) -> Result<u64, LmdbTierError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }
}

#[async_trait]
impl CacheTier for LmdbTier {
    fn name(&self) -> &str {
        "lmdb"
    }

    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let bytes = self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)?;
        bytes
            .map(|b| decode_entry(b, TierKind::Durable, key))
            .transpose()
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let bytes = encode_entry(entry);
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_tier() -> (LmdbTier, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tier = LmdbTier::open(temp_dir.path(), 10).expect("Failed to create tier");
        (tier, temp_dir)
    }

    fn entry() -> CacheEntry {
        let written_at = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        CacheEntry::new(
            br#"{"symbol":"BTCUSDT"}"#.to_vec(),
            written_at,
            Duration::from_secs(300),
            TierKind::InProcess,
        )
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (tier, _temp_dir) = create_test_tier();
        let original = entry();

        tier.set("breakdown:BTCUSDT", &original)
            .await
            .expect("set should succeed");
        let cached = tier
            .get("breakdown:BTCUSDT")
            .await
            .expect("get should succeed")
            .expect("entry should exist");

        assert_eq!(cached.value, original.value);
        assert_eq!(cached.written_at, original.written_at);
        assert_eq!(cached.ttl, original.ttl);
        assert_eq!(cached.tier, TierKind::Durable);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (tier, _temp_dir) = create_test_tier();
        assert!(tier.get("missing").await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (tier, _temp_dir) = create_test_tier();
        tier.set("k", &entry()).await.expect("set should succeed");
        assert_eq!(tier.entry_count().expect("count"), 1);

        assert!(tier.delete("k").await.expect("delete should succeed"));
        assert!(!tier.delete("k").await.expect("delete should succeed"));
        assert_eq!(tier.entry_count().expect("count"), 0);
    }
}

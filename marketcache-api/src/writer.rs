//! Ingestion of per-symbol records.
//!
//! The analysis side hands finished records to [`RecordWriter`], which stores
//! the full breakdown and the latest-score record, refuses writes older than
//! what is already stored, and keeps the known-symbols index current.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use marketcache_core::{
    breakdown_key, normalize_symbol, score_key, LatestScore, MarketResult, RecordError,
    SymbolIndex, SymbolRecord, SYMBOL_INDEX_KEY,
};
use marketcache_storage::{CacheRead, TierStore};

/// Result of an accepted write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub symbol: String,
    /// True when the symbol was added to the index by this write.
    pub indexed: bool,
}

/// Writes symbol records and maintains the symbol index.
pub struct RecordWriter {
    store: Arc<TierStore>,
    record_ttl: Duration,
    /// Serializes writes per symbol so the stale-write check holds.
    symbol_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Serializes read-modify-write of the index key.
    index_lock: Mutex<()>,
}

impl RecordWriter {
    pub fn new(store: Arc<TierStore>, record_ttl: Duration) -> Self {
        Self {
            store,
            record_ttl,
            symbol_locks: DashMap::new(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn record_ttl(&self) -> Duration {
        self.record_ttl
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.symbol_locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Validate and store `record`.
    ///
    /// Fails with [`RecordError::Malformed`] for invalid fields and
    /// [`RecordError::StaleWrite`] when the stored record is newer.
    pub async fn write_record(&self, mut record: SymbolRecord) -> MarketResult<WriteOutcome> {
        record.symbol = normalize_symbol(&record.symbol);
        record.validate()?;

        let lock = self.symbol_lock(&record.symbol);
        let _held = lock.lock().await;

        let key = breakdown_key(&record.symbol);
        let previous = match self.store.get_json::<SymbolRecord>(&key).await {
            Ok(Some(stored)) if record.timestamp < stored.value().timestamp => {
                return Err(RecordError::StaleWrite {
                    symbol: record.symbol.clone(),
                    incoming: record.timestamp,
                    stored: stored.value().timestamp,
                }
                .into());
            }
            Ok(stored) => stored,
            Err(e) => {
                warn!(symbol = %record.symbol, error = %e, "Overwriting undecodable stored record");
                None
            }
        };

        self.store.set_json(&key, &record, self.record_ttl).await?;
        if let Err(e) = self
            .store
            .set_json(
                &score_key(&record.symbol),
                &LatestScore::from(&record),
                self.record_ttl,
            )
            .await
        {
            self.roll_back_breakdown(&record.symbol, previous).await;
            return Err(e.into());
        }

        let indexed = self.update_index(|index, now| index.insert(&record.symbol, now)).await?;

        debug!(
            symbol = %record.symbol,
            score = record.score,
            change_pct = record.change_pct,
            indexed,
            "Record written"
        );

        Ok(WriteOutcome {
            symbol: record.symbol,
            indexed,
        })
    }

    /// Undo a breakdown write whose score write failed.
    ///
    /// The previous breakdown goes back with its remaining lifetime. If that
    /// is not possible the score record is dropped instead, since a missing
    /// score never conflicts with a breakdown.
    async fn roll_back_breakdown(&self, symbol: &str, previous: Option<CacheRead<SymbolRecord>>) {
        let key = breakdown_key(symbol);
        let now = self.store.now();
        let restored = match previous {
            Some(stored) => match stored
                .ttl()
                .checked_sub(stored.age(now))
                .filter(|remaining| !remaining.is_zero())
            {
                Some(remaining) => self.store.set_json(&key, stored.value(), remaining).await,
                None => self.store.delete(&key).await.map(|_| ()),
            },
            None => self.store.delete(&key).await.map(|_| ()),
        };

        match restored {
            Ok(()) => debug!(symbol = %symbol, "Rolled back breakdown after failed score write"),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Breakdown rollback failed, dropping score record");
                if let Err(e) = self.store.delete(&score_key(symbol)).await {
                    warn!(symbol = %symbol, error = %e, "Score record left beside newer breakdown");
                }
            }
        }
    }

    /// Drop a symbol's records and remove it from the index.
    ///
    /// Returns whether the symbol was indexed.
    pub async fn remove_symbol(&self, symbol: &str) -> MarketResult<bool> {
        let symbol = normalize_symbol(symbol);
        let lock = self.symbol_lock(&symbol);
        let _held = lock.lock().await;

        self.store.delete(&breakdown_key(&symbol)).await?;
        self.store.delete(&score_key(&symbol)).await?;
        let removed = self.update_index(|index, now| index.remove(&symbol, now)).await?;
        drop(_held);
        self.symbol_locks.remove(&symbol);
        Ok(removed)
    }

    /// Read the current index.
    ///
    /// A missing or undecodable index reads as empty.
    pub async fn index(&self) -> SymbolIndex {
        match self.store.get_json::<SymbolIndex>(SYMBOL_INDEX_KEY).await {
            Ok(Some(read)) => read.into_value(),
            Ok(None) => SymbolIndex::default(),
            Err(e) => {
                warn!(error = %e, "Symbol index undecodable, treating as empty");
                SymbolIndex::default()
            }
        }
    }

    async fn update_index<F>(&self, f: F) -> MarketResult<bool>
    where
        F: FnOnce(&mut SymbolIndex, chrono::DateTime<chrono::Utc>) -> bool,
    {
        let _held = self.index_lock.lock().await;
        let mut index = self.index().await;
        let changed = f(&mut index, self.store.now());
        // Rewritten on every call so the index outlives the records it lists.
        self.store
            .set_json(SYMBOL_INDEX_KEY, &index, self.record_ttl)
            .await?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use marketcache_core::{CacheError, ManualClock, MarketError, TierKind};
    use marketcache_storage::{CacheTier, MemoryTier, TierStoreConfig};
    use marketcache_test_utils::fixtures::{build_store, manual_clock, record};
    use marketcache_test_utils::ScriptedTier;

    fn writer() -> RecordWriter {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = TierStore::builder()
            .clock(clock.clone())
            .tier(Arc::new(MemoryTier::new().with_clock(clock)))
            .build()
            .unwrap();
        RecordWriter::new(Arc::new(store), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_write_indexes_symbol_and_score() {
        let writer = writer();
        let now = Utc::now();
        let outcome = writer
            .write_record(SymbolRecord::new("btcusdt", 70.0, 2.5, now))
            .await
            .unwrap();

        assert_eq!(outcome.symbol, "BTCUSDT");
        assert!(outcome.indexed);
        assert!(writer.index().await.symbols.contains("BTCUSDT"));

        let score = writer
            .store
            .get_json::<LatestScore>("score:BTCUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(score.value().score, 70.0);
    }

    #[tokio::test]
    async fn test_rewrite_is_not_reindexed() {
        let writer = writer();
        let now = Utc::now();
        writer
            .write_record(SymbolRecord::new("ETHUSDT", 40.0, -1.2, now))
            .await
            .unwrap();
        let second = writer
            .write_record(SymbolRecord::new("ETHUSDT", 42.0, -1.0, now + ChronoDuration::seconds(1)))
            .await
            .unwrap();
        assert!(!second.indexed);
        assert_eq!(writer.index().await.len(), 1);
    }

    #[tokio::test]
    async fn test_older_write_is_rejected() {
        let writer = writer();
        let now = Utc::now();
        writer
            .write_record(SymbolRecord::new("ETHUSDT", 40.0, -1.2, now))
            .await
            .unwrap();

        let err = writer
            .write_record(SymbolRecord::new("ETHUSDT", 45.0, 0.5, now - ChronoDuration::seconds(5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::Record(RecordError::StaleWrite { .. })
        ));

        let stored = writer
            .store
            .get_json::<SymbolRecord>("breakdown:ETHUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.value().score, 40.0);
    }

    #[tokio::test]
    async fn test_equal_timestamp_overwrites() {
        let writer = writer();
        let now = Utc::now();
        writer
            .write_record(SymbolRecord::new("SOLUSDT", 50.0, 1.0, now))
            .await
            .unwrap();
        assert!(writer
            .write_record(SymbolRecord::new("SOLUSDT", 55.0, 1.5, now))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_malformed_record_is_rejected() {
        let writer = writer();
        let err = writer
            .write_record(SymbolRecord::new("BADUSDT", f64::NAN, 1.0, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Record(RecordError::Malformed { .. })));
        assert!(writer.index().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_symbol() {
        let writer = writer();
        writer
            .write_record(SymbolRecord::new("XRPUSDT", 20.0, -0.4, Utc::now()))
            .await
            .unwrap();

        assert!(writer.remove_symbol("xrpusdt").await.unwrap());
        assert!(writer.index().await.is_empty());
        assert!(writer.store.get("breakdown:XRPUSDT").await.is_none());
        assert!(!writer.remove_symbol("XRPUSDT").await.unwrap());
    }

    fn writer_over(tier: Arc<ScriptedTier>, clock: &ManualClock) -> RecordWriter {
        let store = build_store(
            vec![tier as Arc<dyn CacheTier>],
            Arc::new(clock.clone()),
            TierStoreConfig::default(),
        );
        RecordWriter::new(store, Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_failed_score_write_restores_previous_breakdown() {
        let clock = manual_clock();
        let tier = ScriptedTier::new("l1", TierKind::InProcess);
        let writer = writer_over(tier.clone(), &clock);

        writer.write_record(record("ETHUSDT", 40.0, -1.2, 0)).await.unwrap();
        clock.advance(Duration::from_secs(100));

        tier.reject_writes_to(Some("score:"));
        let err = writer
            .write_record(record("ETHUSDT", 60.0, 3.0, 100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::Cache(CacheError::AllTiersUnavailable { .. })
        ));

        let breakdown = writer
            .store
            .get_json::<SymbolRecord>("breakdown:ETHUSDT")
            .await
            .unwrap()
            .unwrap();
        let score = writer
            .store
            .get_json::<LatestScore>("score:ETHUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(breakdown.value().score, 40.0);
        assert_eq!(score.value().score, breakdown.value().score);
        assert_eq!(breakdown.ttl(), Duration::from_secs(500));

        tier.reject_writes_to(None);
        writer.write_record(record("ETHUSDT", 60.0, 3.0, 100)).await.unwrap();
        let score = writer
            .store
            .get_json::<LatestScore>("score:ETHUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(score.value().score, 60.0);
    }

    #[tokio::test]
    async fn test_failed_first_write_leaves_no_breakdown() {
        let clock = manual_clock();
        let tier = ScriptedTier::new("l1", TierKind::InProcess);
        let writer = writer_over(tier.clone(), &clock);

        tier.reject_writes_to(Some("score:"));
        assert!(writer
            .write_record(record("SOLUSDT", 50.0, 1.0, 0))
            .await
            .is_err());

        assert!(writer.store.get("breakdown:SOLUSDT").await.is_none());
        assert!(writer.index().await.is_empty());
    }
}

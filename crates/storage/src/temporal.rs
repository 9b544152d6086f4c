// Path: crates/storage/src/temporal.rs
//! Block and transaction bookkeeping over a window of recent blocks.
//!
//! The store tracks transactions we sent (so their unconfirmed outputs can be spent and
//! reorgs can be reconciled) and remembers which transactions were already reported
//! upstream so no observation is posted twice.

use crate::block_meta::BlockMeta;
use crate::error::StorageError;
use crate::kv::KvStore;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Key of the fee paid by the most recent signed outbound.
pub const TRANSACTION_FEE_KEY: &str = "transactionfee-";
/// Prefix of block metas; the height is appended.
pub const PREFIX_BLOCK_META: &str = "blockmeta-";
/// Prefix of mempool markers; the txid is appended.
pub const PREFIX_MEMPOOL: &str = "mempool-";
/// Prefix of observation markers; the txid is appended.
pub const PREFIX_OBSERVED_TX: &str = "observed-";
/// Key of the block-scan restart position.
pub const SCAN_POS_KEY: &str = "blockscanpos";

/// Fee of the most recent outbound, used when an assignment carries no fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRecord {
    /// Fee paid, in sats.
    pub fee: f64,
    /// Estimated virtual size of the transaction.
    pub v_size: i32,
}

/// Persistent block metas, mempool and observation markers, fee record.
pub struct TemporalStore {
    kv: KvStore,
    mempool_cache: Option<Mutex<LruCache<String, ()>>>,
}

impl std::fmt::Debug for TemporalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalStore")
            .field("mempool_cache", &self.mempool_cache.is_some())
            .finish()
    }
}

fn block_meta_key(height: i64) -> String {
    format!("{PREFIX_BLOCK_META}{height}")
}
fn mempool_key(txid: &str) -> String {
    format!("{PREFIX_MEMPOOL}{txid}")
}
fn observed_key(txid: &str) -> String {
    format!("{PREFIX_OBSERVED_TX}{txid}")
}

impl TemporalStore {
    /// Wraps `kv`. A `txid_cache_size` of zero disables the mempool LRU.
    pub fn new(kv: KvStore, txid_cache_size: usize) -> Self {
        Self {
            kv,
            mempool_cache: NonZeroUsize::new(txid_cache_size)
                .map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// The block meta at `height`, if any.
    pub fn get_block_meta(&self, height: i64) -> Result<Option<BlockMeta>, StorageError> {
        match self.kv.get(&block_meta_key(height))? {
            None => Ok(None),
            Some(buf) => serde_json::from_slice(&buf)
                .map(Some)
                .map_err(|e| StorageError::Decode(format!("block meta {height}: {e}"))),
        }
    }

    /// Stores `meta` at `height`.
    pub fn save_block_meta(&self, height: i64, meta: &BlockMeta) -> Result<(), StorageError> {
        let buf = serde_json::to_vec(meta).map_err(|e| StorageError::Encode(e.to_string()))?;
        self.kv.put(&block_meta_key(height), &buf)
    }

    /// Every stored block meta, in unspecified order.
    pub fn get_block_metas(&self) -> Result<Vec<BlockMeta>, StorageError> {
        let mut metas = Vec::new();
        for (key, buf) in self.kv.scan_prefix(PREFIX_BLOCK_META)? {
            if buf.is_empty() {
                continue;
            }
            let meta: BlockMeta = serde_json::from_slice(&buf)
                .map_err(|e| StorageError::Decode(format!("{key}: {e}")))?;
            metas.push(meta);
        }
        Ok(metas)
    }

    /// Removes every block meta below `height` for which `filter` returns true.
    pub fn prune_block_meta<F>(&self, height: i64, filter: F) -> Result<usize, StorageError>
    where
        F: Fn(&BlockMeta) -> bool,
    {
        let targets: Vec<String> = self
            .get_block_metas()?
            .into_iter()
            .filter(|bm| bm.height < height && filter(bm))
            .map(|bm| block_meta_key(bm.height))
            .collect();
        self.kv.delete_many(&targets)?;
        if !targets.is_empty() {
            tracing::debug!(target: "storage", pruned = targets.len(), below = height, "pruned block metas");
        }
        Ok(targets.len())
    }

    /// Overwrites the fee record.
    pub fn upsert_fee(&self, fee: f64, v_size: i32) -> Result<(), StorageError> {
        let buf = serde_json::to_vec(&FeeRecord { fee, v_size })
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        self.kv.put(TRANSACTION_FEE_KEY, &buf)
    }

    /// The fee record, if one was ever written.
    pub fn get_fee(&self) -> Result<Option<FeeRecord>, StorageError> {
        match self.kv.get(TRANSACTION_FEE_KEY)? {
            None => Ok(None),
            Some(buf) => serde_json::from_slice(&buf)
                .map(Some)
                .map_err(|e| StorageError::Decode(format!("transaction fee: {e}"))),
        }
    }

    /// Marks a mempool txid as processed. Returns `true` when newly added and `false`
    /// when it was already tracked.
    pub fn track_mempool(&self, txid: &str) -> Result<bool, StorageError> {
        let key = mempool_key(txid);
        if let Some(cache) = &self.mempool_cache {
            if cache.lock().get(&key).is_some() {
                return Ok(false);
            }
        }
        if self.kv.has(&key)? {
            if let Some(cache) = &self.mempool_cache {
                cache.lock().put(key, ());
            }
            return Ok(false);
        }
        self.kv.put(&key, txid.as_bytes())?;
        if let Some(cache) = &self.mempool_cache {
            cache.lock().put(key, ());
        }
        Ok(true)
    }

    /// Forgets a mempool txid, on disk and in the LRU.
    pub fn untrack_mempool(&self, txid: &str) -> Result<(), StorageError> {
        let key = mempool_key(txid);
        self.kv.delete(&key)?;
        if let Some(cache) = &self.mempool_cache {
            cache.lock().pop(&key);
        }
        Ok(())
    }

    /// Marks a txid as reported upstream. Returns `false` when it already was.
    pub fn track_observed(&self, txid: &str) -> Result<bool, StorageError> {
        let key = observed_key(txid);
        if self.kv.has(&key)? {
            return Ok(false);
        }
        self.kv.put(&key, txid.as_bytes())?;
        Ok(true)
    }

    /// Forgets an observation marker.
    pub fn untrack_observed(&self, txid: &str) -> Result<(), StorageError> {
        self.kv.delete(&observed_key(txid))
    }

    /// The height the block scanner should resume after.
    pub fn get_scan_pos(&self) -> Result<Option<i64>, StorageError> {
        match self.kv.get(SCAN_POS_KEY)? {
            None => Ok(None),
            Some(buf) => {
                let raw: [u8; 8] = buf
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Decode("scan position".into()))?;
                Ok(Some(i64::from_be_bytes(raw)))
            }
        }
    }

    /// Persists the block-scan position.
    pub fn set_scan_pos(&self, height: i64) -> Result<(), StorageError> {
        self.kv
            .put(SCAN_POS_KEY, &height.to_be_bytes())
            .inspect_err(|e| {
                tracing::warn!(target: "storage", height, error = %e, "failed to persist scan position")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(cache: usize) -> (tempfile::TempDir, TemporalStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path().join("temporal.redb")).unwrap();
        (dir, TemporalStore::new(kv, cache))
    }

    #[test]
    fn block_meta_round_trip_and_prune() {
        let (_dir, store) = store(0);
        assert!(store.get_block_meta(1).unwrap().is_none());
        for h in 1..=5 {
            let mut bm = BlockMeta::new(format!("p{h}"), h, format!("h{h}"));
            if h == 2 {
                bm.add_self_transaction("pending");
            }
            store.save_block_meta(h, &bm).unwrap();
        }
        assert_eq!(store.get_block_metas().unwrap().len(), 5);
        assert_eq!(store.get_block_meta(3).unwrap().unwrap().block_hash, "h3");

        // Height 2 still has a pending self tx and survives.
        let pruned = store
            .prune_block_meta(4, |bm| bm.self_transactions.is_empty())
            .unwrap();
        assert_eq!(pruned, 2);
        let mut left: Vec<i64> = store
            .get_block_metas()
            .unwrap()
            .iter()
            .map(|b| b.height)
            .collect();
        left.sort();
        assert_eq!(left, vec![2, 4, 5]);
    }

    #[test]
    fn mempool_tracking_with_and_without_cache() {
        for cache in [0, 16] {
            let (_dir, store) = store(cache);
            assert!(store.track_mempool("tx1").unwrap());
            assert!(!store.track_mempool("tx1").unwrap());
            store.untrack_mempool("tx1").unwrap();
            assert!(store.track_mempool("tx1").unwrap());
        }
    }

    #[test]
    fn mempool_marker_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temporal.redb");
        {
            let store = TemporalStore::new(KvStore::open(&path).unwrap(), 8);
            assert!(store.track_mempool("abc").unwrap());
        }
        let store = TemporalStore::new(KvStore::open(&path).unwrap(), 8);
        assert!(!store.track_mempool("abc").unwrap());
        // second lookup is served by the LRU
        assert!(!store.track_mempool("abc").unwrap());
    }

    #[test]
    fn observed_tracking() {
        let (_dir, store) = store(0);
        assert!(store.track_observed("o1").unwrap());
        assert!(!store.track_observed("o1").unwrap());
        store.untrack_observed("o1").unwrap();
        assert!(store.track_observed("o1").unwrap());
    }

    #[test]
    fn fee_record_and_scan_pos() {
        let (_dir, store) = store(0);
        assert!(store.get_fee().unwrap().is_none());
        store.upsert_fee(2550.0, 255).unwrap();
        store.upsert_fee(3000.0, 300).unwrap();
        assert_eq!(
            store.get_fee().unwrap(),
            Some(FeeRecord {
                fee: 3000.0,
                v_size: 300
            })
        );

        assert_eq!(store.get_scan_pos().unwrap(), None);
        store.set_scan_pos(812_345).unwrap();
        assert_eq!(store.get_scan_pos().unwrap(), Some(812_345));
    }
}

// Path: crates/storage/src/signer_cache.rs
use crate::error::StorageError;
use crate::kv::KvStore;

const PREFIX_SIGNED: &str = "signed-v6-";

/// Remembers which outbound assignments were already signed and broadcast, keyed by
/// the assignment cache hash. Entries never expire.
#[derive(Debug, Clone)]
pub struct SignerCache {
    kv: KvStore,
}

impl SignerCache {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Whether the assignment with `cache_hash` was already signed.
    pub fn has_signed(&self, cache_hash: &str) -> Result<bool, StorageError> {
        self.kv.has(&format!("{PREFIX_SIGNED}{cache_hash}"))
    }

    /// Records that `txid` answers the assignment with `cache_hash`. A later call
    /// for the same hash overwrites the txid.
    pub fn set_signed(&self, cache_hash: &str, txid: &str) -> Result<(), StorageError> {
        self.kv
            .put(&format!("{PREFIX_SIGNED}{cache_hash}"), txid.as_bytes())?;
        tracing::debug!(target: "storage", cache_hash, txid, "marked outbound as signed");
        Ok(())
    }
}

// Path: crates/storage/src/block_meta.rs
use serde::{Deserialize, Serialize};

/// Bookkeeping for one external block: its hashes and the transactions the client
/// cares about. Txid comparisons are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Block height.
    pub height: i64,
    /// Hash of the parent block.
    pub previous_hash: String,
    /// Hash of this block.
    pub block_hash: String,
    /// Transactions broadcast by our vaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub self_transactions: Vec<String>,
    /// Transactions received by our vaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customer_transactions: Vec<String>,
}

fn position(list: &[String], txid: &str) -> Option<usize> {
    list.iter().position(|t| t.eq_ignore_ascii_case(txid))
}

impl BlockMeta {
    pub fn new(previous_hash: impl Into<String>, height: i64, block_hash: impl Into<String>) -> Self {
        Self {
            height,
            previous_hash: previous_hash.into(),
            block_hash: block_hash.into(),
            self_transactions: Vec::new(),
            customer_transactions: Vec::new(),
        }
    }

    /// Records a transaction we broadcast. A self transaction wins over a customer
    /// entry for the same txid.
    pub fn add_self_transaction(&mut self, txid: &str) {
        if let Some(idx) = position(&self.customer_transactions, txid) {
            self.customer_transactions.remove(idx);
        }
        if position(&self.self_transactions, txid).is_none() {
            self.self_transactions.push(txid.to_string());
        }
    }

    /// Records a transaction a vault received. No-op when it is already a self
    /// transaction.
    pub fn add_customer_transaction(&mut self, txid: &str) {
        if position(&self.self_transactions, txid).is_some() {
            tracing::info!(target: "storage", txid, "customer txn with matching self txn seen");
            return;
        }
        if position(&self.customer_transactions, txid).is_none() {
            self.customer_transactions.push(txid.to_string());
        }
    }

    /// Forgets a customer transaction.
    pub fn remove_customer_transaction(&mut self, txid: &str) {
        if let Some(idx) = position(&self.customer_transactions, txid) {
            self.customer_transactions.remove(idx);
        }
    }

    /// Whether `txid` is recorded in either set.
    pub fn transaction_hash_exists(&self, txid: &str) -> bool {
        position(&self.customer_transactions, txid).is_some()
            || position(&self.self_transactions, txid).is_some()
    }

    /// Whether `txid` is one of our own broadcasts.
    pub fn is_self_transaction(&self, txid: &str) -> bool {
        position(&self.self_transactions, txid).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_transaction_wins() {
        let mut bm = BlockMeta::new("prev", 10, "hash");
        bm.add_customer_transaction("ABC");
        bm.add_self_transaction("abc");
        assert!(bm.customer_transactions.is_empty());
        assert_eq!(bm.self_transactions, vec!["abc".to_string()]);

        bm.add_customer_transaction("ABC");
        assert!(bm.customer_transactions.is_empty());
        assert!(bm.transaction_hash_exists("Abc"));
        assert!(bm.is_self_transaction("ABC"));
    }

    #[test]
    fn customer_set_has_no_duplicates() {
        let mut bm = BlockMeta::new("prev", 10, "hash");
        bm.add_customer_transaction("x1");
        bm.add_customer_transaction("X1");
        assert_eq!(bm.customer_transactions.len(), 1);
        bm.remove_customer_transaction("X1");
        assert!(!bm.transaction_hash_exists("x1"));
    }

    #[test]
    fn json_omits_empty_sets() {
        let bm = BlockMeta::new("p", 1, "h");
        let json = serde_json::to_string(&bm).unwrap();
        assert_eq!(json, r#"{"height":1,"previous_hash":"p","block_hash":"h"}"#);
        let back: BlockMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bm);
    }
}

// Path: crates/types/src/tx.rs
//! Observation and assignment records exchanged with the settlement chain.

use crate::chain::Chain;
use crate::coin::{format_coins, Coin};
use crate::pubkey::PubKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn cache_digest(preimage: &str) -> String {
    hex::encode_upper(Sha256::digest(preimage.as_bytes()))
}

/// A single observed transaction on an external chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInItem {
    /// Height of the block that contains the transaction, or the height it was seen
    /// at for mempool observations.
    pub block_height: i64,
    /// Transaction id.
    pub tx: String,
    /// Address of the first input.
    pub sender: String,
    /// The address the value was sent to.
    pub to: String,
    /// Value moved, one coin of the chain's gas asset.
    pub coins: Vec<Coin>,
    /// Memo decoded from OP_RETURN outputs.
    pub memo: String,
    /// Fee paid by the transaction.
    pub gas: Vec<Coin>,
    /// Vault the observation belongs to, when known.
    #[serde(default)]
    pub observed_vault_pub_key: PubKey,
}

impl TxInItem {
    /// Whether the item carries no transaction.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Idempotency key used to mark the outbound that answered `inbound_id` as signed.
    pub fn cache_hash(&self, chain: Chain, inbound_id: &str) -> String {
        cache_digest(&format!(
            "{}|{}|{}|{}|{}",
            chain,
            self.to,
            format_coins(&self.coins),
            self.memo,
            inbound_id
        ))
    }
}

/// A batch of observations from one block (or one mempool pass).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Source chain.
    pub chain: Option<Chain>,
    /// The observations.
    pub tx_array: Vec<TxInItem>,
    /// Whether the batch was already filtered by the observer.
    pub filtered: bool,
    /// Whether the batch came from the mempool.
    pub mem_pool: bool,
    /// Confirmations required before the batch is final.
    pub confirmation_required: i64,
}

impl TxIn {
    /// Creates a batch for `chain`.
    pub fn new(chain: Chain, tx_array: Vec<TxInItem>, mem_pool: bool) -> Self {
        Self {
            chain: Some(chain),
            tx_array,
            filtered: false,
            mem_pool,
            confirmation_required: 0,
        }
    }

    /// Number of observations in the batch.
    pub fn count(&self) -> usize {
        self.tx_array.len()
    }
}

/// A signing assignment received from the settlement chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutItem {
    /// Chain the outbound must be sent on.
    pub chain: Chain,
    /// Destination address.
    pub to_address: String,
    /// Vault that funds the outbound.
    pub vault_pub_key: PubKey,
    /// Amount to send, one coin of the gas asset.
    pub coins: Vec<Coin>,
    /// Memo to attach as OP_RETURN.
    pub memo: String,
    /// Upper bound on the fee the vault may pay.
    #[serde(default)]
    pub max_gas: Vec<Coin>,
    /// Suggested fee rate in sats per vbyte; zero means unknown.
    #[serde(default)]
    pub gas_rate: i64,
    /// The inbound that triggered the outbound.
    #[serde(default)]
    pub in_hash: String,
    /// The outbound txid once known.
    #[serde(default)]
    pub out_hash: String,
    /// Opaque signing checkpoint persisted by the caller for a retry.
    #[serde(skip)]
    pub checkpoint: Option<Vec<u8>>,
}

impl TxOutItem {
    /// Idempotency key of the assignment: uppercase hex SHA-256 of
    /// `chain|to|coins|memo|in_hash`.
    pub fn cache_hash(&self) -> String {
        cache_digest(&format!(
            "{}|{}|{}|{}|{}",
            self.chain,
            self.to_address,
            format_coins(&self.coins),
            self.memo,
            self.in_hash
        ))
    }
}

/// A retraction of an observation that a reorg erased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataTx {
    /// The erased transaction.
    pub tx_id: String,
    /// Its chain.
    pub chain: Chain,
}

/// All retractions for one height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataBlock {
    /// The height the erased transactions were recorded at.
    pub height: i64,
    /// The retractions.
    pub txs: Vec<ErrataTx>,
}

/// A solvency attestation for one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solvency {
    /// External chain height of the report.
    pub height: i64,
    /// Chain reported on.
    pub chain: Chain,
    /// The vault.
    pub pub_key: PubKey,
    /// The on-chain balance of the vault.
    pub coins: Vec<Coin>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_out() -> TxOutItem {
        TxOutItem {
            chain: Chain::BTC,
            to_address: "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into(),
            vault_pub_key: PubKey::new("02aa"),
            coins: vec![Coin::gas(Chain::BTC, 10)],
            memo: "OUT:ABC".into(),
            max_gas: vec![],
            gas_rate: 0,
            in_hash: "ABC".into(),
            out_hash: String::new(),
            checkpoint: None,
        }
    }

    #[test]
    fn out_cache_hash_is_uppercase_sha256_of_fields() {
        let item = sample_out();
        let expected = hex::encode_upper(Sha256::digest(
            "BTC|bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4|10 BTC.BTC|OUT:ABC|ABC".as_bytes(),
        ));
        assert_eq!(item.cache_hash(), expected);
        assert_eq!(item.cache_hash().len(), 64);
    }

    #[test]
    fn out_cache_hash_ignores_checkpoint_and_gas() {
        let a = sample_out();
        let mut b = sample_out();
        b.checkpoint = Some(vec![1, 2, 3]);
        b.gas_rate = 40;
        assert_eq!(a.cache_hash(), b.cache_hash());
        b.in_hash = "DEF".into();
        assert_ne!(a.cache_hash(), b.cache_hash());
    }

    #[test]
    fn in_item_cache_hash_matches_outbound_hash() {
        let out = sample_out();
        let observed = TxInItem {
            tx: "F00D".into(),
            to: out.to_address.clone(),
            coins: out.coins.clone(),
            memo: out.memo.clone(),
            ..Default::default()
        };
        assert_eq!(observed.cache_hash(Chain::BTC, "ABC"), out.cache_hash());
    }
}

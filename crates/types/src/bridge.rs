// Path: crates/types/src/bridge.rs
//! The contract the chain client consumes from the settlement-chain bridge client.

use crate::chain::Chain;
use crate::coin::Coin;
use crate::pubkey::PubKey;
use crate::vault::{Blame, NodeStatus, Vault};
use async_trait::async_trait;

pub use crate::error::BridgeError;

/// Mimir key holding the maximum number of UTXOs an outbound may spend.
pub const MIMIR_MAX_UTXOS_TO_SPEND: &str = "MaxUTXOsToSpend";
/// Mimir key halting every chain.
pub const MIMIR_HALT_CHAIN_GLOBAL: &str = "HaltChainGlobal";
/// Mimir key pausing every chain's node-level processing.
pub const MIMIR_NODE_PAUSE_CHAIN_GLOBAL: &str = "NodePauseChainGlobal";

/// A client of the settlement chain. Implementations are expected to be cheap to
/// share behind an `Arc`.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// All active asgard vaults.
    async fn get_asgards(&self) -> Result<Vec<Vault>, BridgeError>;

    /// Public keys of all active asgard vaults.
    async fn get_asgard_pubkeys(&self) -> Result<Vec<PubKey>, BridgeError>;

    /// Current settlement-chain height.
    async fn get_block_height(&self) -> Result<i64, BridgeError>;

    /// Status of the local node.
    async fn fetch_node_status(&self) -> Result<NodeStatus, BridgeError>;

    /// A mimir value; unset keys read as a negative number.
    async fn get_mimir(&self, key: &str) -> Result<i64, BridgeError>;

    /// Reports the network fee of `chain` observed at `height`. Returns the settlement txid.
    async fn post_network_fee(
        &self,
        height: i64,
        chain: Chain,
        tx_size: u64,
        tx_rate: u64,
    ) -> Result<String, BridgeError>;

    /// Reports a failed keysign ceremony. Returns the settlement txid.
    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: i64,
        memo: &str,
        coins: &[Coin],
        pubkey: &PubKey,
    ) -> Result<String, BridgeError>;

    /// The committee selected to sign for `vault_pubkey`.
    async fn get_keysign_party(&self, vault_pubkey: &PubKey) -> Result<Vec<PubKey>, BridgeError>;

    /// The last external height at which the settlement chain accepted an inbound from
    /// `chain`.
    async fn get_last_observed_in_height(&self, chain: Chain) -> Result<i64, BridgeError>;

    /// Version string of the settlement chain software.
    async fn get_version(&self) -> Result<String, BridgeError>;
}

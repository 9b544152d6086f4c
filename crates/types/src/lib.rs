// Path: crates/types/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Ferry Types
//!
//! Shared domain types for the UTXO chain client: the chain table, assets and coins,
//! vault keys and addresses, observation and assignment records, the memo grammar,
//! the settlement-chain bridge contract and configuration.

/// Address decoding, encoding and script derivation.
pub mod address;
/// The settlement-chain bridge client contract.
pub mod bridge;
/// Supported UTXO chains and their constants.
pub mod chain;
/// Assets and coin amounts.
pub mod coin;
/// Configuration structures loaded from TOML.
pub mod config;
/// Error types and stable error codes.
pub mod error;
/// The memo grammar carried in OP_RETURN outputs.
pub mod memo;
/// Vault public keys.
pub mod pubkey;
/// Observation and assignment records exchanged with the bridge.
pub mod tx;
/// Vaults, node status and keysign blame.
pub mod vault;

pub use address::{ChainAddress, ScriptClass};
pub use bridge::{Bridge, BridgeError};
pub use chain::{Chain, ChainNetwork, ChainParams};
pub use coin::{format_coins, Asset, Coin};
pub use error::ErrorCode;
pub use memo::{Memo, TxType};
pub use pubkey::PubKey;
pub use tx::{ErrataBlock, ErrataTx, Solvency, TxIn, TxInItem, TxOutItem};
pub use vault::{Blame, BlameNode, NodeStatus, Vault};

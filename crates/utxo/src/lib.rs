// Path: crates/utxo/src/lib.rs
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

//! # Ferry UTXO
//!
//! One client implementation for every supported UTXO chain, parameterised by a
//! [`UtxoChain`] type that carries the chain's size estimate, sighash and signature
//! encoding. A client scans blocks and the mempool for inbound transfers to the
//! vaults, retracts observations a reorg erased, builds and signs outbounds through
//! the keysign path, merges fragmented vault UTXOs and reports network fees and
//! vault solvency to the settlement chain.

/// Outbound construction, signing and broadcast.
pub mod builder;
/// Per-chain parameters and signature encodings.
pub mod chain;
/// The object-safe client interface and its loader.
pub mod chain_client;
/// Replay checkpoints for outbound signing.
pub mod checkpoint;
/// Client state and shared lookups.
pub mod client;
/// Run loops and lifecycle.
pub mod driver;
/// Client errors.
pub mod error;
/// Per-vault signing locks.
pub mod locks;
/// Chain daemon JSON-RPC.
pub mod rpc;
/// Block and mempool scanning.
pub mod scanner;
/// Fee, solvency and consolidation upkeep.
pub mod supervisor;

pub use builder::SignedOutbound;
pub use chain::{Bitcoin, BitcoinCash, Dogecoin, Litecoin, UtxoChain};
pub use chain_client::{load_chain_client, ChainClient, UtxoChainClient};
pub use checkpoint::SignCheckpoint;
pub use client::{ClientDeps, Queues, UtxoClient};
pub use error::{ClientError, SignTxError};
pub use rpc::{ChainRpc, RpcClient};
pub use supervisor::is_vault_solvent;

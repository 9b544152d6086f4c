// Path: crates/utxo/src/rpc/mod.rs
//! The chain daemon's JSON-RPC interface.

/// Typed wrappers over the daemon methods.
pub mod api;
/// Transport: the `ChainRpc` trait and its HTTP implementation.
pub mod client;
/// Response shapes.
pub mod types;

pub use api::ChainApi;
pub use client::{ChainRpc, RpcClient};
pub use types::{to_sats, BlockVerbose, RawTx, Unspent};

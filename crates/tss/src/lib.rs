// Path: crates/tss/src/lib.rs
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

//! # Ferry TSS
//!
//! Drives threshold signing for outbound transactions. Individual sign requests are
//! queued per vault key and flushed to the remote TSS service in deterministic batches;
//! responses are matched back to their requesters by message. Vaults owned by the
//! local node are signed directly with the node key instead.

/// Keysign errors.
pub mod error;
/// The remote TSS service contract and its HTTP client.
pub mod server;
/// Signature normalisation helpers.
pub mod signature;
/// The batching signer.
pub mod signer;
/// Keysign wire types.
pub mod types;
/// Local-key or TSS dispatch per vault.
pub mod wrapper;

pub use error::TssError;
pub use server::{HttpTssServer, TssServer};
pub use signer::TssSigner;
pub use types::{KeysignRequest, KeysignResponse, KeysignSignature, KeysignStatus};
pub use wrapper::KeysignWrapper;

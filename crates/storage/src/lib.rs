// Path: crates/storage/src/lib.rs
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

//! # Ferry Storage
//!
//! The chain client's local index, persisted in a single redb file with prefix-encoded
//! string keys:
//!
//! | key | value |
//! |---|---|
//! | `blockmeta-<height>` | JSON [`BlockMeta`] |
//! | `mempool-<txid>` | marker |
//! | `observed-<txid>` | marker |
//! | `transactionfee-` | JSON `{fee, v_size}` |
//! | `blockscanpos` | last scanned height |
//! | `signed-v6-<hash>` | broadcast txid |

/// Per-block bookkeeping of self and customer transactions.
pub mod block_meta;
/// Storage errors.
pub mod error;
/// The raw key/value layer over redb.
pub mod kv;
/// Idempotency cache of signed outbounds.
pub mod signer_cache;
/// Block metas, mempool and observation markers, fee record.
pub mod temporal;

pub use block_meta::BlockMeta;
pub use error::StorageError;
pub use kv::KvStore;
pub use signer_cache::SignerCache;
pub use temporal::{FeeRecord, TemporalStore};

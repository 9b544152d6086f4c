// Path: crates/utxo/src/error.rs
use ferry_storage::StorageError;
use ferry_tss::TssError;
use ferry_types::error::{AddressError, BridgeError, ErrorCode, MemoError};
use ferry_types::Chain;
use thiserror::Error;

/// JSON-RPC code for an out-of-range parameter, returned by `getblockhash` past the tip.
pub const RPC_INVALID_PARAMETER: i64 = -8;
/// JSON-RPC code for a transaction that is already confirmed.
pub const RPC_TX_ALREADY_IN_CHAIN: i64 = -27;
/// JSON-RPC code for a generic wallet failure, returned when a wallet already exists.
pub const RPC_WALLET_ERROR: i64 = -4;

/// Errors raised by the UTXO chain client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The requested block does not exist yet.
    #[error("block {0} is not available yet")]
    UnavailableBlock(i64),
    /// The daemon rejected a call.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Daemon message.
        message: String,
    },
    /// The daemon could not be reached.
    #[error("RPC transport error: {0}")]
    Transport(String),
    /// A daemon response had an unexpected shape.
    #[error("RPC decode error: {0}")]
    Decode(String),
    /// A block came back without hashes.
    #[error("invalid block at height {0}")]
    InvalidBlock(i64),
    /// The local index failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A keysign failed.
    #[error(transparent)]
    Tss(#[from] TssError),
    /// A settlement-chain call failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// An address could not be decoded or derived.
    #[error(transparent)]
    Address(#[from] AddressError),
    /// A memo could not be parsed.
    #[error(transparent)]
    Memo(#[from] MemoError),
    /// No output of the transaction qualifies as the observed transfer.
    #[error("no output matches the observation criteria")]
    FailOutputMatchCriteria,
    /// The selected inputs cannot cover the outputs.
    #[error("not enough balance: inputs {available} sats, outputs and fee {required} sats")]
    NotEnoughBalance {
        /// Sum of selected inputs.
        available: u64,
        /// Customer output plus fee.
        required: u64,
    },
    /// A transaction is malformed or unusable.
    #[error("invalid transaction: {0}")]
    InvalidTx(String),
    /// An inbound to a vault pays to a script the vault cannot spend.
    #[error("output script of {0} is not single-signature")]
    InvalidUtxo(String),
    /// The concatenated OP_RETURN data exceeds the memo limit.
    #[error("memo is {len} bytes, limit is {max}")]
    MemoTooLong {
        /// Memo length in bytes.
        len: usize,
        /// Limit.
        max: usize,
    },
    /// An assignment targets another chain.
    #[error("assignment for {actual} sent to the {expected} client")]
    ChainMismatch {
        /// The client's chain.
        expected: Chain,
        /// The assignment's chain.
        actual: Chain,
    },
    /// A signing checkpoint could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl ClientError {
    /// Whether this is a daemon error with `code`.
    pub fn is_rpc_code(&self, code: i64) -> bool {
        matches!(self, Self::Rpc { code: c, .. } if *c == code)
    }

    /// The keysign failure carried by this error, if any.
    pub fn tss(&self) -> Option<&TssError> {
        match self {
            Self::Tss(e) => Some(e),
            _ => None,
        }
    }
}

impl ErrorCode for ClientError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnavailableBlock(_) => "UTXO_UNAVAILABLE_BLOCK",
            Self::Rpc { .. } => "UTXO_RPC_ERROR",
            Self::Transport(_) => "UTXO_RPC_TRANSPORT",
            Self::Decode(_) => "UTXO_RPC_DECODE",
            Self::InvalidBlock(_) => "UTXO_INVALID_BLOCK",
            Self::Storage(e) => e.code(),
            Self::Tss(e) => e.code(),
            Self::Bridge(e) => e.code(),
            Self::Address(e) => e.code(),
            Self::Memo(e) => e.code(),
            Self::FailOutputMatchCriteria => "UTXO_FAIL_OUTPUT_MATCH_CRITERIA",
            Self::NotEnoughBalance { .. } => "UTXO_NOT_ENOUGH_BALANCE",
            Self::InvalidTx(_) => "UTXO_INVALID_TX",
            Self::InvalidUtxo(_) => "UTXO_INVALID_UTXO",
            Self::MemoTooLong { .. } => "UTXO_MEMO_TOO_LONG",
            Self::ChainMismatch { .. } => "UTXO_CHAIN_MISMATCH",
            Self::Checkpoint(_) => "UTXO_CHECKPOINT",
            Self::Timeout(_) => "UTXO_TIMEOUT",
        }
    }
}

/// A failed `sign_tx`, with the checkpoint the caller must keep so a retry rebuilds the
/// identical unsigned transaction.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct SignTxError {
    /// Serialized checkpoint, present once the unsigned transaction was fixed.
    pub checkpoint: Option<Vec<u8>>,
    /// The underlying failure.
    #[source]
    pub source: ClientError,
}

impl SignTxError {
    /// A failure before any checkpoint existed.
    pub fn without_checkpoint(source: impl Into<ClientError>) -> Self {
        Self {
            checkpoint: None,
            source: source.into(),
        }
    }

    /// Whether the next attempt must reuse the checkpoint exactly.
    pub fn is_round7(&self) -> bool {
        self.source.tss().is_some_and(TssError::is_round7)
    }
}

impl From<ClientError> for SignTxError {
    fn from(source: ClientError) -> Self {
        Self::without_checkpoint(source)
    }
}

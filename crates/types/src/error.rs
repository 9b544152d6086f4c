// Path: crates/types/src/error.rs
//! Core error types shared across the workspace.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised while decoding, encoding or validating a chain address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The string is neither valid base58check nor valid bech32 for the chain.
    #[error("Malformed address '{0}'")]
    Malformed(String),
    /// The address is well-formed but belongs to a different chain or network.
    #[error("Address '{address}' is not valid on {chain}")]
    WrongNetwork {
        /// The rejected address.
        address: String,
        /// The chain it was checked against.
        chain: String,
    },
    /// The address uses a format the chain does not support.
    #[error("Unsupported address format: {0}")]
    Unsupported(String),
    /// A public key could not be parsed.
    #[error("Invalid public key: {0}")]
    InvalidPubKey(String),
}

impl ErrorCode for AddressError {
    fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "ADDRESS_MALFORMED",
            Self::WrongNetwork { .. } => "ADDRESS_WRONG_NETWORK",
            Self::Unsupported(_) => "ADDRESS_UNSUPPORTED",
            Self::InvalidPubKey(_) => "ADDRESS_INVALID_PUBKEY",
        }
    }
}

/// Errors raised by the memo parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoError {
    /// The memo is empty.
    #[error("Memo is empty")]
    Empty,
    /// The leading action is not part of the grammar.
    #[error("Unknown memo action '{0}'")]
    UnknownAction(String),
    /// The action requires an argument that is missing.
    #[error("Memo action '{action}' is missing its {field}")]
    MissingField {
        /// The action that was parsed.
        action: String,
        /// The missing field.
        field: &'static str,
    },
    /// The referenced transaction id is not 64 hex characters.
    #[error("Invalid transaction id in memo: {0}")]
    InvalidTxId(String),
}

impl ErrorCode for MemoError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "MEMO_EMPTY",
            Self::UnknownAction(_) => "MEMO_UNKNOWN_ACTION",
            Self::MissingField { .. } => "MEMO_MISSING_FIELD",
            Self::InvalidTxId(_) => "MEMO_INVALID_TXID",
        }
    }
}

/// Errors returned by a settlement-chain bridge client.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// The settlement chain could not be reached.
    #[error("Bridge transport error: {0}")]
    Transport(String),
    /// The settlement chain answered but the request was rejected.
    #[error("Bridge request rejected: {0}")]
    Rejected(String),
    /// A response could not be decoded.
    #[error("Bridge decode error: {0}")]
    Decode(String),
}

impl ErrorCode for BridgeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "BRIDGE_TRANSPORT",
            Self::Rejected(_) => "BRIDGE_REJECTED",
            Self::Decode(_) => "BRIDGE_DECODE",
        }
    }
}

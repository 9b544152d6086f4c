// Path: crates/tss/src/types.rs
use ferry_types::Blame;
use serde::{Deserialize, Serialize};

/// One keysign request to the TSS service: every message is base64 of a 32-byte hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignRequest {
    /// Vault key the messages are signed with.
    pub pool_pub_key: String,
    /// Base64 messages, sorted.
    pub messages: Vec<String>,
    /// Settlement height rounded down to a multiple of 20, so all members agree.
    pub block_height: i64,
    /// Settlement-chain software version.
    pub version: String,
}

/// Outcome flag of a keysign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum KeysignStatus {
    /// Not applicable.
    #[default]
    NotApplicable,
    /// All messages signed.
    Success,
    /// The ceremony failed.
    Fail,
}

impl From<u8> for KeysignStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Success,
            2 => Self::Fail,
            _ => Self::NotApplicable,
        }
    }
}

impl From<KeysignStatus> for u8 {
    fn from(v: KeysignStatus) -> Self {
        match v {
            KeysignStatus::NotApplicable => 0,
            KeysignStatus::Success => 1,
            KeysignStatus::Fail => 2,
        }
    }
}

/// A signature for one message, base64 encoded parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignSignature {
    /// The message as it was sent.
    pub msg: String,
    /// Big-endian R.
    pub r: String,
    /// Big-endian S.
    pub s: String,
    /// Recovery id.
    #[serde(default)]
    pub recovery_id: String,
}

/// The TSS service's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignResponse {
    /// Signatures, in any order.
    #[serde(default)]
    pub signatures: Vec<KeysignSignature>,
    /// Outcome.
    #[serde(default)]
    pub status: KeysignStatus,
    /// Culpability report on failure.
    #[serde(default)]
    pub blame: Blame,
}

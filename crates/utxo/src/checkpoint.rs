// Path: crates/utxo/src/checkpoint.rs
use crate::error::ClientError;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::{OutPoint, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CHECKPOINT_VERSION: u32 = 1;

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

/// The unsigned transaction of an outbound and the value of every input it spends.
///
/// Persisted by the caller between attempts so a retry after a failed final keysign
/// round signs the identical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignCheckpoint {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Consensus-encoded unsigned transaction, base64.
    pub unsigned_tx: String,
    /// Input values in sats keyed by `<txid>-<vout>`.
    pub individual_amounts: BTreeMap<String, u64>,
}

/// Key of an input in [`SignCheckpoint::individual_amounts`].
pub fn outpoint_key(outpoint: &OutPoint) -> String {
    format!("{}-{}", outpoint.txid, outpoint.vout)
}

impl SignCheckpoint {
    pub fn new(tx: &Transaction, individual_amounts: BTreeMap<String, u64>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            unsigned_tx: B64.encode(serialize(tx)),
            individual_amounts,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ClientError> {
        serde_json::to_vec(self).map_err(|e| ClientError::Checkpoint(e.to_string()))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ClientError> {
        let cp: Self =
            serde_json::from_slice(raw).map_err(|e| ClientError::Checkpoint(e.to_string()))?;
        if cp.version != CHECKPOINT_VERSION {
            return Err(ClientError::Checkpoint(format!(
                "unsupported checkpoint version {}",
                cp.version
            )));
        }
        Ok(cp)
    }

    pub fn transaction(&self) -> Result<Transaction, ClientError> {
        let raw = B64
            .decode(&self.unsigned_tx)
            .map_err(|e| ClientError::Checkpoint(e.to_string()))?;
        deserialize(&raw).map_err(|e| ClientError::Checkpoint(e.to_string()))
    }

    /// Value of the output spent by `outpoint`.
    pub fn amount_of(&self, outpoint: &OutPoint) -> Result<u64, ClientError> {
        self.individual_amounts
            .get(&outpoint_key(outpoint))
            .copied()
            .ok_or_else(|| ClientError::Checkpoint(format!("no amount for input {outpoint}")))
    }

    /// Sum of all input values.
    pub fn total_in(&self) -> u64 {
        self.individual_amounts.values().sum()
    }
}

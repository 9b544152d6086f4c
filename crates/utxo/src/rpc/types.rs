// Path: crates/utxo/src/rpc/types.rs
//! Response shapes of the daemon's JSON-RPC methods, reduced to the fields the client
//! reads. Amounts arrive as floating-point coins and are converted with [`to_sats`].

use ferry_types::chain::SATS_PER_COIN;
use serde::{Deserialize, Serialize};

/// `scriptPubKey.type` of an OP_RETURN output.
pub const NULL_DATA: &str = "nulldata";

/// Converts a coin amount as reported by the daemon to sats, rounding to the nearest.
pub fn to_sats(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value * SATS_PER_COIN as f64).round() as u64
}

fn final_sequence() -> u32 {
    u32::MAX
}

/// `getblock <hash> 2`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockVerbose {
    /// Block hash.
    pub hash: String,
    /// Parent hash; empty for genesis.
    #[serde(default, rename = "previousblockhash")]
    pub previous_hash: String,
    /// Block height.
    pub height: i64,
    /// Decoded transactions.
    #[serde(default)]
    pub tx: Vec<RawTx>,
}

/// A decoded transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTx {
    /// Transaction id.
    pub txid: String,
    /// Witness hash.
    #[serde(default)]
    pub hash: String,
    /// nLockTime.
    #[serde(default)]
    pub locktime: u32,
    /// Inputs.
    #[serde(default)]
    pub vin: Vec<Vin>,
    /// Outputs.
    #[serde(default)]
    pub vout: Vec<Vout>,
}

impl RawTx {
    /// Whether any input signals replace-by-fee.
    pub fn is_rbf(&self) -> bool {
        self.vin.iter().any(|v| v.sequence < u32::MAX - 1)
    }

    /// Whether this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.vin.as_slice(), [only] if !only.coinbase.is_empty())
    }
}

/// A transaction input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vin {
    /// Funding transaction; empty for coinbase inputs.
    #[serde(default)]
    pub txid: String,
    /// Funding output index.
    #[serde(default)]
    pub vout: u32,
    /// nSequence.
    #[serde(default = "final_sequence")]
    pub sequence: u32,
    /// Coinbase data, hex.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub coinbase: String,
}

impl Default for Vin {
    fn default() -> Self {
        Self {
            txid: String::new(),
            vout: 0,
            sequence: final_sequence(),
            coinbase: String::new(),
        }
    }
}

/// A transaction output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vout {
    /// Value in coins.
    #[serde(default)]
    pub value: f64,
    /// Output index.
    #[serde(default)]
    pub n: u32,
    /// Locking script.
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

impl Vout {
    /// Value in sats.
    pub fn sats(&self) -> u64 {
        to_sats(self.value)
    }

    /// Whether the output is an OP_RETURN data carrier.
    pub fn is_null_data(&self) -> bool {
        self.script_pub_key.kind.eq_ignore_ascii_case(NULL_DATA)
    }
}

/// A decoded locking script. Older daemons list `addresses`, newer ones a single
/// `address`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptPubKey {
    /// Script bytes, hex.
    #[serde(default)]
    pub hex: String,
    /// Standard script class name.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Addresses, pre-v22 daemons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    /// Address, v22+ daemons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ScriptPubKey {
    /// The addresses the daemon reported.
    pub fn reported_addresses(&self) -> Vec<String> {
        if !self.addresses.is_empty() {
            return self.addresses.clone();
        }
        self.address.iter().cloned().collect()
    }
}

/// One entry of `listunspent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Unspent {
    /// Funding transaction.
    pub txid: String,
    /// Output index.
    pub vout: u32,
    /// Address the output pays to.
    #[serde(default)]
    pub address: String,
    /// Locking script, hex.
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: String,
    /// Value in coins.
    pub amount: f64,
    /// Confirmations; zero while in the mempool.
    #[serde(default)]
    pub confirmations: i64,
}

impl Unspent {
    /// Value in sats.
    pub fn sats(&self) -> u64 {
        to_sats(self.amount)
    }
}

/// `getnetworkinfo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Minimum relay fee in coins per kB.
    #[serde(default)]
    pub relayfee: f64,
    /// User agent, e.g. `/Satoshi:25.0.0/`.
    #[serde(default)]
    pub subversion: String,
}

/// `getblockstats <height> ["avgfeerate"]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockStats {
    /// Average fee rate in sats per vbyte.
    #[serde(default)]
    pub avgfeerate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_daemon_shapes() {
        let raw = r#"{
            "txid": "aa", "hash": "bb", "locktime": 0,
            "vin": [{"txid": "cc", "vout": 1, "sequence": 4294967293}],
            "vout": [
                {"value": 0.1, "n": 0, "scriptPubKey": {"hex": "0014", "type": "witness_v0_keyhash", "address": "bc1q"}},
                {"value": 0.0, "n": 1, "scriptPubKey": {"hex": "6a", "type": "nulldata"}}
            ]
        }"#;
        let tx: RawTx = serde_json::from_str(raw).unwrap();
        assert!(tx.is_rbf());
        assert!(!tx.is_coinbase());
        assert_eq!(tx.vout[0].sats(), 10_000_000);
        assert_eq!(tx.vout[0].script_pub_key.reported_addresses(), vec!["bc1q"]);
        assert!(tx.vout[1].is_null_data());

        let cb: RawTx =
            serde_json::from_str(r#"{"txid":"x","vin":[{"coinbase":"03ab"}],"vout":[]}"#).unwrap();
        assert!(cb.is_coinbase());
        assert!(!cb.is_rbf());
    }

    #[test]
    fn sats_rounding() {
        assert_eq!(to_sats(0.29), 29_000_000);
        assert_eq!(to_sats(0.00000001), 1);
        assert_eq!(to_sats(-1.0), 0);
        assert_eq!(to_sats(f64::NAN), 0);
    }
}

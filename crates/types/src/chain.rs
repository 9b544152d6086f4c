// Path: crates/types/src/chain.rs
//! The supported UTXO chains and the constants that distinguish them.
//!
//! Everything that differs between BTC, BCH, LTC and DOGE at the data level lives in
//! [`ChainParams`] and [`AddressParams`]; behaviour that differs (fee estimation,
//! sighash algorithm, script-sig shape) lives behind the `UtxoChain` trait in
//! `ferry-utxo`.

use crate::coin::Asset;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Satoshis per whole coin on every supported chain.
pub const SATS_PER_COIN: u64 = 100_000_000;

/// An external UTXO chain served by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Chain {
    /// Bitcoin.
    BTC,
    /// Bitcoin Cash.
    BCH,
    /// Litecoin.
    LTC,
    /// Dogecoin.
    DOGE,
}

/// The network flavour the node runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainNetwork {
    /// Production network.
    #[default]
    MainNet,
    /// Public test network.
    TestNet,
    /// Local regression network.
    MockNet,
    /// Production chain parameters with a staging settlement chain.
    StageNet,
}

/// Static per-chain constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    /// Outputs or observations below this many sats are dust.
    pub dust_threshold: u64,
    /// Upper bound for the concatenated OP_RETURN memo of an inbound.
    pub max_memo_bytes: usize,
    /// Block reward used when the coinbase of a block cannot be read.
    pub default_coinbase_sats: u64,
    /// Expected block interval.
    pub approx_block_ms: u64,
    /// Virtual size assumed for an average outbound when reporting fees.
    pub estimate_avg_tx_vbytes: u64,
    /// The daemon's default maximum fee rate, sats per kB.
    pub max_fee_rate_per_kb: u64,
    /// Minimum block distance between two solvency reports.
    pub solvency_report_interval: i64,
}

/// Version bytes and HRP used to render addresses on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressParams {
    /// Base58 version byte for pay-to-pubkey-hash.
    pub p2pkh_prefix: u8,
    /// Base58 version byte for pay-to-script-hash.
    pub p2sh_prefix: u8,
    /// Bech32 human readable part, when the chain supports segwit.
    pub bech32_hrp: Option<&'static str>,
}

const BTC_PARAMS: ChainParams = ChainParams {
    dust_threshold: 10_000,
    max_memo_bytes: 250,
    default_coinbase_sats: 625_000_000,
    approx_block_ms: 600_000,
    estimate_avg_tx_vbytes: 1000,
    max_fee_rate_per_kb: SATS_PER_COIN / 10,
    solvency_report_interval: 1,
};

const BCH_PARAMS: ChainParams = ChainParams {
    dust_threshold: 10_000,
    max_memo_bytes: 250,
    default_coinbase_sats: 625_000_000,
    approx_block_ms: 600_000,
    estimate_avg_tx_vbytes: 1000,
    max_fee_rate_per_kb: SATS_PER_COIN / 10,
    solvency_report_interval: 1,
};

const LTC_PARAMS: ChainParams = ChainParams {
    dust_threshold: 10_000,
    max_memo_bytes: 250,
    default_coinbase_sats: 1_250_000_000,
    approx_block_ms: 150_000,
    estimate_avg_tx_vbytes: 1000,
    max_fee_rate_per_kb: SATS_PER_COIN / 10,
    solvency_report_interval: 5,
};

const DOGE_PARAMS: ChainParams = ChainParams {
    dust_threshold: 100_000_000,
    max_memo_bytes: 250,
    default_coinbase_sats: 10_000 * SATS_PER_COIN,
    approx_block_ms: 60_000,
    estimate_avg_tx_vbytes: 1000,
    max_fee_rate_per_kb: SATS_PER_COIN * 10,
    solvency_report_interval: 1,
};

impl Chain {
    /// All chains the client knows how to serve.
    pub const ALL: [Chain; 4] = [Chain::BTC, Chain::BCH, Chain::LTC, Chain::DOGE];

    /// The uppercase ticker used in mimir keys, assets and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::BTC => "BTC",
            Chain::BCH => "BCH",
            Chain::LTC => "LTC",
            Chain::DOGE => "DOGE",
        }
    }

    /// Constants for this chain.
    pub fn params(&self) -> &'static ChainParams {
        match self {
            Chain::BTC => &BTC_PARAMS,
            Chain::BCH => &BCH_PARAMS,
            Chain::LTC => &LTC_PARAMS,
            Chain::DOGE => &DOGE_PARAMS,
        }
    }

    /// The asset fees are paid in.
    pub fn gas_asset(&self) -> Asset {
        Asset::new(self.as_str(), self.as_str())
    }

    /// Address rendering parameters for the given network.
    pub fn address_params(&self, network: ChainNetwork) -> AddressParams {
        use ChainNetwork::*;
        match (self, network) {
            (Chain::BTC, MainNet | StageNet) => AddressParams {
                p2pkh_prefix: 0x00,
                p2sh_prefix: 0x05,
                bech32_hrp: Some("bc"),
            },
            (Chain::BTC, TestNet) => AddressParams {
                p2pkh_prefix: 0x6f,
                p2sh_prefix: 0xc4,
                bech32_hrp: Some("tb"),
            },
            (Chain::BTC, MockNet) => AddressParams {
                p2pkh_prefix: 0x6f,
                p2sh_prefix: 0xc4,
                bech32_hrp: Some("bcrt"),
            },
            (Chain::LTC, MainNet | StageNet) => AddressParams {
                p2pkh_prefix: 0x30,
                p2sh_prefix: 0x32,
                bech32_hrp: Some("ltc"),
            },
            (Chain::LTC, TestNet) => AddressParams {
                p2pkh_prefix: 0x6f,
                p2sh_prefix: 0x3a,
                bech32_hrp: Some("tltc"),
            },
            (Chain::LTC, MockNet) => AddressParams {
                p2pkh_prefix: 0x6f,
                p2sh_prefix: 0x3a,
                bech32_hrp: Some("rltc"),
            },
            (Chain::BCH, MainNet | StageNet) => AddressParams {
                p2pkh_prefix: 0x00,
                p2sh_prefix: 0x05,
                bech32_hrp: None,
            },
            (Chain::BCH, TestNet | MockNet) => AddressParams {
                p2pkh_prefix: 0x6f,
                p2sh_prefix: 0xc4,
                bech32_hrp: None,
            },
            (Chain::DOGE, MainNet | StageNet) => AddressParams {
                p2pkh_prefix: 0x1e,
                p2sh_prefix: 0x16,
                bech32_hrp: None,
            },
            (Chain::DOGE, TestNet) => AddressParams {
                p2pkh_prefix: 0x71,
                p2sh_prefix: 0xc4,
                bech32_hrp: None,
            },
            (Chain::DOGE, MockNet) => AddressParams {
                p2pkh_prefix: 0x6f,
                p2sh_prefix: 0xc4,
                bech32_hrp: None,
            },
        }
    }

    /// Whether vault addresses on this chain are native segwit.
    pub fn uses_segwit_vaults(&self) -> bool {
        matches!(self, Chain::BTC | Chain::LTC)
    }

    /// Mimir key that halts this chain by admin action.
    pub fn halt_mimir_key(&self) -> String {
        format!("Halt{}Chain", self.as_str())
    }

    /// Mimir key set by the automatic solvency checker.
    pub fn solvency_halt_mimir_key(&self) -> String {
        format!("SolvencyHalt{}Chain", self.as_str())
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BTC" => Ok(Chain::BTC),
            "BCH" => Ok(Chain::BCH),
            "LTC" => Ok(Chain::LTC),
            "DOGE" => Ok(Chain::DOGE),
            other => Err(format!("unsupported chain: {other}")),
        }
    }
}

impl TryFrom<String> for Chain {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Chain> for String {
    fn from(value: Chain) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_parses_case_insensitively() {
        assert_eq!("btc".parse::<Chain>().unwrap(), Chain::BTC);
        assert_eq!("Doge".parse::<Chain>().unwrap(), Chain::DOGE);
        assert!("ETH".parse::<Chain>().is_err());
    }

    #[test]
    fn chain_serializes_as_uppercase_string() {
        let json = serde_json::to_string(&Chain::LTC).unwrap();
        assert_eq!(json, "\"LTC\"");
        let back: Chain = serde_json::from_str("\"bch\"").unwrap();
        assert_eq!(back, Chain::BCH);
    }

    #[test]
    fn params_table_matches_chain_constants() {
        assert_eq!(Chain::DOGE.params().dust_threshold, 100_000_000);
        assert_eq!(Chain::LTC.params().solvency_report_interval, 5);
        assert_eq!(Chain::BTC.params().max_fee_rate_per_kb, 10_000_000);
        assert_eq!(Chain::BTC.gas_asset().to_string(), "BTC.BTC");
        assert_eq!(Chain::BTC.halt_mimir_key(), "HaltBTCChain");
        assert_eq!(Chain::LTC.solvency_halt_mimir_key(), "SolvencyHaltLTCChain");
    }
}

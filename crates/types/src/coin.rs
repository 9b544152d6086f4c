// Path: crates/types/src/coin.rs
use crate::chain::Chain;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A chain-qualified asset, rendered `CHAIN.SYMBOL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asset {
    /// The chain the asset lives on, uppercase.
    pub chain: String,
    /// The asset ticker, uppercase.
    pub symbol: String,
}

impl Asset {
    /// Creates an asset, normalising both parts to uppercase.
    pub fn new(chain: impl AsRef<str>, symbol: impl AsRef<str>) -> Self {
        Self {
            chain: chain.as_ref().to_ascii_uppercase(),
            symbol: symbol.as_ref().to_ascii_uppercase(),
        }
    }

    /// Parses `CHAIN.SYMBOL`. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let (chain, symbol) = s.split_once('.')?;
        if chain.is_empty() || symbol.is_empty() {
            return None;
        }
        Some(Self::new(chain, symbol))
    }

    /// Whether this is the fee asset of `chain`.
    pub fn is_gas_asset_of(&self, chain: Chain) -> bool {
        *self == chain.gas_asset()
    }

    /// Whether this is a bridged ERC-20 variant of the settlement chain's native token.
    /// Those are burned in flight and never count towards vault solvency.
    pub fn is_erc20_rune(&self) -> bool {
        self.chain == "ETH" && self.symbol.starts_with("RUNE-")
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chain, self.symbol)
    }
}

/// An amount of an asset, in the asset's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// The asset.
    pub asset: Asset,
    /// Amount in sats.
    pub amount: u64,
}

impl Coin {
    /// Creates a coin.
    pub fn new(asset: Asset, amount: u64) -> Self {
        Self { asset, amount }
    }

    /// Creates a coin of the gas asset of `chain`.
    pub fn gas(chain: Chain, amount: u64) -> Self {
        Self::new(chain.gas_asset(), amount)
    }

    /// Whether the amount is zero.
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset)
    }
}

/// Renders a coin list as `"<amount> <asset>, <amount> <asset>"`.
pub fn format_coins(coins: &[Coin]) -> String {
    coins
        .iter()
        .map(Coin::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coins_render_joined() {
        let coins = vec![Coin::gas(Chain::BTC, 10), Coin::gas(Chain::BTC, 20)];
        assert_eq!(format_coins(&coins), "10 BTC.BTC, 20 BTC.BTC");
        assert_eq!(format_coins(&[]), "");
    }

    #[test]
    fn asset_parse_and_classify() {
        let asset = Asset::parse("doge.doge").unwrap();
        assert!(asset.is_gas_asset_of(Chain::DOGE));
        assert!(!asset.is_gas_asset_of(Chain::BTC));
        assert!(Asset::parse("ETH.RUNE-0X3155").unwrap().is_erc20_rune());
        assert!(Asset::parse("BTC").is_none());
    }
}

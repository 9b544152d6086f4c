// Path: crates/types/src/vault.rs
use crate::coin::{Asset, Coin};
use crate::pubkey::PubKey;
use serde::{Deserialize, Serialize};

/// A threshold-owned vault as reported by the settlement chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// The vault's pool public key.
    pub pub_key: PubKey,
    /// Node public keys that share the vault key.
    #[serde(default)]
    pub membership: Vec<PubKey>,
    /// Balances the settlement chain believes the vault holds.
    #[serde(default)]
    pub coins: Vec<Coin>,
}

impl Vault {
    /// Whether `node` is a member of the vault.
    pub fn contains(&self, node: &PubKey) -> bool {
        self.membership.iter().any(|m| m == node)
    }

    /// The vault's expected balance of `asset`, zero when absent.
    pub fn get_coin(&self, asset: &Asset) -> Coin {
        self.coins
            .iter()
            .find(|c| &c.asset == asset)
            .cloned()
            .unwrap_or_else(|| Coin::new(asset.clone(), 0))
    }
}

/// Lifecycle status of a node on the settlement chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Status could not be determined.
    #[default]
    Unknown,
    /// Node is whitelisted but not yet bonded.
    Whitelisted,
    /// Node is bonded and waiting to churn in.
    Standby,
    /// Node is ready to churn in.
    Ready,
    /// Node is an active validator and vault member.
    Active,
    /// Node was removed.
    Disabled,
}

/// A node singled out by a failed keysign ceremony.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameNode {
    /// The blamed node.
    pub pubkey: String,
    /// Evidence data.
    #[serde(default)]
    pub blame_data: Vec<u8>,
    /// Signature over the evidence.
    #[serde(default)]
    pub blame_signature: Vec<u8>,
}

/// Culpability report attached to a failed keysign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    /// Human readable failure reason.
    #[serde(default)]
    pub fail_reason: String,
    /// Whether the failure happened on a unicast message.
    #[serde(default)]
    pub is_unicast: bool,
    /// Protocol round the failure happened in.
    #[serde(default)]
    pub round: String,
    /// Blamed nodes.
    #[serde(default)]
    pub blame_nodes: Vec<BlameNode>,
}

impl Blame {
    /// Whether no node is blamed.
    pub fn is_empty(&self) -> bool {
        self.blame_nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;

    #[test]
    fn vault_lookup_helpers() {
        let vault = Vault {
            pub_key: PubKey::new("02aa"),
            membership: vec![PubKey::new("02bb"), PubKey::new("02cc")],
            coins: vec![Coin::gas(Chain::LTC, 500)],
        };
        assert!(vault.contains(&PubKey::new("02cc")));
        assert!(!vault.contains(&PubKey::new("02dd")));
        assert_eq!(vault.get_coin(&Chain::LTC.gas_asset()).amount, 500);
        assert_eq!(vault.get_coin(&Chain::BTC.gas_asset()).amount, 0);
    }
}

// Path: crates/types/src/pubkey.rs
use crate::address::ChainAddress;
use crate::chain::{Chain, ChainNetwork};
use crate::error::AddressError;
use bitcoin::secp256k1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A vault or node public key as it is exchanged with the settlement chain.
///
/// The value is kept as the hex string the bridge hands out; it is only parsed into a
/// secp256k1 key when an address must be derived or a signature verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PubKey(String);

impl PubKey {
    /// Wraps a hex-encoded public key.
    pub fn new(hex_key: impl Into<String>) -> Self {
        Self(hex_key.into())
    }

    /// Builds the hex form of a compressed secp256k1 key.
    pub fn from_secp(key: &secp256k1::PublicKey) -> Self {
        Self(hex::encode(key.serialize()))
    }

    /// The raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is unset.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the key as secp256k1 (compressed or uncompressed).
    pub fn to_secp(&self) -> Result<secp256k1::PublicKey, AddressError> {
        let bytes =
            hex::decode(&self.0).map_err(|e| AddressError::InvalidPubKey(e.to_string()))?;
        secp256k1::PublicKey::from_slice(&bytes)
            .map_err(|e| AddressError::InvalidPubKey(e.to_string()))
    }

    /// The vault address for this key on `chain`: P2WPKH where the chain has segwit
    /// vaults, P2PKH otherwise.
    pub fn address(
        &self,
        chain: Chain,
        network: ChainNetwork,
    ) -> Result<ChainAddress, AddressError> {
        ChainAddress::for_pubkey(&self.to_secp()?, chain, network)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PubKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[test]
    fn vault_address_depends_on_chain() {
        let pk = PubKey::new(G);
        assert_eq!(
            pk.address(Chain::BTC, ChainNetwork::MainNet).unwrap().as_str(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
        assert_eq!(
            pk.address(Chain::BTC, ChainNetwork::TestNet).unwrap().as_str(),
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"
        );
        assert_eq!(
            pk.address(Chain::BCH, ChainNetwork::MainNet).unwrap().as_str(),
            "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
        );
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!(PubKey::new("zz").to_secp().is_err());
        assert!(PubKey::new("02abcd").to_secp().is_err());
    }
}

// Path: crates/types/src/address.rs
//! Address decoding and encoding for the supported UTXO chains.
//!
//! Addresses are decoded against the [`AddressParams`](crate::chain::AddressParams)
//! table of a `(chain, network)` pair. Base58check covers P2PKH and P2SH on every
//! chain; bech32 segwit addresses are only accepted where the chain defines an HRP.

use crate::chain::{Chain, ChainNetwork};
use crate::error::AddressError;
use bitcoin::bech32::{segwit, Fe32, Hrp};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::{
    base58, secp256k1, PubkeyHash, Script, ScriptBuf, ScriptHash, WitnessProgram, WitnessVersion,
};
use std::fmt;

const OP_CHECKMULTISIG: u8 = 0xae;

/// The payload an address commits to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddressPayload {
    /// Pay to public key hash.
    PubkeyHash([u8; 20]),
    /// Pay to script hash.
    ScriptHash([u8; 20]),
    /// A native segwit program.
    Witness {
        /// Witness version, 0 to 16.
        version: u8,
        /// Witness program bytes.
        program: Vec<u8>,
    },
}

/// A decoded address bound to a chain and network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainAddress {
    chain: Chain,
    network: ChainNetwork,
    payload: AddressPayload,
    encoded: String,
}

impl ChainAddress {
    /// Decodes `s` for `chain` on `network`.
    pub fn decode(s: &str, chain: Chain, network: ChainNetwork) -> Result<Self, AddressError> {
        let params = chain.address_params(network);
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Malformed(String::new()));
        }

        if let Some(expected_hrp) = params.bech32_hrp {
            if let Ok((hrp, version, program)) = segwit::decode(s) {
                if hrp.to_lowercase() != expected_hrp {
                    return Err(AddressError::WrongNetwork {
                        address: s.to_string(),
                        chain: chain.to_string(),
                    });
                }
                return Self::from_payload(
                    AddressPayload::Witness {
                        version: version.to_u8(),
                        program,
                    },
                    chain,
                    network,
                );
            }
        }

        let data = base58::decode_check(s).map_err(|_| AddressError::Malformed(s.to_string()))?;
        let (prefix, hash) = data
            .split_first()
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let hash: [u8; 20] = hash
            .try_into()
            .map_err(|_| AddressError::Malformed(s.to_string()))?;
        let payload = if *prefix == params.p2pkh_prefix {
            AddressPayload::PubkeyHash(hash)
        } else if *prefix == params.p2sh_prefix {
            AddressPayload::ScriptHash(hash)
        } else {
            return Err(AddressError::WrongNetwork {
                address: s.to_string(),
                chain: chain.to_string(),
            });
        };
        Self::from_payload(payload, chain, network)
    }

    /// Builds an address from a payload, rendering its canonical string form.
    pub fn from_payload(
        payload: AddressPayload,
        chain: Chain,
        network: ChainNetwork,
    ) -> Result<Self, AddressError> {
        let encoded = render(&payload, chain, network)?;
        Ok(Self {
            chain,
            network,
            payload,
            encoded,
        })
    }

    /// The vault address of a public key: P2WPKH on segwit-vault chains, P2PKH elsewhere.
    pub fn for_pubkey(
        key: &secp256k1::PublicKey,
        chain: Chain,
        network: ChainNetwork,
    ) -> Result<Self, AddressError> {
        let hash = hash160::Hash::hash(&key.serialize()).to_byte_array();
        let payload = if chain.uses_segwit_vaults() {
            AddressPayload::Witness {
                version: 0,
                program: hash.to_vec(),
            }
        } else {
            AddressPayload::PubkeyHash(hash)
        };
        Self::from_payload(payload, chain, network)
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// The chain this address was decoded for.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// The network this address was decoded for.
    pub fn network(&self) -> ChainNetwork {
        self.network
    }

    /// The committed payload.
    pub fn payload(&self) -> &AddressPayload {
        &self.payload
    }

    /// Whether `original` renders back to the same string, ignoring case.
    pub fn round_trips(&self, original: &str) -> bool {
        self.encoded.eq_ignore_ascii_case(original.trim())
    }

    /// The locking script that pays to this address.
    pub fn script_pubkey(&self) -> Result<ScriptBuf, AddressError> {
        match &self.payload {
            AddressPayload::PubkeyHash(hash) => {
                Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(*hash)))
            }
            AddressPayload::ScriptHash(hash) => {
                Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(*hash)))
            }
            AddressPayload::Witness { version, program } => {
                let version = WitnessVersion::try_from(*version)
                    .map_err(|e| AddressError::Unsupported(e.to_string()))?;
                let program = WitnessProgram::new(version, program)
                    .map_err(|e| AddressError::Unsupported(e.to_string()))?;
                Ok(ScriptBuf::new_witness_program(&program))
            }
        }
    }

    /// Whether `s` is a hex-encoded public key rather than an address. Such strings
    /// must never be used as an output destination.
    pub fn is_pubkey_form(s: &str) -> bool {
        let s = s.trim();
        matches!(s.len(), 66 | 130) && s.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

fn render(
    payload: &AddressPayload,
    chain: Chain,
    network: ChainNetwork,
) -> Result<String, AddressError> {
    let params = chain.address_params(network);
    match payload {
        AddressPayload::PubkeyHash(hash) => {
            let mut data = Vec::with_capacity(21);
            data.push(params.p2pkh_prefix);
            data.extend_from_slice(hash);
            Ok(base58::encode_check(&data))
        }
        AddressPayload::ScriptHash(hash) => {
            let mut data = Vec::with_capacity(21);
            data.push(params.p2sh_prefix);
            data.extend_from_slice(hash);
            Ok(base58::encode_check(&data))
        }
        AddressPayload::Witness { version, program } => {
            let hrp = params.bech32_hrp.ok_or_else(|| {
                AddressError::Unsupported(format!("{chain} has no segwit addresses"))
            })?;
            let hrp = Hrp::parse(hrp).map_err(|e| AddressError::Unsupported(e.to_string()))?;
            let version =
                Fe32::try_from(*version).map_err(|e| AddressError::Unsupported(e.to_string()))?;
            segwit::encode(hrp, version, program)
                .map_err(|e| AddressError::Unsupported(e.to_string()))
        }
    }
}

/// The standard class of a locking script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptClass {
    /// Pay to public key hash.
    PubkeyHash,
    /// Pay to script hash.
    ScriptHash,
    /// Segwit v0 key hash.
    WitnessPubkeyHash,
    /// Segwit v0 script hash.
    WitnessScriptHash,
    /// Taproot.
    Taproot,
    /// Bare public key.
    PubKey,
    /// Bare multisig.
    MultiSig,
    /// OP_RETURN data carrier.
    NullData,
    /// Anything else.
    NonStandard,
}

impl ScriptClass {
    /// Classifies a locking script.
    pub fn of(script: &Script) -> Self {
        if script.is_p2pkh() {
            Self::PubkeyHash
        } else if script.is_p2sh() {
            Self::ScriptHash
        } else if script.is_p2wpkh() {
            Self::WitnessPubkeyHash
        } else if script.is_p2wsh() {
            Self::WitnessScriptHash
        } else if script.is_p2tr() {
            Self::Taproot
        } else if script.is_p2pk() {
            Self::PubKey
        } else if script.is_op_return() {
            Self::NullData
        } else if script.as_bytes().last() == Some(&OP_CHECKMULTISIG) {
            Self::MultiSig
        } else {
            Self::NonStandard
        }
    }

    /// Classifies a hex-encoded locking script; undecodable hex is non-standard.
    pub fn of_hex(script_hex: &str) -> Self {
        match ScriptBuf::from_hex(script_hex) {
            Ok(script) => Self::of(&script),
            Err(_) => Self::NonStandard,
        }
    }

    /// Whether the script resolves to exactly one address that needs exactly one
    /// signature.
    pub fn is_single_sig(&self) -> bool {
        matches!(
            self,
            Self::PubkeyHash
                | Self::ScriptHash
                | Self::WitnessPubkeyHash
                | Self::WitnessScriptHash
                | Self::Taproot
                | Self::PubKey
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_round_trips_base58() {
        let addr =
            ChainAddress::decode("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2", Chain::BTC, ChainNetwork::MainNet)
                .unwrap();
        assert!(matches!(addr.payload(), AddressPayload::PubkeyHash(_)));
        assert!(addr.round_trips("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"));
        assert!(addr.script_pubkey().unwrap().is_p2pkh());

        let p2sh =
            ChainAddress::decode("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", Chain::BTC, ChainNetwork::MainNet)
                .unwrap();
        assert!(p2sh.script_pubkey().unwrap().is_p2sh());
    }

    #[test]
    fn decodes_bech32_only_with_matching_hrp() {
        let addr = ChainAddress::decode(
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            Chain::BTC,
            ChainNetwork::MainNet,
        )
        .unwrap();
        assert!(addr.script_pubkey().unwrap().is_p2wpkh());

        let wrong = ChainAddress::decode(
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx",
            Chain::BTC,
            ChainNetwork::MainNet,
        );
        assert!(matches!(wrong, Err(AddressError::WrongNetwork { .. })));

        // BCH and DOGE have no segwit
        assert!(ChainAddress::decode(
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            Chain::BCH,
            ChainNetwork::MainNet
        )
        .is_err());
    }

    #[test]
    fn rejects_other_chain_prefixes() {
        let res =
            ChainAddress::decode("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2", Chain::DOGE, ChainNetwork::MainNet);
        assert!(matches!(res, Err(AddressError::WrongNetwork { .. })));
        assert!(ChainAddress::decode("not-an-address", Chain::BTC, ChainNetwork::MainNet).is_err());
    }

    #[test]
    fn detects_pubkey_form() {
        let long = "05ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84c";
        assert!(ChainAddress::is_pubkey_form(long));
        assert!(ChainAddress::is_pubkey_form(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        ));
        assert!(!ChainAddress::is_pubkey_form("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"));
    }

    #[test]
    fn classifies_scripts() {
        let p2pkh = ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([7u8; 20]));
        assert_eq!(ScriptClass::of(&p2pkh), ScriptClass::PubkeyHash);
        assert!(ScriptClass::of(&p2pkh).is_single_sig());
        assert_eq!(ScriptClass::of_hex("6a0474657374"), ScriptClass::NullData);
        assert!(!ScriptClass::of_hex("6a0474657374").is_single_sig());
        assert_eq!(ScriptClass::of_hex("zz"), ScriptClass::NonStandard);
    }
}

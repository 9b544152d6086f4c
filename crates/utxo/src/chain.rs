// Path: crates/utxo/src/chain.rs
//! What differs between the supported chains in behaviour rather than in data: fee
//! size estimation, the signature-hash algorithm and the shape of the unlocking data.

use crate::error::ClientError;
use bitcoin::blockdata::script::PushBytesBuf;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{self, ecdsa};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Script, ScriptBuf, Transaction, Witness};
use ferry_types::address::AddressPayload;
use ferry_types::{Chain, ChainAddress, ChainNetwork};
use serde_json::{json, Value};

/// BCH `SIGHASH_ALL | SIGHASH_FORKID`.
const SIGHASH_ALL_FORKID: u32 = 0x41;

/// Max fee, in sats per kB, passed to an LTC daemon that accepts one on broadcast.
const LTC_BROADCAST_MAX_FEE: u64 = 10_000_000;

/// A UTXO chain the client can serve.
pub trait UtxoChain: Send + Sync + 'static {
    /// The chain.
    const CHAIN: Chain;

    /// Estimated virtual size of an outbound with `inputs` inputs and a memo of
    /// `memo_len` bytes.
    fn estimate_vbytes(inputs: usize, memo_len: usize) -> u64;

    /// The digest input `index` commits to. `script` is the vault's locking script,
    /// `amount` the value of the spent output.
    fn sighash(
        tx: &Transaction,
        index: usize,
        script: &Script,
        amount: u64,
    ) -> Result<[u8; 32], ClientError>;

    /// Attaches a compact signature by `pubkey` to input `index`.
    fn apply_signature(
        tx: &mut Transaction,
        index: usize,
        compact: &[u8; 64],
        pubkey: &secp256k1::PublicKey,
    ) -> Result<(), ClientError>;

    /// Parameters of `sendrawtransaction`. `modern_daemon` is set when the daemon
    /// accepts an explicit max fee.
    fn send_raw_params(tx_hex: String, modern_daemon: bool) -> Vec<Value> {
        let _ = modern_daemon;
        vec![json!(tx_hex)]
    }
}

/// Bitcoin.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bitcoin;
/// Bitcoin Cash.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcoinCash;
/// Litecoin.
#[derive(Debug, Clone, Copy, Default)]
pub struct Litecoin;
/// Dogecoin.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dogecoin;

fn legacy_vbytes(inputs: usize, memo_len: usize) -> u64 {
    (10 + 148 * inputs + 34 + 9 + memo_len) as u64
}

fn decode_signature(compact: &[u8; 64]) -> Result<ecdsa::Signature, ClientError> {
    ecdsa::Signature::from_compact(compact).map_err(|e| ClientError::InvalidTx(e.to_string()))
}

fn segwit_sighash(
    tx: &Transaction,
    index: usize,
    script: &Script,
    amount: u64,
) -> Result<[u8; 32], ClientError> {
    SighashCache::new(tx)
        .p2wpkh_signature_hash(index, script, Amount::from_sat(amount), EcdsaSighashType::All)
        .map(|h| h.to_byte_array())
        .map_err(|e| ClientError::InvalidTx(format!("sighash of input {index}: {e}")))
}

fn segwit_apply(
    tx: &mut Transaction,
    index: usize,
    compact: &[u8; 64],
    pubkey: &secp256k1::PublicKey,
) -> Result<(), ClientError> {
    let signature = bitcoin::ecdsa::Signature {
        signature: decode_signature(compact)?,
        sighash_type: EcdsaSighashType::All,
    };
    let input = tx
        .input
        .get_mut(index)
        .ok_or_else(|| ClientError::InvalidTx(format!("no input {index}")))?;
    input.witness = Witness::p2wpkh(&signature, pubkey);
    Ok(())
}

/// `<sig || hashtype> <pubkey>` script-sig for a P2PKH spend.
fn p2pkh_apply(
    tx: &mut Transaction,
    index: usize,
    compact: &[u8; 64],
    pubkey: &secp256k1::PublicKey,
    hash_type: u8,
) -> Result<(), ClientError> {
    let mut sig = decode_signature(compact)?.serialize_der().to_vec();
    sig.push(hash_type);
    let sig = PushBytesBuf::try_from(sig).map_err(|e| ClientError::InvalidTx(e.to_string()))?;
    let script_sig = ScriptBuf::builder()
        .push_slice(sig)
        .push_key(&bitcoin::PublicKey::new(*pubkey))
        .into_script();
    let input = tx
        .input
        .get_mut(index)
        .ok_or_else(|| ClientError::InvalidTx(format!("no input {index}")))?;
    input.script_sig = script_sig;
    Ok(())
}

impl UtxoChain for Bitcoin {
    const CHAIN: Chain = Chain::BTC;

    fn estimate_vbytes(inputs: usize, memo_len: usize) -> u64 {
        legacy_vbytes(inputs, memo_len)
    }

    fn sighash(
        tx: &Transaction,
        index: usize,
        script: &Script,
        amount: u64,
    ) -> Result<[u8; 32], ClientError> {
        segwit_sighash(tx, index, script, amount)
    }

    fn apply_signature(
        tx: &mut Transaction,
        index: usize,
        compact: &[u8; 64],
        pubkey: &secp256k1::PublicKey,
    ) -> Result<(), ClientError> {
        segwit_apply(tx, index, compact, pubkey)
    }
}

impl UtxoChain for Litecoin {
    const CHAIN: Chain = Chain::LTC;

    // Witness weight of a P2WPKH input rounded per input, plus fixed overhead.
    fn estimate_vbytes(inputs: usize, memo_len: usize) -> u64 {
        ((1075 + 6775 * inputs + 1050) / 100 + 31 + memo_len) as u64
    }

    fn sighash(
        tx: &Transaction,
        index: usize,
        script: &Script,
        amount: u64,
    ) -> Result<[u8; 32], ClientError> {
        segwit_sighash(tx, index, script, amount)
    }

    fn apply_signature(
        tx: &mut Transaction,
        index: usize,
        compact: &[u8; 64],
        pubkey: &secp256k1::PublicKey,
    ) -> Result<(), ClientError> {
        segwit_apply(tx, index, compact, pubkey)
    }

    fn send_raw_params(tx_hex: String, modern_daemon: bool) -> Vec<Value> {
        if modern_daemon {
            vec![json!(tx_hex), json!(LTC_BROADCAST_MAX_FEE)]
        } else {
            vec![json!(tx_hex)]
        }
    }
}

impl UtxoChain for BitcoinCash {
    const CHAIN: Chain = Chain::BCH;

    fn estimate_vbytes(inputs: usize, memo_len: usize) -> u64 {
        legacy_vbytes(inputs, memo_len)
    }

    /// BIP143 digest with the fork id bit set in the hash type.
    fn sighash(
        tx: &Transaction,
        index: usize,
        script: &Script,
        amount: u64,
    ) -> Result<[u8; 32], ClientError> {
        let input = tx
            .input
            .get(index)
            .ok_or_else(|| ClientError::InvalidTx(format!("no input {index}")))?;

        let mut prevouts = Vec::with_capacity(36 * tx.input.len());
        let mut sequences = Vec::with_capacity(4 * tx.input.len());
        for i in &tx.input {
            prevouts.extend(serialize(&i.previous_output));
            sequences.extend(i.sequence.0.to_le_bytes());
        }
        let mut outputs = Vec::new();
        for o in &tx.output {
            outputs.extend(serialize(o));
        }

        let mut preimage = Vec::with_capacity(256);
        preimage.extend(tx.version.0.to_le_bytes());
        preimage.extend(sha256d::Hash::hash(&prevouts).to_byte_array());
        preimage.extend(sha256d::Hash::hash(&sequences).to_byte_array());
        preimage.extend(serialize(&input.previous_output));
        preimage.extend(serialize(&script.to_owned()));
        preimage.extend(amount.to_le_bytes());
        preimage.extend(input.sequence.0.to_le_bytes());
        preimage.extend(sha256d::Hash::hash(&outputs).to_byte_array());
        preimage.extend(tx.lock_time.to_consensus_u32().to_le_bytes());
        preimage.extend(SIGHASH_ALL_FORKID.to_le_bytes());
        Ok(sha256d::Hash::hash(&preimage).to_byte_array())
    }

    fn apply_signature(
        tx: &mut Transaction,
        index: usize,
        compact: &[u8; 64],
        pubkey: &secp256k1::PublicKey,
    ) -> Result<(), ClientError> {
        p2pkh_apply(tx, index, compact, pubkey, SIGHASH_ALL_FORKID as u8)
    }
}

impl UtxoChain for Dogecoin {
    const CHAIN: Chain = Chain::DOGE;

    fn estimate_vbytes(inputs: usize, memo_len: usize) -> u64 {
        legacy_vbytes(inputs, memo_len)
    }

    fn sighash(
        tx: &Transaction,
        index: usize,
        script: &Script,
        _amount: u64,
    ) -> Result<[u8; 32], ClientError> {
        SighashCache::new(tx)
            .legacy_signature_hash(index, script, EcdsaSighashType::All.to_u32())
            .map(|h| h.to_byte_array())
            .map_err(|e| ClientError::InvalidTx(format!("sighash of input {index}: {e}")))
    }

    fn apply_signature(
        tx: &mut Transaction,
        index: usize,
        compact: &[u8; 64],
        pubkey: &secp256k1::PublicKey,
    ) -> Result<(), ClientError> {
        p2pkh_apply(tx, index, compact, pubkey, EcdsaSighashType::All.to_u32() as u8)
    }
}

/// The address a locking script pays to, rendered for `chain`. `None` for scripts
/// without a single address.
pub fn address_from_script(
    script_hex: &str,
    chain: Chain,
    network: ChainNetwork,
) -> Option<ChainAddress> {
    let script = ScriptBuf::from_hex(script_hex).ok()?;
    let bytes = script.as_bytes();
    let payload = if script.is_p2pkh() {
        AddressPayload::PubkeyHash(bytes.get(3..23)?.try_into().ok()?)
    } else if script.is_p2sh() {
        AddressPayload::ScriptHash(bytes.get(2..22)?.try_into().ok()?)
    } else if let Some(version) = script.witness_version() {
        AddressPayload::Witness {
            version: version.to_num(),
            program: bytes.get(2..)?.to_vec(),
        }
    } else {
        return None;
    };
    ChainAddress::from_payload(payload, chain, network).ok()
}

/// Parses a daemon user agent such as `/LitecoinCore:0.21.2.2/` or `/Satoshi:25.0.0/`
/// into its first three version components.
pub fn parse_daemon_version(subversion: &str) -> Option<(u32, u32, u32)> {
    let trimmed = subversion.trim().trim_matches('/');
    let version = trimmed
        .strip_prefix("LitecoinCore:")
        .or_else(|| trimmed.strip_prefix("Satoshi:"))
        .unwrap_or(trimmed);
    let mut parts = version.split('.').map(|p| p.trim().parse::<u32>());
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = parts.next()?.ok()?;
    Some((major, minor, patch))
}

/// Whether an LTC daemon accepts a max fee argument on `sendrawtransaction`.
pub fn accepts_broadcast_max_fee(subversion: &str) -> bool {
    parse_daemon_version(subversion).is_some_and(|v| v >= (0, 19, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::transaction::Version;
    use bitcoin::{OutPoint, Sequence, TxIn, TxOut, Txid};
    use std::str::FromStr;

    fn spend(script: ScriptBuf) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_str(
                        "256222fb25a9950479bb26049a2c00e75b89abbb7f0cf646c623b93e942c4c34",
                    )
                    .unwrap(),
                    vout: 1,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50_000),
                script_pubkey: script,
            }],
        }
    }

    fn sign<C: UtxoChain>(key: &SecretKey) -> (Transaction, [u8; 32]) {
        let secp = Secp256k1::new();
        let pk = key.public_key(&secp);
        let addr = ChainAddress::for_pubkey(&pk, C::CHAIN, ChainNetwork::MainNet).unwrap();
        let script = addr.script_pubkey().unwrap();
        let mut tx = spend(script.clone());
        let digest = C::sighash(&tx, 0, &script, 100_000).unwrap();
        let compact = secp
            .sign_ecdsa(&Message::from_digest(digest), key)
            .serialize_compact();
        C::apply_signature(&mut tx, 0, &compact, &pk).unwrap();
        (tx, digest)
    }

    #[test]
    fn vbyte_estimates_per_chain() {
        assert_eq!(Bitcoin::estimate_vbytes(1, 0), 201);
        assert_eq!(Bitcoin::estimate_vbytes(2, 10), 359);
        assert_eq!(Litecoin::estimate_vbytes(3, 0), 255);
        assert_eq!(Dogecoin::estimate_vbytes(1, 0), BitcoinCash::estimate_vbytes(1, 0));
    }

    #[test]
    fn segwit_chains_fill_the_witness() {
        let key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let (tx, _) = sign::<Bitcoin>(&key);
        assert_eq!(tx.input[0].witness.len(), 2);
        assert!(tx.input[0].script_sig.is_empty());
        let (ltc, _) = sign::<Litecoin>(&key);
        assert_eq!(ltc.input[0].witness.len(), 2);
    }

    #[test]
    fn legacy_chains_fill_the_script_sig() {
        let key = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let (bch, bch_digest) = sign::<BitcoinCash>(&key);
        assert!(bch.input[0].witness.is_empty());
        let sig_push = bch.input[0].script_sig.instructions().next().unwrap().unwrap();
        let sig = sig_push.push_bytes().unwrap().as_bytes();
        assert_eq!(*sig.last().unwrap(), 0x41);

        let (doge, doge_digest) = sign::<Dogecoin>(&key);
        let sig_push = doge.input[0].script_sig.instructions().next().unwrap().unwrap();
        assert_eq!(*sig_push.push_bytes().unwrap().as_bytes().last().unwrap(), 0x01);
        assert_ne!(bch_digest, doge_digest);
    }

    #[test]
    fn bch_digest_commits_to_amount() {
        let key = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let pk = key.public_key(&Secp256k1::new());
        let script = ChainAddress::for_pubkey(&pk, Chain::BCH, ChainNetwork::MainNet)
            .unwrap()
            .script_pubkey()
            .unwrap();
        let tx = spend(script.clone());
        let a = BitcoinCash::sighash(&tx, 0, &script, 1).unwrap();
        let b = BitcoinCash::sighash(&tx, 0, &script, 2).unwrap();
        assert_ne!(a, b);
        assert!(BitcoinCash::sighash(&tx, 1, &script, 1).is_err());
    }

    #[test]
    fn ltc_broadcast_params_follow_daemon_version() {
        assert!(accepts_broadcast_max_fee("/LitecoinCore:0.21.2.2/"));
        assert!(accepts_broadcast_max_fee("/LitecoinCore:0.19.0/"));
        assert!(!accepts_broadcast_max_fee("/LitecoinCore:0.18.1/"));
        assert!(!accepts_broadcast_max_fee("garbage"));
        assert_eq!(parse_daemon_version("/Satoshi:25.0.0/"), Some((25, 0, 0)));
        assert_eq!(Litecoin::send_raw_params("ab".into(), true).len(), 2);
        assert_eq!(Litecoin::send_raw_params("ab".into(), false).len(), 1);
        assert_eq!(Bitcoin::send_raw_params("ab".into(), true).len(), 1);
    }

    #[test]
    fn derives_addresses_from_scripts() {
        let wpkh = "0014751e76e8199196d454941c45d1b3a323f1433bd6";
        let addr = address_from_script(wpkh, Chain::BTC, ChainNetwork::MainNet).unwrap();
        assert_eq!(addr.as_str(), "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
        let pkh = "76a914751e76e8199196d454941c45d1b3a323f1433bd688ac";
        let addr = address_from_script(pkh, Chain::BCH, ChainNetwork::MainNet).unwrap();
        assert_eq!(addr.as_str(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert!(address_from_script("6a0474657374", Chain::BTC, ChainNetwork::MainNet).is_none());
        assert!(address_from_script(wpkh, Chain::BCH, ChainNetwork::MainNet).is_none());
    }
}

// Path: crates/tss/src/wrapper.rs
use crate::error::TssError;
use crate::signer::TssSigner;
use bitcoin::secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use ferry_types::PubKey;
use std::sync::Arc;

/// Picks the signing path per vault: the node's own key for its yggdrasil vault, the
/// TSS committee for everything else.
pub struct KeysignWrapper {
    node_key: Option<SecretKey>,
    node_pubkey: PubKey,
    signer: Arc<TssSigner>,
}

impl std::fmt::Debug for KeysignWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysignWrapper")
            .field("node_pubkey", &self.node_pubkey)
            .field("has_node_key", &self.node_key.is_some())
            .finish()
    }
}

impl KeysignWrapper {
    /// A wrapper that can also sign locally with `node_key`.
    pub fn new(node_key: SecretKey, signer: Arc<TssSigner>) -> Self {
        let secp = Secp256k1::signing_only();
        let node_pubkey = PubKey::from_secp(&PublicKey::from_secret_key(&secp, &node_key));
        Self {
            node_key: Some(node_key),
            node_pubkey,
            signer,
        }
    }

    /// A wrapper that always goes through TSS.
    pub fn tss_only(node_pubkey: PubKey, signer: Arc<TssSigner>) -> Self {
        Self {
            node_key: None,
            node_pubkey,
            signer,
        }
    }

    /// The local node's public key.
    pub fn node_pubkey(&self) -> &PubKey {
        &self.node_pubkey
    }

    /// Whether `vault` is the node's own yggdrasil vault.
    pub fn is_yggdrasil(&self, vault: &PubKey) -> bool {
        self.node_key.is_some() && vault == &self.node_pubkey
    }

    /// Signs `digest` for `vault`. Returns the low-S compact signature, or `None` when
    /// the node was not part of the signing committee.
    pub async fn sign(
        &self,
        digest: [u8; 32],
        vault: &PubKey,
    ) -> Result<Option<[u8; 64]>, TssError> {
        if let Some(key) = self.node_key.as_ref().filter(|_| self.is_yggdrasil(vault)) {
            let secp = Secp256k1::signing_only();
            let mut sig = secp.sign_ecdsa(&Message::from_digest(digest), key);
            sig.normalize_s();
            return Ok(Some(sig.serialize_compact()));
        }
        let signed = self.signer.remote_sign(&digest, vault.as_str()).await?;
        Ok(signed.map(|(compact, _recovery_id)| compact))
    }

    /// Checks `compact` over `digest` against `vault`'s key.
    pub fn verify(digest: [u8; 32], compact: &[u8; 64], vault: &PubKey) -> Result<(), TssError> {
        let key = vault
            .to_secp()
            .map_err(|e| TssError::Decode(e.to_string()))?;
        let sig = Signature::from_compact(compact).map_err(|e| TssError::Decode(e.to_string()))?;
        Secp256k1::verification_only()
            .verify_ecdsa(&Message::from_digest(digest), &sig, &key)
            .map_err(|e| TssError::Local(format!("signature does not verify: {e}")))
    }
}

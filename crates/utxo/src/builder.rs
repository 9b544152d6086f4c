// Path: crates/utxo/src/builder.rs
//! Outbound construction: UTXO selection, fee computation, signing through the
//! keysign path and broadcast.

use crate::chain::UtxoChain;
use crate::checkpoint::{outpoint_key, SignCheckpoint};
use crate::client::{UtxoClient, MAXIMUM_CONFIRMATION};
use crate::error::{ClientError, SignTxError, RPC_TX_ALREADY_IN_CHAIN};
use crate::rpc::Unspent;
use bitcoin::absolute::LockTime;
use bitcoin::blockdata::script::PushBytesBuf;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxOut, Txid, Witness};
use ferry_storage::BlockMeta;
use ferry_telemetry::chain_metrics;
use ferry_tss::{KeysignWrapper, TssError};
use ferry_types::bridge::MIMIR_MAX_UTXOS_TO_SPEND;
use ferry_types::{ChainAddress, Coin, Memo, PubKey, ScriptClass, TxInItem, TxOutItem, TxType};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::Ordering;

/// Fee rate used when neither the assignment nor the fee record has one.
pub const SATS_PER_VBYTE: u64 = 25;
/// Confirmations a customer UTXO needs before it is spent.
pub const MIN_UTXO_CONFIRMATION: i64 = 1;
/// Used when the `MaxUTXOsToSpend` mimir is unset.
pub const DEFAULT_MAX_UTXOS_TO_SPEND: i64 = 10;

/// A signed outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOutbound {
    /// Consensus-encoded signed transaction.
    pub tx: Vec<u8>,
    /// Checkpoint to persist; `None` once signing succeeded.
    pub checkpoint: Option<Vec<u8>>,
    /// The observation the outbound will produce once mined.
    pub observation: TxInItem,
}

impl<C: UtxoChain> UtxoClient<C> {
    /// The mimir bound on inputs per outbound.
    pub(crate) async fn max_utxos_to_spend(&self) -> i64 {
        match self.bridge.get_mimir(MIMIR_MAX_UTXOS_TO_SPEND).await {
            Ok(v) if v > 0 => v,
            Ok(_) => DEFAULT_MAX_UTXOS_TO_SPEND,
            Err(e) => {
                tracing::warn!(target: "signer", error = %e, "failed to read MaxUTXOsToSpend");
                DEFAULT_MAX_UTXOS_TO_SPEND
            }
        }
    }

    /// Txids of every transaction we broadcast that is still in the index, lowercase.
    fn self_transactions(&self) -> HashSet<String> {
        match self.store.get_block_metas() {
            Ok(metas) => metas
                .iter()
                .flat_map(|m| m.self_transactions.iter())
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            Err(e) => {
                tracing::warn!(target: "signer", chain = %C::CHAIN, error = %e, "failed to read block metas");
                HashSet::new()
            }
        }
    }

    /// Spendable UTXOs of `vault`, oldest first, until both the mimir count and
    /// `total` sats are reached.
    pub async fn select_utxos(
        &self,
        vault: &PubKey,
        total: u64,
    ) -> Result<Vec<Unspent>, ClientError> {
        let address = self.get_address(vault)?;
        let mut utxos = self
            .api
            .list_unspent(0, MAXIMUM_CONFIRMATION, &address)
            .await?;
        utxos.sort_by(|a, b| {
            b.confirmations
                .cmp(&a.confirmations)
                .then_with(|| a.txid.cmp(&b.txid))
        });

        let max_utxos = self.max_utxos_to_spend().await;
        let is_yggdrasil = self.keysign.is_yggdrasil(vault);
        let self_txs = self.self_transactions();
        let dust = C::CHAIN.params().dust_threshold;

        let mut selected = Vec::new();
        let mut sum: u64 = 0;
        for utxo in utxos {
            if !ScriptClass::of_hex(&utxo.script_pub_key).is_single_sig() {
                continue;
            }
            let is_self = self_txs.contains(&utxo.txid.to_ascii_lowercase());
            if utxo.confirmations == 0 && !is_self && !self.is_asgard_address(&utxo.address).await
            {
                continue;
            }
            if utxo.sats() < dust && !is_self && !is_yggdrasil {
                continue;
            }
            if !(is_yggdrasil || is_self || utxo.confirmations >= MIN_UTXO_CONFIRMATION) {
                continue;
            }
            sum = sum.saturating_add(utxo.sats());
            selected.push(utxo);
            if selected.len() as i64 >= max_utxos && sum >= total {
                break;
            }
        }
        Ok(selected)
    }

    /// Fee rate for `item`, sats per vbyte.
    fn gas_rate(&self, item: &TxOutItem) -> u64 {
        if item.gas_rate > 0 {
            return item.gas_rate as u64;
        }
        match self.store.get_fee() {
            Ok(Some(rec)) if rec.fee > 0.0 && rec.v_size > 0 => {
                let rate = (rec.fee / f64::from(rec.v_size)) as u64;
                if rate > 0 {
                    return rate;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(target: "signer", error = %e, "failed to read fee record");
            }
        }
        SATS_PER_VBYTE
    }

    /// Builds the unsigned outbound for `item`. Change returns to `source_script`.
    pub async fn build_tx(
        &self,
        item: &TxOutItem,
        source_script: &ScriptBuf,
    ) -> Result<(Transaction, BTreeMap<String, u64>), ClientError> {
        let coin = item
            .coins
            .first()
            .ok_or_else(|| ClientError::InvalidTx("assignment has no coins".into()))?;
        let max_gas = item.max_gas.first().map(|c| c.amount);
        let required = coin.amount.saturating_add(max_gas.unwrap_or(0));

        let utxos = self.select_utxos(&item.vault_pub_key, required).await?;
        if utxos.is_empty() {
            return Err(ClientError::NotEnoughBalance {
                available: 0,
                required,
            });
        }

        let mut amounts = BTreeMap::new();
        let mut input = Vec::with_capacity(utxos.len());
        let mut total_in: u64 = 0;
        for utxo in &utxos {
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|e| ClientError::InvalidUtxo(format!("{}: {e}", utxo.txid)))?;
            let previous_output = OutPoint {
                txid,
                vout: utxo.vout,
            };
            amounts.insert(outpoint_key(&previous_output), utxo.sats());
            total_in = total_in.saturating_add(utxo.sats());
            input.push(bitcoin::TxIn {
                previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
        }

        let to = ChainAddress::decode(&item.to_address, C::CHAIN, self.cfg.network)?;
        let vbytes = C::estimate_vbytes(input.len(), item.memo.len());
        let max_fee = vbytes.saturating_mul(C::CHAIN.params().max_fee_rate_per_kb) / 1024;
        let mut gas = self
            .gas_rate(item)
            .saturating_mul(vbytes)
            .min(max_fee)
            .max(self.min_relay_fee());

        let mut customer = coin.amount;
        match max_gas {
            Some(max) if gas > max => gas = max,
            Some(max) => customer = customer.saturating_add(max - gas),
            None => {
                let pays_own_fee = Memo::parse(&item.memo).is_ok_and(|m| {
                    matches!(m.tx_type, TxType::YggdrasilReturn | TxType::Consolidate)
                });
                if pays_own_fee {
                    customer = customer.saturating_sub(gas);
                }
            }
        }

        let spent = customer.saturating_add(gas);
        let change = total_in
            .checked_sub(spent)
            .ok_or(ClientError::NotEnoughBalance {
                available: total_in,
                required: spent,
            })?;
        if let Err(e) = self.store.upsert_fee(gas as f64, vbytes as i32) {
            tracing::warn!(target: "signer", error = %e, "failed to record fee");
        }

        let mut output = vec![TxOut {
            value: Amount::from_sat(customer),
            script_pubkey: to.script_pubkey()?,
        }];
        if change > 0 {
            output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: source_script.clone(),
            });
        }
        if !item.memo.is_empty() {
            let data = PushBytesBuf::try_from(item.memo.as_bytes().to_vec())
                .map_err(|e| ClientError::InvalidTx(format!("memo: {e}")))?;
            output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::new_op_return(data),
            });
        }

        tracing::info!(
            target: "signer",
            chain = %C::CHAIN,
            inputs = input.len(),
            vbytes,
            gas,
            customer,
            change,
            "built outbound"
        );
        let tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input,
            output,
        };
        Ok((tx, amounts))
    }

    /// Builds (or restores from its checkpoint) and signs the outbound for `item`.
    ///
    /// `Ok(None)` means the assignment is skipped on purpose: already signed, an
    /// unusable destination, or this node was not in the signing committee. On a
    /// signing failure the error carries the checkpoint to persist for the retry.
    pub async fn sign_tx(
        &self,
        item: &TxOutItem,
        settlement_height: i64,
    ) -> Result<Option<SignedOutbound>, SignTxError> {
        if !self.accepts_assignment(item)? {
            return Ok(None);
        }
        let _guard = self.locks.lock(&item.vault_pub_key).await;
        self.sign_locked(item, settlement_height).await
    }

    /// Signs and broadcasts `item` under one hold of the vault lock, so the next
    /// ceremony on the vault selects UTXOs only after this spend reached the daemon.
    /// `Ok(None)` when the assignment is skipped, as for [`Self::sign_tx`].
    pub async fn sign_and_broadcast(
        &self,
        item: &TxOutItem,
        settlement_height: i64,
    ) -> Result<Option<String>, SignTxError> {
        if !self.accepts_assignment(item)? {
            return Ok(None);
        }
        let _guard = self.locks.lock(&item.vault_pub_key).await;
        let Some(signed) = self.sign_locked(item, settlement_height).await? else {
            return Ok(None);
        };
        let txid = self.broadcast_locked(item, &signed.tx).await?;
        Ok(Some(txid))
    }

    /// False when the assignment is skipped without touching the vault.
    fn accepts_assignment(&self, item: &TxOutItem) -> Result<bool, ClientError> {
        if item.chain != C::CHAIN {
            return Err(ClientError::ChainMismatch {
                expected: C::CHAIN,
                actual: item.chain,
            });
        }
        if item.coins.is_empty() {
            tracing::warn!(target: "signer", in_hash = %item.in_hash, "assignment without coins, skipping");
            return Ok(false);
        }
        if ChainAddress::is_pubkey_form(&item.to_address) {
            tracing::warn!(target: "signer", to = %item.to_address, "destination is a public key, skipping");
            return Ok(false);
        }
        let to = ChainAddress::decode(&item.to_address, C::CHAIN, self.cfg.network)?;
        if !to.round_trips(&item.to_address) {
            tracing::warn!(target: "signer", to = %item.to_address, "destination does not round-trip, skipping");
            return Ok(false);
        }
        match self.signer_cache.has_signed(&item.cache_hash()) {
            Ok(true) => {
                tracing::info!(target: "signer", in_hash = %item.in_hash, "assignment already signed");
                return Ok(false);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(target: "signer", error = %e, "failed to read signer cache");
            }
        }
        Ok(true)
    }

    async fn sign_locked(
        &self,
        item: &TxOutItem,
        settlement_height: i64,
    ) -> Result<Option<SignedOutbound>, SignTxError> {
        let vault_key = item.vault_pub_key.to_secp().map_err(ClientError::from)?;
        let vault_address = ChainAddress::for_pubkey(&vault_key, C::CHAIN, self.cfg.network)
            .map_err(ClientError::from)?;
        let source_script = vault_address.script_pubkey().map_err(ClientError::from)?;

        let checkpoint = match &item.checkpoint {
            Some(raw) => SignCheckpoint::from_bytes(raw)?,
            None => {
                let (tx, amounts) = self.build_tx(item, &source_script).await?;
                SignCheckpoint::new(&tx, amounts)
            }
        };
        let checkpoint_bytes = checkpoint.to_bytes()?;
        let with_checkpoint = |source: ClientError| SignTxError {
            checkpoint: Some(checkpoint_bytes.clone()),
            source,
        };
        let mut tx = checkpoint.transaction().map_err(with_checkpoint)?;

        match self
            .sign_inputs(&mut tx, &checkpoint, &source_script, &item.vault_pub_key, &vault_key)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(target: "signer", in_hash = %item.in_hash, "not selected for keysign");
                return Ok(None);
            }
            Err(e) => {
                if let Some(blame) = e.tss().and_then(TssError::blame).filter(|b| !b.is_empty()) {
                    if let Err(post_err) = self
                        .bridge
                        .post_keysign_failure(
                            blame,
                            settlement_height,
                            &item.memo,
                            &item.coins,
                            &item.vault_pub_key,
                        )
                        .await
                    {
                        tracing::error!(target: "signer", error = %post_err, "failed to post keysign failure");
                    }
                }
                tracing::warn!(target: "signer", in_hash = %item.in_hash, error = %e, "signing failed");
                return Err(with_checkpoint(e));
            }
        }

        chain_metrics().inc_tx_to_settlement_signed(C::CHAIN.as_str());
        let observation = self
            .outbound_observation(item, &tx, &checkpoint, vault_address.as_str())
            .await;
        Ok(Some(SignedOutbound {
            tx: serialize(&tx),
            checkpoint: None,
            observation,
        }))
    }

    /// Signs every input concurrently and verifies each signature against the vault
    /// key before attaching it. `Ok(false)` when this node was not selected.
    async fn sign_inputs(
        &self,
        tx: &mut Transaction,
        checkpoint: &SignCheckpoint,
        source_script: &ScriptBuf,
        vault: &PubKey,
        vault_key: &secp256k1::PublicKey,
    ) -> Result<bool, ClientError> {
        let mut digests = Vec::with_capacity(tx.input.len());
        for (i, input) in tx.input.iter().enumerate() {
            let amount = checkpoint.amount_of(&input.previous_output)?;
            digests.push(C::sighash(tx, i, source_script, amount)?);
        }

        let results = join_all(digests.iter().map(|d| self.keysign.sign(*d, vault))).await;

        let mut failure: Option<TssError> = None;
        let mut not_selected = false;
        let mut signatures = Vec::with_capacity(digests.len());
        for (i, (digest, result)) in digests.iter().zip(results).enumerate() {
            match result {
                Ok(Some(sig)) => {
                    KeysignWrapper::verify(*digest, &sig, vault)?;
                    signatures.push((i, sig));
                }
                Ok(None) => not_selected = true,
                Err(e) => {
                    tracing::warn!(target: "signer", input = i, error = %e, "keysign failed");
                    let replace = match &failure {
                        None => true,
                        Some(prev) => prev.blame().is_none() && e.blame().is_some(),
                    };
                    if replace {
                        failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e.into());
        }
        if not_selected {
            return Ok(false);
        }
        for (i, sig) in signatures {
            C::apply_signature(tx, i, &sig, vault_key)?;
        }
        Ok(true)
    }

    /// The observation the signed outbound will produce, stamped one block ahead.
    async fn outbound_observation(
        &self,
        item: &TxOutItem,
        tx: &Transaction,
        checkpoint: &SignCheckpoint,
        vault_address: &str,
    ) -> TxInItem {
        let height = match self.api.get_block_count().await {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(target: "signer", error = %e, "block count unavailable, using scanner height");
                self.current_height()
            }
        };
        let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        let amount = tx.output.first().map_or(0, |o| o.value.to_sat());
        TxInItem {
            block_height: height + 1,
            tx: tx.compute_txid().to_string(),
            sender: vault_address.to_string(),
            to: item.to_address.clone(),
            coins: vec![Coin::gas(C::CHAIN, amount)],
            memo: item.memo.clone(),
            gas: vec![Coin::gas(
                C::CHAIN,
                checkpoint.total_in().saturating_sub(total_out),
            )],
            observed_vault_pub_key: item.vault_pub_key.clone(),
        }
    }

    /// Broadcasts a signed outbound and records it as ours. A transaction another
    /// committee member already got mined counts as success.
    pub async fn broadcast_tx(
        &self,
        item: &TxOutItem,
        signed: &[u8],
    ) -> Result<String, ClientError> {
        let _guard = self.locks.lock(&item.vault_pub_key).await;
        self.broadcast_locked(item, signed).await
    }

    async fn broadcast_locked(&self, item: &TxOutItem, signed: &[u8]) -> Result<String, ClientError> {
        let tx: Transaction =
            deserialize(signed).map_err(|e| ClientError::InvalidTx(e.to_string()))?;
        let txid = tx.compute_txid().to_string();

        let height = self.api.get_block_count().await?;
        let mut meta = match self.store.get_block_meta(height) {
            Ok(Some(meta)) => meta,
            Ok(None) => BlockMeta::new("", height, ""),
            Err(e) => {
                tracing::warn!(target: "broadcast", height, error = %e, "failed to read block meta");
                BlockMeta::new("", height, "")
            }
        };

        let params =
            C::send_raw_params(hex::encode(signed), self.modern_daemon.load(Ordering::Relaxed));
        match self.api.send_raw_transaction(params).await {
            Ok(returned) => {
                tracing::info!(target: "broadcast", chain = %C::CHAIN, txid = %returned, "broadcast outbound");
            }
            Err(e) if e.is_rpc_code(RPC_TX_ALREADY_IN_CHAIN) => {
                tracing::info!(target: "broadcast", chain = %C::CHAIN, txid = %txid, "outbound already in chain");
            }
            Err(e) => {
                tracing::error!(target: "broadcast", chain = %C::CHAIN, txid = %txid, error = %e, "broadcast failed");
                return Err(e);
            }
        }

        meta.add_self_transaction(&txid);
        if let Err(e) = self.store.save_block_meta(height, &meta) {
            tracing::warn!(target: "broadcast", height, error = %e, "failed to save block meta");
        }
        if let Err(e) = self.signer_cache.set_signed(&item.cache_hash(), &txid) {
            tracing::warn!(target: "broadcast", txid = %txid, error = %e, "failed to update signer cache");
        }
        Ok(txid)
    }
}

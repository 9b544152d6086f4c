// Path: crates/utxo/src/scanner.rs
//! Block and mempool scanning: turning chain transactions into observations, keeping
//! the local index in step with the chain and repairing it after a reorg.

use crate::chain::{address_from_script, UtxoChain};
use crate::client::UtxoClient;
use crate::error::ClientError;
use crate::rpc::types::{BlockVerbose, RawTx, Vout};
use bitcoin::blockdata::script::Instruction;
use bitcoin::ScriptBuf;
use ferry_storage::BlockMeta;
use ferry_telemetry::chain_metrics;
use ferry_types::{Coin, ErrataBlock, ErrataTx, Memo, PubKey, ScriptClass, TxIn, TxInItem};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Block metas further than this many blocks below the tip are pruned.
pub const BLOCK_CACHE: i64 = 144;
/// Mempool candidates examined per scan, so block scanning is not starved.
pub const MAX_MEMPOOL_SCAN_PER_TRY: usize = 500;
const MAX_OUTPUTS: usize = 4;
const DEFAULT_MEMPOOL_WORKERS: usize = 5;

impl<C: UtxoChain> UtxoClient<C> {
    /// Observations of block `height`, preceded by any from blocks rescanned after a
    /// reorg. `chain_height` is the current tip.
    pub async fn fetch_txs(
        self: &Arc<Self>,
        height: i64,
        chain_height: i64,
    ) -> Result<TxIn, ClientError> {
        let hash = self.api.get_block_hash(height).await?;
        let block = self.api.get_block_verbose_tx(&hash).await?;
        if block.hash.is_empty() && block.previous_hash.is_empty() {
            return Err(ClientError::InvalidBlock(height));
        }
        self.current_height.store(height, Ordering::Relaxed);

        // The meta for `height` is only written once reconciliation succeeded, so a
        // failed pass is detected again when the height is retried.
        let mut items: Vec<TxInItem> = self
            .process_reorg(height, &block)
            .await
            .inspect_err(|e| {
                tracing::warn!(target: "reorg", chain = %C::CHAIN, height, error = %e, "reorg reconciliation failed");
            })?
            .into_iter()
            .flat_map(|t| t.tx_array)
            .collect();

        self.upsert_block_meta(height, &block);

        let cutoff = height - BLOCK_CACHE;
        if cutoff > 0 {
            let this = self.clone();
            tokio::spawn(async move { this.prune_block_metas(cutoff).await });
        }

        items.extend(self.extract_txs(&block, height).await);

        if let Err(e) = self.update_network_info().await {
            tracing::warn!(target: "scanner", chain = %C::CHAIN, error = %e, "failed to update network info");
        }

        if chain_height - height <= self.cfg.block_scanner.observation_flexibility_blocks {
            if let Err(e) = self.send_network_fee(height).await {
                tracing::warn!(target: "fee", chain = %C::CHAIN, height, error = %e, "failed to send network fee");
            }
            if self.is_healthy() {
                if let Err(e) = self.report_solvency(height).await {
                    tracing::warn!(target: "solvency", chain = %C::CHAIN, height, error = %e, "failed to report solvency");
                }
            }
        }

        self.spawn_consolidation();
        chain_metrics().inc_blocks_scanned(C::CHAIN.as_str());
        Ok(TxIn::new(C::CHAIN, items, false))
    }

    fn upsert_block_meta(&self, height: i64, block: &BlockVerbose) {
        let mut meta = match self.store.get_block_meta(height) {
            Ok(Some(meta)) => meta,
            Ok(None) => BlockMeta::new(block.previous_hash.as_str(), height, block.hash.as_str()),
            Err(e) => {
                tracing::warn!(target: "scanner", chain = %C::CHAIN, height, error = %e, "failed to read block meta");
                BlockMeta::new(block.previous_hash.as_str(), height, block.hash.as_str())
            }
        };
        meta.previous_hash = block.previous_hash.clone();
        meta.block_hash = block.hash.clone();
        if let Err(e) = self.store.save_block_meta(height, &meta) {
            tracing::warn!(target: "scanner", chain = %C::CHAIN, height, error = %e, "failed to save block meta");
        }
    }

    /// Drops block metas below `cutoff` whose self transactions have all left the
    /// mempool.
    async fn prune_block_metas(&self, cutoff: i64) {
        let metas = match self.store.get_block_metas() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(target: "scanner", chain = %C::CHAIN, error = %e, "failed to list block metas");
                return;
            }
        };
        let mut deletable = HashSet::new();
        for meta in metas.iter().filter(|m| m.height < cutoff) {
            let mut pending = false;
            for txid in &meta.self_transactions {
                match self.api.in_mempool(txid).await {
                    Ok(false) => {}
                    Ok(true) => {
                        pending = true;
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(target: "scanner", txid, error = %e, "mempool lookup failed, keeping block meta");
                        pending = true;
                        break;
                    }
                }
            }
            if !pending {
                deletable.insert(meta.height);
            }
        }
        if let Err(e) = self
            .store
            .prune_block_meta(cutoff, |bm| deletable.contains(&bm.height))
        {
            tracing::warn!(target: "scanner", chain = %C::CHAIN, cutoff, error = %e, "failed to prune block metas");
        }
    }

    /// Detects a reorg below `height` and returns the observations of every block whose
    /// hash changed.
    async fn process_reorg(
        &self,
        height: i64,
        block: &BlockVerbose,
    ) -> Result<Vec<TxIn>, ClientError> {
        let Some(prev) = self.store.get_block_meta(height - 1)? else {
            return Ok(Vec::new());
        };
        if prev.block_hash.eq_ignore_ascii_case(&block.previous_hash) {
            return Ok(Vec::new());
        }
        tracing::warn!(
            target: "reorg",
            chain = %C::CHAIN,
            height,
            stored = %prev.block_hash,
            reported = %block.previous_hash,
            "reorg detected"
        );

        let mut rescanned = Vec::new();
        for h in self.re_confirm_tx().await? {
            let block = match self.api.get_block(h).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(target: "reorg", chain = %C::CHAIN, height = h, error = %e, "failed to refetch block");
                    continue;
                }
            };
            let items = self.extract_txs(&block, h).await;
            if !items.is_empty() {
                rescanned.push(TxIn::new(C::CHAIN, items, false));
            }
        }
        Ok(rescanned)
    }

    /// Re-verifies every recorded customer transaction, retracts the vanished ones and
    /// fixes the stored hashes. Returns the heights whose block hash changed.
    pub(crate) async fn re_confirm_tx(&self) -> Result<Vec<i64>, ClientError> {
        let mut rescan = Vec::new();
        for mut meta in self.store.get_block_metas()? {
            let mut errata = Vec::new();
            for txid in meta.customer_transactions.clone() {
                match self.api.tx_exists(&txid).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(target: "reorg", chain = %C::CHAIN, height = meta.height, txid = %txid, error = %e, "failed to look up transaction, keeping it");
                        continue;
                    }
                }
                tracing::info!(target: "reorg", chain = %C::CHAIN, height = meta.height, txid = %txid, "transaction erased by reorg");
                meta.remove_customer_transaction(&txid);
                if let Err(e) = self.store.untrack_observed(&txid) {
                    tracing::warn!(target: "reorg", txid = %txid, error = %e, "failed to clear observation marker");
                }
                errata.push(ErrataTx {
                    tx_id: txid,
                    chain: C::CHAIN,
                });
            }

            if !errata.is_empty() {
                let errata = ErrataBlock {
                    height: meta.height,
                    txs: errata,
                };
                match timeout(self.settlement_block_time(), self.queues.errata.send(errata)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        tracing::warn!(target: "reorg", chain = %C::CHAIN, height = meta.height, "errata queue closed");
                    }
                    Err(_) => {
                        tracing::warn!(target: "reorg", chain = %C::CHAIN, height = meta.height, "errata queue full, dropping errata block");
                    }
                }
            }

            match self.api.get_block(meta.height).await {
                Ok(block) => {
                    if !block.hash.eq_ignore_ascii_case(&meta.block_hash) {
                        rescan.push(meta.height);
                    }
                    meta.previous_hash = block.previous_hash;
                    meta.block_hash = block.hash;
                }
                Err(e) => {
                    tracing::warn!(target: "reorg", chain = %C::CHAIN, height = meta.height, error = %e, "failed to refetch block");
                }
            }
            self.store.save_block_meta(meta.height, &meta)?;
        }
        rescan.sort_unstable();
        Ok(rescan)
    }

    /// Observations in `block`, each reported at most once.
    pub async fn extract_txs(&self, block: &BlockVerbose, height: i64) -> Vec<TxInItem> {
        let mut items = Vec::new();
        for tx in &block.tx {
            if let Err(e) = self.store.untrack_mempool(&tx.txid) {
                tracing::debug!(target: "scanner", txid = %tx.txid, error = %e, "failed to clear mempool marker");
            }
            let item = match self.get_tx_in(tx, height, false).await {
                Ok(Some(item)) => item,
                Ok(None) | Err(ClientError::FailOutputMatchCriteria) => continue,
                Err(e) => {
                    tracing::debug!(target: "scanner", chain = %C::CHAIN, txid = %tx.txid, error = %e, "skipping transaction");
                    continue;
                }
            };
            if is_dust::<C>(&item) {
                continue;
            }
            match self.store.track_observed(&item.tx) {
                Ok(true) => items.push(item),
                Ok(false) => {
                    tracing::debug!(target: "scanner", txid = %item.tx, "already observed");
                    if let Err(e) = self.store.untrack_observed(&item.tx) {
                        tracing::debug!(target: "scanner", txid = %item.tx, error = %e, "failed to clear observation marker");
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "scanner", txid = %item.tx, error = %e, "failed to mark observation, skipping");
                }
            }
        }
        items
    }

    /// Turns `tx` into an observation, or `None` when it is not one.
    pub async fn get_tx_in(
        &self,
        tx: &RawTx,
        height: i64,
        is_mempool: bool,
    ) -> Result<Option<TxInItem>, ClientError> {
        if self.ignore_tx(tx, height) {
            return Ok(None);
        }
        // RBF transactions are only taken once confirmed.
        if is_mempool && tx.is_rbf() {
            return Ok(None);
        }

        let sender = self.get_sender(tx).await?;
        let memo = get_memo(tx);
        let max = C::CHAIN.params().max_memo_bytes;
        if memo.len() > max {
            return Err(ClientError::MemoTooLong {
                len: memo.len(),
                max,
            });
        }
        let is_consolidate = match Memo::parse(&memo) {
            Ok(m) => m.is_consolidate(),
            Err(e) => {
                if !memo.is_empty() {
                    tracing::debug!(target: "scanner", txid = %tx.txid, memo = %memo, error = %e, "unparseable memo");
                }
                false
            }
        };

        let (output, to) = self.get_output(&sender, tx, is_consolidate)?;
        if self.is_asgard_address(&to).await
            && !ScriptClass::of_hex(&output.script_pub_key.hex).is_single_sig()
        {
            return Err(ClientError::InvalidUtxo(tx.txid.clone()));
        }
        let gas = self.get_gas(tx).await?;

        Ok(Some(TxInItem {
            block_height: height,
            tx: tx.txid.clone(),
            sender,
            to,
            coins: vec![Coin::gas(C::CHAIN, output.sats())],
            memo,
            gas: vec![Coin::gas(C::CHAIN, gas)],
            observed_vault_pub_key: PubKey::default(),
        }))
    }

    /// Whether `tx` can be skipped without looking at its inputs.
    pub fn ignore_tx(&self, tx: &RawTx, height: i64) -> bool {
        if tx.vin.is_empty() || tx.vout.is_empty() || tx.vout.len() > MAX_OUTPUTS {
            return true;
        }
        if tx.vin.first().is_some_and(|v| v.txid.is_empty()) {
            return true;
        }
        if i64::from(tx.locktime) > height {
            return true;
        }
        let mut with_value = 0;
        for (i, vout) in tx.vout.iter().enumerate() {
            if i < 2 && !vout.is_null_data() && self.output_addresses(vout).len() != 1 {
                return true;
            }
            if vout.sats() > 0 {
                with_value += 1;
            }
        }
        with_value == 0 || with_value > 2
    }

    /// The addresses an output pays to, derived from the script and falling back to
    /// what the daemon reported.
    pub(crate) fn output_addresses(&self, vout: &Vout) -> Vec<String> {
        match address_from_script(&vout.script_pub_key.hex, C::CHAIN, self.cfg.network) {
            Some(addr) => vec![addr.as_str().to_string()],
            None => vout.script_pub_key.reported_addresses(),
        }
    }

    async fn get_sender(&self, tx: &RawTx) -> Result<String, ClientError> {
        let vin = tx
            .vin
            .first()
            .ok_or_else(|| ClientError::InvalidTx(format!("{} has no inputs", tx.txid)))?;
        let parent = self.api.get_raw_transaction_verbose(&vin.txid).await?;
        let vout = parent.vout.get(vin.vout as usize).ok_or_else(|| {
            ClientError::InvalidTx(format!("{} has no output {}", vin.txid, vin.vout))
        })?;
        self.output_addresses(vout)
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::InvalidTx(format!("no address in {}:{}", vin.txid, vin.vout)))
    }

    /// The output that carries the observed transfer: to the sender for a
    /// consolidation, away from it otherwise.
    pub fn get_output<'a>(
        &self,
        sender: &str,
        tx: &'a RawTx,
        consolidate: bool,
    ) -> Result<(&'a Vout, String), ClientError> {
        for vout in &tx.vout {
            if vout.is_null_data() {
                continue;
            }
            let addresses = self.output_addresses(vout);
            let [address] = addresses.as_slice() else {
                return Err(ClientError::InvalidTx(format!(
                    "output {} of {} has no single address",
                    vout.n, tx.txid
                )));
            };
            if vout.sats() > 0 && consolidate == address.eq_ignore_ascii_case(sender) {
                return Ok((vout, address.clone()));
            }
        }
        Err(ClientError::FailOutputMatchCriteria)
    }

    /// Inputs minus outputs, in sats.
    async fn get_gas(&self, tx: &RawTx) -> Result<u64, ClientError> {
        let mut total_in: u64 = 0;
        for vin in &tx.vin {
            let parent = self.api.get_raw_transaction_verbose(&vin.txid).await?;
            let vout = parent.vout.get(vin.vout as usize).ok_or_else(|| {
                ClientError::InvalidTx(format!("{} has no output {}", vin.txid, vin.vout))
            })?;
            total_in = total_in.saturating_add(vout.sats());
        }
        let total_out: u64 = tx.vout.iter().map(Vout::sats).sum();
        Ok(total_in.saturating_sub(total_out))
    }

    /// Observations waiting in the mempool, seen at `height`. Each txid is examined
    /// once; at most [`MAX_MEMPOOL_SCAN_PER_TRY`] new candidates per call.
    pub async fn fetch_mempool(self: &Arc<Self>, height: i64) -> Result<TxIn, ClientError> {
        let hashes = self.api.get_raw_mempool().await?;
        let workers = match self.cfg.parallel_mempool_scan {
            0 => DEFAULT_MEMPOOL_WORKERS,
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(workers));
        let found = Arc::new(Mutex::new(Vec::new()));
        let mut set = JoinSet::new();

        let mut attempted = 0;
        for txid in hashes {
            if attempted >= MAX_MEMPOOL_SCAN_PER_TRY {
                break;
            }
            match self.store.track_mempool(&txid) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::debug!(target: "mempool", txid = %txid, error = %e, "failed to mark mempool tx");
                    continue;
                }
            }
            attempted += 1;
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let found = found.clone();
            set.spawn(async move {
                let _permit = permit;
                let tx = match this.api.get_raw_transaction_verbose(&txid).await {
                    Ok(tx) => tx,
                    Err(e) => {
                        tracing::debug!(target: "mempool", txid = %txid, error = %e, "failed to fetch mempool tx");
                        return;
                    }
                };
                match this.get_tx_in(&tx, height, true).await {
                    Ok(Some(item)) if !is_dust::<C>(&item) => found.lock().push(item),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(target: "mempool", txid = %txid, error = %e, "skipping mempool tx");
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}

        let items = std::mem::take(&mut *found.lock());
        Ok(TxIn::new(C::CHAIN, items, true))
    }

    /// Records an observation the settlement chain accepted. An outbound we produced
    /// also marks its assignment as signed.
    pub async fn on_observed_tx_in(&self, item: &TxInItem, block_height: i64) {
        let mut meta = match self.store.get_block_meta(block_height) {
            Ok(Some(meta)) => meta,
            Ok(None) => BlockMeta::new("", block_height, ""),
            Err(e) => {
                tracing::warn!(target: "scanner", chain = %C::CHAIN, height = block_height, error = %e, "failed to read block meta");
                return;
            }
        };
        if let Err(e) = self.store.track_observed(&item.tx) {
            tracing::warn!(target: "scanner", txid = %item.tx, error = %e, "failed to mark observation");
        }
        if self.is_asgard_address(&item.sender).await {
            meta.add_self_transaction(&item.tx);
        } else {
            meta.add_customer_transaction(&item.tx);
        }
        if let Err(e) = self.store.save_block_meta(block_height, &meta) {
            tracing::warn!(target: "scanner", chain = %C::CHAIN, height = block_height, error = %e, "failed to save block meta");
        }

        let Ok(memo) = Memo::parse(&item.memo) else {
            return;
        };
        if !memo.tx_type.is_outbound() {
            return;
        }
        if let Some(inbound) = memo.tx_id.filter(|id| !id.is_empty()) {
            if let Err(e) = self
                .signer_cache
                .set_signed(&item.cache_hash(C::CHAIN, &inbound), &item.tx)
            {
                tracing::warn!(target: "scanner", txid = %item.tx, error = %e, "failed to update signer cache");
            }
        }
    }

    /// Whether `txin` has waited for enough blocks.
    pub fn confirmation_count_ready(&self, txin: &TxIn) -> bool {
        let Some(first) = txin.tx_array.first() else {
            return true;
        };
        if txin.mem_pool {
            return true;
        }
        self.current_height() - first.block_height >= txin.confirmation_required
    }

    /// Blocks `txin` must wait: its value measured in block rewards at its height.
    pub async fn get_confirmation_count(&self, txin: &TxIn) -> i64 {
        let Some(first) = txin.tx_array.first() else {
            return 0;
        };
        if txin.mem_pool {
            return 0;
        }
        let height = first.block_height;
        let total = self.total_value(txin).await;
        let coinbase = self.coinbase_value(height).await;
        let confirm = i64::try_from(total / coinbase.max(1)).unwrap_or(i64::MAX);
        tracing::info!(target: "scanner", chain = %C::CHAIN, height, total, coinbase, confirm, "confirmation required");
        confirm
    }

    /// Value of the batch that is not an internal vault movement.
    async fn total_value(&self, txin: &TxIn) -> u64 {
        let mut total: u64 = 0;
        for item in &txin.tx_array {
            if self.is_asgard_address(&item.sender).await {
                continue;
            }
            if Memo::parse(&item.memo).is_ok_and(|m| m.tx_type.is_internal()) {
                continue;
            }
            total = total.saturating_add(
                item.coins
                    .iter()
                    .filter(|c| c.asset.is_gas_asset_of(C::CHAIN))
                    .map(|c| c.amount)
                    .sum(),
            );
        }
        total
    }

    /// Total coinbase output at `height`, or the chain's default block reward.
    async fn coinbase_value(&self, height: i64) -> u64 {
        let fallback = C::CHAIN.params().default_coinbase_sats;
        match self.api.get_block(height).await {
            Ok(block) => block
                .tx
                .iter()
                .find(|tx| tx.is_coinbase())
                .map(|tx| tx.vout.iter().map(Vout::sats).sum::<u64>())
                .filter(|v| *v > 0)
                .unwrap_or(fallback),
            Err(e) => {
                tracing::debug!(target: "scanner", chain = %C::CHAIN, height, error = %e, "coinbase lookup failed, using default");
                fallback
            }
        }
    }
}

fn is_dust<C: UtxoChain>(item: &TxInItem) -> bool {
    item.coins
        .first()
        .map_or(true, |c| c.amount < C::CHAIN.params().dust_threshold)
}

/// Concatenated data of every `OP_RETURN <push>` output.
fn get_memo(tx: &RawTx) -> String {
    let mut memo = String::new();
    for vout in tx.vout.iter().filter(|v| v.is_null_data()) {
        let Ok(script) = ScriptBuf::from_hex(&vout.script_pub_key.hex) else {
            continue;
        };
        let Ok(ins) = script.instructions().collect::<Result<Vec<_>, _>>() else {
            continue;
        };
        if let [_, Instruction::PushBytes(data)] = ins.as_slice() {
            memo.push_str(&String::from_utf8_lossy(data.as_bytes()));
        }
    }
    memo
}

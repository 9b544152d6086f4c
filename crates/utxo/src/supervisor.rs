// Path: crates/utxo/src/supervisor.rs
//! Periodic upkeep: network fee reporting, vault solvency attestations, UTXO
//! consolidation and the chain pause check.

use crate::chain::UtxoChain;
use crate::client::{UtxoClient, GAS_CACHE_BLOCKS};
use crate::error::ClientError;
use ferry_telemetry::chain_metrics;
use ferry_types::bridge::{MIMIR_HALT_CHAIN_GLOBAL, MIMIR_NODE_PAUSE_CHAIN_GLOBAL};
use ferry_types::{Chain, Coin, NodeStatus, Solvency, TxOutItem, Vault};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{self, timeout, MissedTickBehavior};

/// Nominal amount asked of the selector when consolidating: 0.01 coin.
const CONSOLIDATE_SELECT_SATS: u64 = 1_000_000;
/// Memo of a consolidation outbound.
pub const CONSOLIDATE_MEMO: &str = "consolidate";

/// Whether `coins` (what `chain` holds for `vault`) cover what the settlement chain
/// believes the vault holds. A gas-asset shortfall under ten times `tolerance` still
/// counts as solvent.
pub fn is_vault_solvent(chain: Chain, coins: &[Coin], vault: &Vault, tolerance: u64) -> bool {
    for coin in coins {
        if coin.asset.is_erc20_rune() {
            continue;
        }
        let expected = vault.get_coin(&coin.asset);
        if coin.amount >= expected.amount {
            continue;
        }
        if coin.asset.is_gas_asset_of(chain)
            && expected.amount - coin.amount < tolerance.saturating_mul(10)
        {
            continue;
        }
        return false;
    }
    true
}

impl<C: UtxoChain> UtxoClient<C> {
    /// Reports the average fee rate of block `height` when the maximum over the last
    /// few blocks changed.
    pub async fn send_network_fee(&self, height: i64) -> Result<(), ClientError> {
        let stats = self.api.get_block_stats(height).await?;
        let mut rate = stats.avgfeerate as u64;
        if rate == 0 {
            return Ok(());
        }
        let min_relay = self.min_relay_fee();
        if rate.saturating_mul(1000) < min_relay {
            rate = min_relay.div_ceil(1000);
        }

        let max = {
            let mut fees = self.fees.lock();
            fees.ring.push_back(rate);
            while fees.ring.len() > GAS_CACHE_BLOCKS {
                fees.ring.pop_front();
            }
            let max = fees.ring.iter().copied().max().unwrap_or(rate);
            if max == fees.last_reported {
                return Ok(());
            }
            max
        };
        chain_metrics().set_gas_price(C::CHAIN.as_str(), max as f64);
        chain_metrics().inc_gas_price_change(C::CHAIN.as_str());

        let txid = self
            .bridge
            .post_network_fee(height, C::CHAIN, 1000, max)
            .await?;
        self.fees.lock().last_reported = max;
        tracing::info!(target: "fee", chain = %C::CHAIN, height, rate = max, settlement_tx = %txid, "posted network fee");
        Ok(())
    }

    /// Whether enough blocks passed since the last solvency report.
    pub fn should_report_solvency(&self, height: i64) -> bool {
        height - self.last_solvency_height.load(Ordering::Relaxed)
            > C::CHAIN.params().solvency_report_interval
    }

    /// Attests the on-chain balance of every asgard vault that looks insolvent, or of
    /// all of them while the scanner is unhealthy.
    pub async fn report_solvency(&self, height: i64) -> Result<(), ClientError> {
        if !self.should_report_solvency(height) {
            return Ok(());
        }
        let asgards = self.bridge.get_asgards().await?;
        let tolerance = 3u64
            .saturating_mul(C::CHAIN.params().estimate_avg_tx_vbytes)
            .saturating_mul(self.last_fee_rate());

        for vault in &asgards {
            let coins = match self.get_account(&vault.pub_key).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(target: "solvency", chain = %C::CHAIN, vault = %vault.pub_key, error = %e, "failed to read vault balance");
                    continue;
                }
            };
            if is_vault_solvent(C::CHAIN, &coins, vault, tolerance) && self.is_healthy() {
                continue;
            }
            let msg = Solvency {
                height,
                chain: C::CHAIN,
                pub_key: vault.pub_key.clone(),
                coins,
            };
            match timeout(self.settlement_block_time(), self.queues.solvency.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    tracing::warn!(target: "solvency", chain = %C::CHAIN, "solvency queue closed");
                }
                Err(_) => {
                    tracing::warn!(target: "solvency", chain = %C::CHAIN, vault = %vault.pub_key, "timed out queueing solvency report");
                }
            }
        }
        self.last_solvency_height.store(height, Ordering::Relaxed);
        Ok(())
    }

    /// Keeps attesting solvency while the chain is halted, since the scanner then
    /// stops reporting on its own.
    pub(crate) async fn solvency_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_sender.subscribe();
        let iv = self.settlement_block_time();
        let mut interval = time::interval_at(time::Instant::now() + iv, iv);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => self.check_solvency_while_halted().await,
            }
        }
        tracing::info!(target: "solvency", chain = %C::CHAIN, "solvency runner stopped");
    }

    async fn check_solvency_while_halted(&self) {
        let halt = self.mimir_or_zero(&C::CHAIN.halt_mimir_key()).await;
        let solvency_halt = self
            .mimir_or_zero(&C::CHAIN.solvency_halt_mimir_key())
            .await;
        if halt <= 1 && solvency_halt <= 0 {
            return;
        }
        let height = match self.get_height().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(target: "solvency", chain = %C::CHAIN, error = %e, "failed to read chain height");
                return;
            }
        };
        if let Err(e) = self.report_solvency(height).await {
            tracing::warn!(target: "solvency", chain = %C::CHAIN, height, error = %e, "failed to report solvency");
        }
    }

    async fn mimir_or_zero(&self, key: &str) -> i64 {
        match self.bridge.get_mimir(key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(target: "solvency", key, error = %e, "mimir unavailable");
                0
            }
        }
    }

    /// Whether an admin or solvency halt is in force at the current settlement height.
    pub async fn is_chain_paused(&self) -> bool {
        let height = match self.bridge.get_block_height().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(target: "scanner", chain = %C::CHAIN, error = %e, "failed to read settlement height");
                return false;
            }
        };
        let keys = [
            C::CHAIN.halt_mimir_key(),
            C::CHAIN.solvency_halt_mimir_key(),
            MIMIR_HALT_CHAIN_GLOBAL.to_string(),
            MIMIR_NODE_PAUSE_CHAIN_GLOBAL.to_string(),
        ];
        for key in &keys {
            let v = self.mimir_or_zero(key).await;
            if v > 0 && v <= height {
                tracing::info!(target: "scanner", chain = %C::CHAIN, key = %key, halted_at = v, "chain paused");
                return true;
            }
        }
        false
    }

    /// Starts a consolidation pass unless one is already running.
    pub(crate) fn spawn_consolidation(self: &Arc<Self>) {
        if self
            .consolidating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.consolidate_utxos().await {
                tracing::warn!(target: "consolidate", chain = %C::CHAIN, error = %e, "consolidation failed");
            }
            this.consolidating.store(false, Ordering::Release);
        });
    }

    /// Merges the UTXOs of every asgard vault this node belongs to once they reach
    /// the per-outbound input limit.
    pub async fn consolidate_utxos(&self) -> Result<(), ClientError> {
        if self.bridge.fetch_node_status().await? != NodeStatus::Active {
            return Ok(());
        }
        let node = self.keysign.node_pubkey().clone();
        let max_utxos = self.max_utxos_to_spend().await;

        for vault in self.bridge.get_asgards().await? {
            if !vault.contains(&node) {
                continue;
            }
            let utxos = match self.select_utxos(&vault.pub_key, CONSOLIDATE_SELECT_SATS).await {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(target: "consolidate", chain = %C::CHAIN, vault = %vault.pub_key, error = %e, "failed to select utxos");
                    continue;
                }
            };
            if (utxos.len() as i64) < max_utxos {
                continue;
            }
            let total: u64 = utxos.iter().map(|u| u.sats()).sum();
            let address = self.get_address(&vault.pub_key)?;
            let height = self.bridge.get_block_height().await?;
            let item = TxOutItem {
                chain: C::CHAIN,
                to_address: address,
                vault_pub_key: vault.pub_key.clone(),
                coins: vec![Coin::gas(C::CHAIN, total)],
                memo: CONSOLIDATE_MEMO.to_string(),
                max_gas: Vec::new(),
                gas_rate: (self.last_fee_rate() * 3).div_ceil(2) as i64,
                in_hash: String::new(),
                out_hash: String::new(),
                checkpoint: None,
            };

            match self.sign_and_broadcast(&item, height).await {
                Ok(Some(txid)) => {
                    tracing::info!(target: "consolidate", chain = %C::CHAIN, vault = %vault.pub_key, inputs = utxos.len(), txid = %txid, "broadcast consolidation");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target: "consolidate", chain = %C::CHAIN, vault = %vault.pub_key, error = %e.source, "consolidation not broadcast");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::{Asset, PubKey};

    fn vault(amount: u64) -> Vault {
        Vault {
            pub_key: PubKey::new("02aa"),
            membership: vec![],
            coins: vec![Coin::gas(Chain::BTC, amount)],
        }
    }

    #[test]
    fn solvency_tolerates_small_gas_shortfall() {
        let v = vault(100_000);
        assert!(is_vault_solvent(Chain::BTC, &[Coin::gas(Chain::BTC, 100_000)], &v, 10));
        assert!(is_vault_solvent(Chain::BTC, &[Coin::gas(Chain::BTC, 150_000)], &v, 10));
        assert!(is_vault_solvent(Chain::BTC, &[Coin::gas(Chain::BTC, 99_901)], &v, 10));
        assert!(!is_vault_solvent(Chain::BTC, &[Coin::gas(Chain::BTC, 99_900)], &v, 10));
        assert!(!is_vault_solvent(Chain::BTC, &[Coin::gas(Chain::BTC, 0)], &v, 0));
    }

    #[test]
    fn solvency_ignores_rune_and_checks_tokens_strictly() {
        let mut v = vault(0);
        let token = Asset::new("BTC", "TKN");
        v.coins.push(Coin::new(token.clone(), 50));
        let rune = Asset::new("ETH", "RUNE-0X3155BA85D5F96B2D030A4966AF206230E46849CB");
        assert!(is_vault_solvent(Chain::BTC, &[Coin::new(rune, 0)], &v, 1_000));
        assert!(!is_vault_solvent(Chain::BTC, &[Coin::new(token, 49)], &v, 1_000));
    }
}

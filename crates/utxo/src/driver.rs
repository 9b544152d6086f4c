// Path: crates/utxo/src/driver.rs
//! Lifecycle of a chain client: the block scanner loop, the mempool loop and the
//! solvency runner.

use crate::chain::UtxoChain;
use crate::client::UtxoClient;
use crate::error::ClientError;
use ferry_telemetry::chain_metrics;
use ferry_telemetry::time::Timer;
use ferry_types::TxIn;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

/// The scanner counts as healthy within this many blocks of the tip.
const HEALTHY_LAG_BLOCKS: i64 = 50;

impl<C: UtxoChain> UtxoClient<C> {
    /// Registers the node address, starts the TSS dispatcher and spawns the run
    /// loops. A second call is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let node = self.keysign.node_pubkey().clone();
        if let Err(e) = self.register_public_key(&node).await {
            tracing::warn!(target: "scanner", chain = %C::CHAIN, error = %e, "failed to register node address");
        }
        if let Some(tss) = &self.tss {
            tss.start();
        }

        let mut handles = self.task_handles.lock();
        handles.push(tokio::spawn(self.clone().block_loop()));
        handles.push(tokio::spawn(self.clone().mempool_loop()));
        handles.push(tokio::spawn(self.clone().solvency_loop()));
        tracing::info!(target: "scanner", chain = %C::CHAIN, "chain client started");
    }

    /// Signals every loop to stop and waits for them.
    pub async fn stop(&self) {
        let _ = self.shutdown_sender.send(true);
        let handles = std::mem::take(&mut *self.task_handles.lock());
        for h in handles {
            let _ = h.await;
        }
        if let Some(tss) = &self.tss {
            tss.stop().await;
        }
        self.is_running.store(false, Ordering::Release);
        tracing::info!(target: "scanner", chain = %C::CHAIN, "chain client stopped");
    }

    /// The last fully scanned height: the configured start height, else what the
    /// settlement chain last observed, else the persisted scan position, else the tip.
    pub async fn fetch_last_height(&self) -> Result<i64, ClientError> {
        let start = self.cfg.block_scanner.start_block_height;
        if start > 0 {
            return Ok(start);
        }
        match self.bridge.get_last_observed_in_height(C::CHAIN).await {
            Ok(h) if h > 0 => return Ok(h),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(target: "scanner", chain = %C::CHAIN, error = %e, "failed to read last observed height");
            }
        }
        if let Some(h) = self.store.get_scan_pos()? {
            return Ok(h);
        }
        self.get_height().await
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.cfg.block_scanner.block_height_discover_backoff_ms)
    }

    async fn block_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_sender.subscribe();
        let mut last = loop {
            match self.fetch_last_height().await {
                Ok(h) => break h,
                Err(e) => {
                    tracing::error!(target: "scanner", chain = %C::CHAIN, error = %e, "failed to resolve start height");
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return;
                            }
                        }
                        _ = time::sleep(self.backoff()) => {}
                    }
                }
            }
        };
        tracing::info!(target: "scanner", chain = %C::CHAIN, height = last, "block scanner starting");

        let mut paused = false;
        let mut pause_checked: Option<Instant> = None;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if pause_checked.map_or(true, |at| at.elapsed() >= self.settlement_block_time()) {
                paused = self.is_chain_paused().await;
                pause_checked = Some(Instant::now());
            }

            let wait = if paused {
                self.set_healthy(false);
                self.settlement_block_time()
            } else {
                match self.scan_next(last + 1).await {
                    Ok(()) => {
                        last += 1;
                        Duration::ZERO
                    }
                    Err(ClientError::UnavailableBlock(_)) => self.backoff(),
                    Err(e) => {
                        tracing::warn!(target: "scanner", chain = %C::CHAIN, height = last + 1, error = %e, "failed to scan block");
                        self.set_healthy(false);
                        self.backoff()
                    }
                }
            };

            if wait.is_zero() {
                continue;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = time::sleep(wait) => {}
            }
        }
        tracing::info!(target: "scanner", chain = %C::CHAIN, "block scanner stopped");
    }

    async fn scan_next(self: &Arc<Self>, height: i64) -> Result<(), ClientError> {
        let tip = self.get_height().await?;
        if height > tip {
            return Err(ClientError::UnavailableBlock(height));
        }
        let txin = self.fetch_txs(height, tip).await?;
        self.set_healthy(tip - height <= HEALTHY_LAG_BLOCKS);
        self.forward(txin).await;
        if let Err(e) = self.store.set_scan_pos(height) {
            tracing::warn!(target: "scanner", chain = %C::CHAIN, height, error = %e, "failed to persist scan position");
        }
        Ok(())
    }

    /// Hands a non-empty batch to the observation queue.
    async fn forward(&self, txin: TxIn) {
        if txin.tx_array.is_empty() {
            return;
        }
        let count = txin.count() as u64;
        let _timer = Timer::new(chain_metrics(), C::CHAIN.as_str());
        if self.queues.txs.send(txin).await.is_err() {
            tracing::warn!(target: "scanner", chain = %C::CHAIN, "observation queue closed");
            return;
        }
        chain_metrics().inc_tx_to_settlement(C::CHAIN.as_str(), count);
    }

    async fn mempool_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_sender.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let height = self.current_height() + 1;
            let wait = match self.fetch_mempool(height).await {
                Ok(txin) if !txin.tx_array.is_empty() => {
                    self.forward(txin).await;
                    Duration::ZERO
                }
                Ok(_) => self.settlement_block_time(),
                Err(e) => {
                    tracing::warn!(target: "mempool", chain = %C::CHAIN, error = %e, "mempool scan failed");
                    self.settlement_block_time()
                }
            };
            if wait.is_zero() {
                continue;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = time::sleep(wait) => {}
            }
        }
        tracing::info!(target: "mempool", chain = %C::CHAIN, "mempool scanner stopped");
    }
}

// Path: crates/utxo/src/chain_client.rs
//! The chain-agnostic face of a UTXO client, for callers that hold one client per
//! configured chain.

use crate::builder::SignedOutbound;
use crate::chain::{Bitcoin, BitcoinCash, Dogecoin, Litecoin, UtxoChain};
use crate::client::{ClientDeps, UtxoClient};
use crate::error::{ClientError, SignTxError};
use crate::rpc::RpcClient;
use async_trait::async_trait;
use ferry_types::config::ChainClientConfig;
use ferry_types::{Chain, Coin, PubKey, TxIn, TxInItem, TxOutItem};
use std::sync::Arc;

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> Chain;

    /// Spawns the scanner, mempool and solvency loops.
    async fn start(&self);

    async fn stop(&self);

    async fn sign_tx(
        &self,
        item: &TxOutItem,
        settlement_height: i64,
    ) -> Result<Option<SignedOutbound>, SignTxError>;

    /// Returns the txid.
    async fn broadcast_tx(&self, item: &TxOutItem, signed: &[u8]) -> Result<String, ClientError>;

    /// Signs and broadcasts while holding the vault lock throughout.
    async fn sign_and_broadcast(
        &self,
        item: &TxOutItem,
        settlement_height: i64,
    ) -> Result<Option<String>, SignTxError>;

    async fn get_height(&self) -> Result<i64, ClientError>;

    fn get_address(&self, pubkey: &PubKey) -> Result<String, ClientError>;

    async fn get_account(&self, pubkey: &PubKey) -> Result<Vec<Coin>, ClientError>;

    async fn on_observed_tx_in(&self, item: &TxInItem, block_height: i64);

    async fn get_confirmation_count(&self, txin: &TxIn) -> i64;

    fn confirmation_count_ready(&self, txin: &TxIn) -> bool;

    fn healthy(&self) -> bool;
}

/// A [`UtxoClient`] behind the [`ChainClient`] interface.
pub struct UtxoChainClient<C: UtxoChain>(pub Arc<UtxoClient<C>>);

impl<C: UtxoChain> std::fmt::Debug for UtxoChainClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
impl<C: UtxoChain> ChainClient for UtxoChainClient<C> {
    fn chain(&self) -> Chain {
        C::CHAIN
    }

    async fn start(&self) {
        self.0.start().await;
    }

    async fn stop(&self) {
        self.0.stop().await;
    }

    async fn sign_tx(
        &self,
        item: &TxOutItem,
        settlement_height: i64,
    ) -> Result<Option<SignedOutbound>, SignTxError> {
        self.0.sign_tx(item, settlement_height).await
    }

    async fn broadcast_tx(&self, item: &TxOutItem, signed: &[u8]) -> Result<String, ClientError> {
        self.0.broadcast_tx(item, signed).await
    }

    async fn sign_and_broadcast(
        &self,
        item: &TxOutItem,
        settlement_height: i64,
    ) -> Result<Option<String>, SignTxError> {
        self.0.sign_and_broadcast(item, settlement_height).await
    }

    async fn get_height(&self) -> Result<i64, ClientError> {
        self.0.get_height().await
    }

    fn get_address(&self, pubkey: &PubKey) -> Result<String, ClientError> {
        self.0.get_address(pubkey)
    }

    async fn get_account(&self, pubkey: &PubKey) -> Result<Vec<Coin>, ClientError> {
        self.0.get_account(pubkey).await
    }

    async fn on_observed_tx_in(&self, item: &TxInItem, block_height: i64) {
        self.0.on_observed_tx_in(item, block_height).await;
    }

    async fn get_confirmation_count(&self, txin: &TxIn) -> i64 {
        self.0.get_confirmation_count(txin).await
    }

    fn confirmation_count_ready(&self, txin: &TxIn) -> bool {
        self.0.confirmation_count_ready(txin)
    }

    fn healthy(&self) -> bool {
        self.0.is_healthy()
    }
}

fn wrap<C: UtxoChain>(
    cfg: ChainClientConfig,
    rpc: Arc<RpcClient>,
    deps: ClientDeps,
) -> Result<Arc<dyn ChainClient>, ClientError> {
    let client = UtxoClient::<C>::new(cfg, rpc, deps)?;
    Ok(Arc::new(UtxoChainClient(Arc::new(client))))
}

/// Builds the client for the chain named in `cfg`.
pub fn load_chain_client(
    cfg: ChainClientConfig,
    deps: ClientDeps,
) -> Result<Arc<dyn ChainClient>, ClientError> {
    let rpc = Arc::new(RpcClient::new(&cfg)?);
    tracing::info!(target: "rpc", chain = %cfg.chain, url = %cfg.rpc_url(), "loading chain client");
    match cfg.chain {
        Chain::BTC => wrap::<Bitcoin>(cfg, rpc, deps),
        Chain::BCH => wrap::<BitcoinCash>(cfg, rpc, deps),
        Chain::LTC => wrap::<Litecoin>(cfg, rpc, deps),
        Chain::DOGE => wrap::<Dogecoin>(cfg, rpc, deps),
    }
}

// Path: crates/utxo/src/rpc/api.rs
use super::client::ChainRpc;
use super::types::{BlockStats, BlockVerbose, NetworkInfo, RawTx, Unspent};
use crate::error::{ClientError, RPC_INVALID_PARAMETER, RPC_WALLET_ERROR};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

/// Typed access to the daemon methods the client uses.
#[derive(Clone)]
pub struct ChainApi {
    rpc: Arc<dyn ChainRpc>,
}

impl std::fmt::Debug for ChainApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainApi").finish_non_exhaustive()
    }
}

impl ChainApi {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }

    async fn typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ClientError> {
        let value = self.rpc.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode(format!("{method}: {e}")))
    }

    pub async fn get_block_count(&self) -> Result<i64, ClientError> {
        self.typed("getblockcount", vec![]).await
    }

    /// The hash at `height`; a height past the tip is [`ClientError::UnavailableBlock`].
    pub async fn get_block_hash(&self, height: i64) -> Result<String, ClientError> {
        match self.typed("getblockhash", vec![json!(height)]).await {
            Err(e) if e.is_rpc_code(RPC_INVALID_PARAMETER) => {
                Err(ClientError::UnavailableBlock(height))
            }
            other => other,
        }
    }

    pub async fn get_block_verbose_tx(&self, hash: &str) -> Result<BlockVerbose, ClientError> {
        self.typed("getblock", vec![json!(hash), json!(2)]).await
    }

    /// Hash lookup followed by the verbose block.
    pub async fn get_block(&self, height: i64) -> Result<BlockVerbose, ClientError> {
        let hash = self.get_block_hash(height).await?;
        self.get_block_verbose_tx(&hash).await
    }

    pub async fn get_block_stats(&self, height: i64) -> Result<BlockStats, ClientError> {
        self.typed("getblockstats", vec![json!(height), json!(["avgfeerate"])])
            .await
    }

    pub async fn get_raw_mempool(&self) -> Result<Vec<String>, ClientError> {
        self.typed("getrawmempool", vec![]).await
    }

    pub async fn get_raw_transaction_verbose(&self, txid: &str) -> Result<RawTx, ClientError> {
        self.typed("getrawtransaction", vec![json!(txid), json!(true)])
            .await
    }

    /// Whether `txid` sits in the daemon's mempool. Any RPC error reads as absent.
    pub async fn in_mempool(&self, txid: &str) -> Result<bool, ClientError> {
        match self.rpc.call("getmempoolentry", vec![json!(txid)]).await {
            Ok(v) => Ok(!v.is_null()),
            Err(ClientError::Rpc { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether `txid` is known to the daemon, confirmed or in the mempool. RPC errors
    /// read as absent; transport errors propagate.
    pub async fn tx_exists(&self, txid: &str) -> Result<bool, ClientError> {
        match self.rpc.call("getrawtransaction", vec![json!(txid)]).await {
            Ok(_) => Ok(true),
            Err(ClientError::Rpc { code, message }) => {
                tracing::debug!(target: "reorg", txid, code, %message, "tx not found on chain");
                self.in_mempool(txid).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_network_info(&self) -> Result<NetworkInfo, ClientError> {
        self.typed("getnetworkinfo", vec![]).await
    }

    pub async fn list_unspent(
        &self,
        min_conf: i64,
        max_conf: i64,
        address: &str,
    ) -> Result<Vec<Unspent>, ClientError> {
        self.typed(
            "listunspent",
            vec![json!(min_conf), json!(max_conf), json!([address])],
        )
        .await
    }

    /// Broadcasts with pre-built parameters; returns the txid.
    pub async fn send_raw_transaction(&self, params: Vec<Value>) -> Result<String, ClientError> {
        self.typed("sendrawtransaction", params).await
    }

    /// Creates the default wallet. An existing wallet is not an error.
    pub async fn create_wallet(&self) -> Result<(), ClientError> {
        let params = vec![
            json!(""),
            json!(false),
            json!(false),
            json!(""),
            json!(false),
            json!(false),
        ];
        match self.rpc.call("createwallet", params).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_rpc_code(RPC_WALLET_ERROR) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Adds `address` to the wallet as watch-only, without a rescan.
    pub async fn import_address(&self, address: &str) -> Result<(), ClientError> {
        self.rpc
            .call("importaddress", vec![json!(address), json!(""), json!(false)])
            .await
            .map(|_| ())
    }
}

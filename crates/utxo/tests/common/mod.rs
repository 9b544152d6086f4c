// Path: crates/utxo/tests/common/mod.rs
//! In-process stand-ins for the chain daemon, the settlement chain and the TSS
//! service, plus a harness wiring them into a client.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use ferry_tss::{
    KeysignRequest, KeysignResponse, KeysignSignature, KeysignStatus, KeysignWrapper, TssError,
    TssServer, TssSigner,
};
use ferry_types::config::ChainClientConfig;
use ferry_types::{
    Blame, BlameNode, Bridge, BridgeError, Chain, ChainNetwork, Coin, ErrataBlock, NodeStatus,
    PubKey, Solvency, TxIn, Vault,
};
use ferry_utxo::rpc::types::{BlockVerbose, RawTx, ScriptPubKey, Vin, Vout};
use ferry_utxo::{ChainRpc, ClientDeps, ClientError, Queues, UtxoChain, UtxoClient};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const NODE_SEED: u8 = 0x33;
pub const VAULT_SEED: u8 = 0x44;
pub const SENDER_SEED: u8 = 0x55;
pub const CUSTOMER_SEED: u8 = 0x66;

pub fn secret(seed: u8) -> SecretKey {
    SecretKey::from_slice(&[seed; 32]).unwrap()
}

pub fn pubkey(seed: u8) -> PubKey {
    let secp = Secp256k1::new();
    PubKey::from_secp(&PublicKey::from_secret_key(&secp, &secret(seed)))
}

/// Mainnet vault address of the key with `seed` on `chain`.
pub fn address(seed: u8, chain: Chain) -> String {
    pubkey(seed)
        .address(chain, ChainNetwork::MainNet)
        .unwrap()
        .as_str()
        .to_string()
}

/// Hex locking script paying the key with `seed` on `chain`.
pub fn script_hex(seed: u8, chain: Chain) -> String {
    let addr = pubkey(seed).address(chain, ChainNetwork::MainNet).unwrap();
    hex::encode(addr.script_pubkey().unwrap().as_bytes())
}

pub fn txid(byte: u8) -> String {
    format!("{byte:02x}").repeat(32)
}

pub fn rpc_error(code: i64, message: &str) -> ClientError {
    ClientError::Rpc {
        code,
        message: message.to_string(),
    }
}

// ---- raw transaction builders ----

pub fn pay(seed: u8, chain: Chain, coins: f64, n: u32) -> Vout {
    Vout {
        value: coins,
        n,
        script_pub_key: ScriptPubKey {
            hex: script_hex(seed, chain),
            kind: if chain.uses_segwit_vaults() {
                "witness_v0_keyhash".into()
            } else {
                "pubkeyhash".into()
            },
            ..Default::default()
        },
    }
}

pub fn op_return(memo: &str, n: u32) -> Vout {
    let data = bitcoin::script::PushBytesBuf::try_from(memo.as_bytes().to_vec()).unwrap();
    let script = bitcoin::ScriptBuf::new_op_return(data);
    Vout {
        value: 0.0,
        n,
        script_pub_key: ScriptPubKey {
            hex: hex::encode(script.as_bytes()),
            kind: "nulldata".into(),
            ..Default::default()
        },
    }
}

pub fn spend(parent: &str, vout: u32) -> Vin {
    Vin {
        txid: parent.to_string(),
        vout,
        ..Default::default()
    }
}

pub fn raw_tx(id: &str, vin: Vec<Vin>, vout: Vec<Vout>) -> RawTx {
    RawTx {
        txid: id.to_string(),
        hash: id.to_string(),
        locktime: 0,
        vin,
        vout,
    }
}

pub fn block(hash: &str, prev: &str, height: i64, tx: Vec<RawTx>) -> BlockVerbose {
    BlockVerbose {
        hash: hash.to_string(),
        previous_hash: prev.to_string(),
        height,
        tx,
    }
}

// ---- chain daemon ----

type Handler = Box<dyn Fn(&[Value]) -> Result<Value, ClientError> + Send + Sync>;

/// A daemon answering from per-method handlers. Unknown methods fail with -32601.
#[derive(Default)]
pub struct MockRpc {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockRpc {
    pub fn on(
        &self,
        method: &str,
        f: impl Fn(&[Value]) -> Result<Value, ClientError> + Send + Sync + 'static,
    ) {
        self.handlers.lock().insert(method.to_string(), Box::new(f));
    }

    pub fn reply(&self, method: &str, value: Value) {
        self.on(method, move |_| Ok(value.clone()));
    }

    /// Serves `blocks` through `getblockhash` and `getblock`; other heights are past
    /// the tip.
    pub fn serve_blocks(&self, blocks: Vec<BlockVerbose>) {
        let by_height: HashMap<i64, String> =
            blocks.iter().map(|b| (b.height, b.hash.clone())).collect();
        let by_hash: HashMap<String, Value> = blocks
            .iter()
            .map(|b| (b.hash.clone(), serde_json::to_value(b).unwrap()))
            .collect();
        self.on("getblockhash", move |p| {
            let h = p[0].as_i64().unwrap();
            by_height
                .get(&h)
                .map(|hash| json!(hash))
                .ok_or_else(|| rpc_error(-8, "Block height out of range"))
        });
        self.on("getblock", move |p| {
            let hash = p[0].as_str().unwrap();
            by_hash
                .get(hash)
                .cloned()
                .ok_or_else(|| rpc_error(-5, "Block not found"))
        });
    }

    /// Serves `txs` through `getrawtransaction`, verbose or not.
    pub fn serve_txs(&self, txs: Vec<RawTx>) {
        let by_id: HashMap<String, Value> = txs
            .iter()
            .map(|t| (t.txid.clone(), serde_json::to_value(t).unwrap()))
            .collect();
        self.on("getrawtransaction", move |p| {
            let id = p[0].as_str().unwrap();
            by_id
                .get(id)
                .cloned()
                .ok_or_else(|| rpc_error(-5, "No such mempool or blockchain transaction"))
        });
    }

    pub fn calls(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Every method called so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.calls.lock().push((method.to_string(), params.clone()));
        match self.handlers.lock().get(method) {
            Some(handler) => handler(&params),
            None => Err(rpc_error(-32601, "Method not found")),
        }
    }
}

// ---- settlement chain ----

#[derive(Default)]
pub struct MockBridge {
    pub asgards: Mutex<Vec<Vault>>,
    pub mimir: Mutex<HashMap<String, i64>>,
    pub status: Mutex<NodeStatus>,
    pub height: AtomicI64,
    pub last_observed: AtomicI64,
    pub network_fees: Mutex<Vec<(i64, Chain, u64, u64)>>,
    pub keysign_failures: Mutex<Vec<(Blame, i64, String)>>,
}

impl MockBridge {
    pub fn set_mimir(&self, key: &str, value: i64) {
        self.mimir.lock().insert(key.to_string(), value);
    }
}

#[async_trait]
impl Bridge for MockBridge {
    async fn get_asgards(&self) -> Result<Vec<Vault>, BridgeError> {
        Ok(self.asgards.lock().clone())
    }

    async fn get_asgard_pubkeys(&self) -> Result<Vec<PubKey>, BridgeError> {
        Ok(self.asgards.lock().iter().map(|v| v.pub_key.clone()).collect())
    }

    async fn get_block_height(&self) -> Result<i64, BridgeError> {
        Ok(self.height.load(Ordering::Relaxed))
    }

    async fn fetch_node_status(&self) -> Result<NodeStatus, BridgeError> {
        Ok(*self.status.lock())
    }

    async fn get_mimir(&self, key: &str) -> Result<i64, BridgeError> {
        Ok(self.mimir.lock().get(key).copied().unwrap_or(-1))
    }

    async fn post_network_fee(
        &self,
        height: i64,
        chain: Chain,
        tx_size: u64,
        tx_rate: u64,
    ) -> Result<String, BridgeError> {
        self.network_fees
            .lock()
            .push((height, chain, tx_size, tx_rate));
        Ok("fee-tx".into())
    }

    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: i64,
        memo: &str,
        _coins: &[Coin],
        _pubkey: &PubKey,
    ) -> Result<String, BridgeError> {
        self.keysign_failures
            .lock()
            .push((blame.clone(), height, memo.to_string()));
        Ok("failure-tx".into())
    }

    async fn get_keysign_party(&self, _vault_pubkey: &PubKey) -> Result<Vec<PubKey>, BridgeError> {
        Ok(vec![])
    }

    async fn get_last_observed_in_height(&self, _chain: Chain) -> Result<i64, BridgeError> {
        Ok(self.last_observed.load(Ordering::Relaxed))
    }

    async fn get_version(&self) -> Result<String, BridgeError> {
        Ok("3.0.0".into())
    }
}

// ---- TSS service ----

/// Signs every message with the vault key. `fail_next_round` makes the next ceremony
/// fail in that round; `not_selected` answers with empty signatures.
pub struct KeyServer {
    key: SecretKey,
    pub requests: Mutex<Vec<KeysignRequest>>,
    pub fail_next_round: Mutex<Option<String>>,
    pub not_selected: AtomicBool,
}

impl KeyServer {
    pub fn new(key: SecretKey) -> Self {
        Self {
            key,
            requests: Mutex::new(Vec::new()),
            fail_next_round: Mutex::new(None),
            not_selected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TssServer for KeyServer {
    async fn key_sign(&self, req: KeysignRequest) -> Result<KeysignResponse, TssError> {
        self.requests.lock().push(req.clone());
        if let Some(round) = self.fail_next_round.lock().take() {
            return Ok(KeysignResponse {
                signatures: vec![],
                status: KeysignStatus::Fail,
                blame: Blame {
                    fail_reason: "signers timed out".into(),
                    round,
                    blame_nodes: vec![BlameNode {
                        pubkey: "node-2".into(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            });
        }
        let secp = Secp256k1::new();
        let mut signatures = Vec::new();
        for m in &req.messages {
            if self.not_selected.load(Ordering::Relaxed) {
                signatures.push(KeysignSignature {
                    msg: m.clone(),
                    ..Default::default()
                });
                continue;
            }
            let digest: [u8; 32] = B64.decode(m).unwrap().try_into().unwrap();
            let (rec, compact) = secp
                .sign_ecdsa_recoverable(&Message::from_digest(digest), &self.key)
                .serialize_compact();
            signatures.push(KeysignSignature {
                msg: m.clone(),
                r: B64.encode(&compact[..32]),
                s: B64.encode(&compact[32..]),
                recovery_id: B64.encode([rec.to_i32() as u8]),
            });
        }
        Ok(KeysignResponse {
            signatures,
            status: KeysignStatus::Success,
            blame: Blame::default(),
        })
    }
}

// ---- harness ----

pub struct Harness<C: UtxoChain> {
    pub client: Arc<UtxoClient<C>>,
    pub rpc: Arc<MockRpc>,
    pub bridge: Arc<MockBridge>,
    pub server: Arc<KeyServer>,
    pub txs: mpsc::Receiver<TxIn>,
    pub errata: mpsc::Receiver<ErrataBlock>,
    pub solvency: mpsc::Receiver<Solvency>,
    pub vault: PubKey,
    pub node: PubKey,
    _dir: TempDir,
}

impl<C: UtxoChain> Harness<C> {
    /// A client whose only asgard vault is the `VAULT_SEED` key, with this node
    /// (`NODE_SEED`) as a member. Must run inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut ChainClientConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ChainClientConfig::new(C::CHAIN, "127.0.0.1:18443");
        cfg.block_scanner.db_path = dir.path().to_path_buf();
        tweak(&mut cfg);

        let rpc = Arc::new(MockRpc::default());
        let bridge = Arc::new(MockBridge::default());
        bridge.height.store(1000, Ordering::Relaxed);
        let vault = pubkey(VAULT_SEED);
        let node = pubkey(NODE_SEED);
        bridge.asgards.lock().push(Vault {
            pub_key: vault.clone(),
            membership: vec![node.clone()],
            coins: vec![],
        });

        let server = Arc::new(KeyServer::new(secret(VAULT_SEED)));
        let tss = Arc::new(TssSigner::new(
            server.clone(),
            bridge.clone(),
            Duration::from_secs(5),
            Duration::from_millis(10),
            Duration::from_secs(60),
        ));
        tss.start();
        let keysign = Arc::new(KeysignWrapper::new(secret(NODE_SEED), tss.clone()));

        let (txs_tx, txs) = mpsc::channel(16);
        let (errata_tx, errata) = mpsc::channel(16);
        let (solvency_tx, solvency) = mpsc::channel(16);
        let deps = ClientDeps {
            bridge: bridge.clone(),
            keysign,
            tss: Some(tss),
            queues: Queues {
                txs: txs_tx,
                errata: errata_tx,
                solvency: solvency_tx,
            },
        };
        let client = Arc::new(UtxoClient::<C>::new(cfg, rpc.clone(), deps).unwrap());

        Self {
            client,
            rpc,
            bridge,
            server,
            txs,
            errata,
            solvency,
            vault,
            node,
            _dir: dir,
        }
    }

    pub fn vault_address(&self) -> String {
        address(VAULT_SEED, C::CHAIN)
    }

    /// Serves `utxos` of `(txid byte, coins, confirmations)` to the vault address.
    pub fn serve_vault_utxos(&self, utxos: &[(u8, f64, i64)]) {
        let address = self.vault_address();
        let script = script_hex(VAULT_SEED, C::CHAIN);
        let list: Vec<Value> = utxos
            .iter()
            .map(|(id, amount, conf)| {
                json!({
                    "txid": txid(*id),
                    "vout": 0,
                    "address": address,
                    "scriptPubKey": script,
                    "amount": amount,
                    "confirmations": conf,
                })
            })
            .collect();
        self.rpc.reply("listunspent", json!(list));
    }
}

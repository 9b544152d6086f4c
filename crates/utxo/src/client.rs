// Path: crates/utxo/src/client.rs
//! The chain client's shared state and the small lookups every other part uses.
//! Scanning, outbound construction, maintenance and the run loops are `impl` blocks
//! on the same type in their own modules.

use crate::chain::{accepts_broadcast_max_fee, UtxoChain};
use crate::error::ClientError;
use crate::locks::VaultLocks;
use crate::rpc::{to_sats, ChainApi, ChainRpc};
use ferry_storage::{KvStore, SignerCache, TemporalStore};
use ferry_tss::{KeysignWrapper, TssSigner};
use ferry_types::config::ChainClientConfig;
use ferry_types::{Bridge, Chain, Coin, ErrataBlock, PubKey, Solvency, TxIn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Widest confirmation range passed to `listunspent`.
pub const MAXIMUM_CONFIRMATION: i64 = 99_999_999;
/// Relay fee assumed until the daemon reports one, sats per kB.
pub const DEFAULT_MIN_RELAY_FEE_SATS: u64 = 1000;
/// Number of recent fee rates the reported rate is the maximum of.
pub const GAS_CACHE_BLOCKS: usize = 10;

/// Senders towards the settlement chain.
#[derive(Debug, Clone)]
pub struct Queues {
    /// Observation batches.
    pub txs: mpsc::Sender<TxIn>,
    /// Retractions after a reorg.
    pub errata: mpsc::Sender<ErrataBlock>,
    /// Solvency attestations.
    pub solvency: mpsc::Sender<Solvency>,
}

/// Collaborators handed to a chain client.
pub struct ClientDeps {
    /// Settlement-chain client.
    pub bridge: Arc<dyn Bridge>,
    /// Signing path per vault.
    pub keysign: Arc<KeysignWrapper>,
    /// The dispatcher behind `keysign`; started and stopped with the client when set.
    pub tss: Option<Arc<TssSigner>>,
    /// Outbound queues.
    pub queues: Queues,
}

#[derive(Default)]
struct AsgardCache {
    addresses: Vec<String>,
    refreshed_at: Option<Instant>,
}

/// Fee rates seen on recent blocks and the one last reported upstream.
#[derive(Debug, Default)]
pub(crate) struct FeeState {
    pub ring: VecDeque<u64>,
    pub last_reported: u64,
}

/// A UTXO chain client for the chain `C`.
pub struct UtxoClient<C: UtxoChain> {
    pub(crate) cfg: ChainClientConfig,
    pub(crate) api: ChainApi,
    pub(crate) bridge: Arc<dyn Bridge>,
    pub(crate) store: Arc<TemporalStore>,
    pub(crate) signer_cache: SignerCache,
    pub(crate) keysign: Arc<KeysignWrapper>,
    pub(crate) tss: Option<Arc<TssSigner>>,
    pub(crate) queues: Queues,
    pub(crate) locks: VaultLocks,

    pub(crate) current_height: AtomicI64,
    pub(crate) healthy: AtomicBool,
    pub(crate) consolidating: AtomicBool,
    pub(crate) modern_daemon: AtomicBool,
    pub(crate) min_relay_fee_sats: AtomicU64,
    pub(crate) last_solvency_height: AtomicI64,
    pub(crate) fees: Mutex<FeeState>,
    asgards: Mutex<AsgardCache>,

    pub(crate) shutdown_sender: Arc<watch::Sender<bool>>,
    pub(crate) task_handles: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) is_running: AtomicBool,
    _chain: PhantomData<fn() -> C>,
}

impl<C: UtxoChain> std::fmt::Debug for UtxoClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtxoClient")
            .field("chain", &C::CHAIN)
            .field("network", &self.cfg.network)
            .field("current_height", &self.current_height.load(Ordering::Relaxed))
            .field("healthy", &self.healthy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: UtxoChain> UtxoClient<C> {
    /// Opens the local index under `cfg.block_scanner.db_path` and wires the
    /// collaborators. Nothing runs until [`UtxoClient::start`].
    pub fn new(
        cfg: ChainClientConfig,
        rpc: Arc<dyn ChainRpc>,
        deps: ClientDeps,
    ) -> Result<Self, ClientError> {
        if cfg.chain != C::CHAIN {
            return Err(ClientError::ChainMismatch {
                expected: C::CHAIN,
                actual: cfg.chain,
            });
        }
        let db_file = cfg
            .block_scanner
            .db_path
            .join(format!("{}.redb", C::CHAIN.as_str().to_ascii_lowercase()));
        let kv = KvStore::open(db_file)?;
        let (shutdown_sender, _) = watch::channel(false);

        Ok(Self {
            api: ChainApi::new(rpc),
            bridge: deps.bridge,
            store: Arc::new(TemporalStore::new(kv.clone(), cfg.mempool_txid_cache_size)),
            signer_cache: SignerCache::new(kv),
            keysign: deps.keysign,
            tss: deps.tss,
            queues: deps.queues,
            locks: VaultLocks::new(),
            current_height: AtomicI64::new(0),
            healthy: AtomicBool::new(false),
            consolidating: AtomicBool::new(false),
            modern_daemon: AtomicBool::new(false),
            min_relay_fee_sats: AtomicU64::new(DEFAULT_MIN_RELAY_FEE_SATS),
            last_solvency_height: AtomicI64::new(0),
            fees: Mutex::new(FeeState::default()),
            asgards: Mutex::new(AsgardCache::default()),
            shutdown_sender: Arc::new(shutdown_sender),
            task_handles: Mutex::new(Vec::new()),
            is_running: AtomicBool::new(false),
            cfg,
            _chain: PhantomData,
        })
    }

    pub fn chain(&self) -> Chain {
        C::CHAIN
    }

    pub fn config(&self) -> &ChainClientConfig {
        &self.cfg
    }

    /// The local index.
    pub fn store(&self) -> &TemporalStore {
        &self.store
    }

    pub fn signer_cache(&self) -> &SignerCache {
        &self.signer_cache
    }

    /// Whether the scanner is caught up and the chain is not paused.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// The height of the last block handed to `fetch_txs`.
    pub fn current_height(&self) -> i64 {
        self.current_height.load(Ordering::Relaxed)
    }

    pub(crate) fn settlement_block_time(&self) -> Duration {
        Duration::from_millis(self.cfg.settlement_block_time_ms)
    }

    /// The chain tip.
    pub async fn get_height(&self) -> Result<i64, ClientError> {
        self.api.get_block_count().await
    }

    /// The vault address of `pubkey` on this chain.
    pub fn get_address(&self, pubkey: &PubKey) -> Result<String, ClientError> {
        Ok(pubkey
            .address(C::CHAIN, self.cfg.network)?
            .as_str()
            .to_string())
    }

    /// The on-chain balance held by `pubkey`, confirmed or not.
    pub async fn get_account(&self, pubkey: &PubKey) -> Result<Vec<Coin>, ClientError> {
        let address = self.get_address(pubkey)?;
        let utxos = self
            .api
            .list_unspent(0, MAXIMUM_CONFIRMATION, &address)
            .await?;
        let total: u64 = utxos.iter().map(|u| u.sats()).sum();
        Ok(vec![Coin::gas(C::CHAIN, total)])
    }

    /// Addresses of the active asgard vaults on this chain. Refreshed at most once per
    /// settlement block time; a failed or empty refresh keeps the previous list.
    pub async fn asgard_addresses(&self) -> Vec<String> {
        {
            let cache = self.asgards.lock();
            if cache
                .refreshed_at
                .is_some_and(|at| at.elapsed() < self.settlement_block_time())
            {
                return cache.addresses.clone();
            }
        }

        match self.bridge.get_asgard_pubkeys().await {
            Ok(pubkeys) => {
                let addresses: Vec<String> = pubkeys
                    .iter()
                    .filter_map(|pk| match self.get_address(pk) {
                        Ok(a) => Some(a),
                        Err(e) => {
                            tracing::debug!(target: "scanner", chain = %C::CHAIN, pubkey = %pk, error = %e, "skipping asgard without address");
                            None
                        }
                    })
                    .collect();
                let mut cache = self.asgards.lock();
                cache.refreshed_at = Some(Instant::now());
                if !addresses.is_empty() {
                    cache.addresses = addresses;
                }
                cache.addresses.clone()
            }
            Err(e) => {
                tracing::warn!(target: "scanner", chain = %C::CHAIN, error = %e, "failed to refresh asgard addresses");
                self.asgards.lock().addresses.clone()
            }
        }
    }

    /// Whether `address` belongs to an active asgard vault.
    pub async fn is_asgard_address(&self, address: &str) -> bool {
        self.asgard_addresses()
            .await
            .iter()
            .any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Refreshes the relay fee and, for LTC, whether the daemon accepts a max fee on
    /// broadcast.
    pub async fn update_network_info(&self) -> Result<(), ClientError> {
        let info = self.api.get_network_info().await?;
        let relay = to_sats(info.relayfee);
        if relay > 0 {
            self.min_relay_fee_sats.store(relay, Ordering::Relaxed);
        }
        if C::CHAIN == Chain::LTC {
            self.modern_daemon
                .store(accepts_broadcast_max_fee(&info.subversion), Ordering::Relaxed);
        }
        Ok(())
    }

    pub(crate) fn min_relay_fee(&self) -> u64 {
        self.min_relay_fee_sats.load(Ordering::Relaxed)
    }

    /// The fee rate last reported upstream, sats per vbyte.
    pub fn last_fee_rate(&self) -> u64 {
        self.fees.lock().last_reported
    }

    /// Adds `address` to the daemon's wallet as watch-only so `listunspent` sees it.
    pub async fn register_address(&self, address: &str) -> Result<(), ClientError> {
        self.api.create_wallet().await?;
        self.api.import_address(address).await?;
        tracing::info!(target: "scanner", chain = %C::CHAIN, address, "registered watch-only address");
        Ok(())
    }

    /// Registers the vault address of `pubkey`.
    pub async fn register_public_key(&self, pubkey: &PubKey) -> Result<(), ClientError> {
        let address = self.get_address(pubkey)?;
        self.register_address(&address).await
    }
}

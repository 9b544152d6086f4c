// Path: crates/types/src/config.rs

//! Configuration structures for a UTXO chain client.
use crate::chain::{Chain, ChainNetwork};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration of one chain client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainClientConfig {
    /// The chain served.
    pub chain: Chain,
    /// Network flavour, selects address prefixes.
    #[serde(default)]
    pub network: ChainNetwork,
    /// `host:port` of the chain daemon's JSON-RPC endpoint.
    pub rpc_host: String,
    /// RPC basic-auth user.
    #[serde(default)]
    pub username: String,
    /// RPC basic-auth password.
    #[serde(default)]
    pub password: String,
    /// Talk plain HTTP to the daemon.
    #[serde(default = "default_true")]
    pub disable_tls: bool,
    /// Concurrent mempool lookups.
    #[serde(default = "default_parallel_mempool_scan")]
    pub parallel_mempool_scan: usize,
    /// Capacity of the in-memory mempool LRU; zero disables it.
    #[serde(default = "default_mempool_txid_cache_size")]
    pub mempool_txid_cache_size: usize,
    /// Settlement-chain block time, used for cache expiry and backoffs.
    #[serde(default = "default_settlement_block_time_ms")]
    pub settlement_block_time_ms: u64,
    /// Block scanner settings.
    #[serde(default)]
    pub block_scanner: BlockScannerConfig,
    /// TSS service settings.
    #[serde(default)]
    pub tss: TssConfig,
    /// RPC transport settings.
    #[serde(default)]
    pub rpc: RpcConfig,
}

/// Block scanner settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BlockScannerConfig {
    /// Directory of the local index.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Height to start from; zero means resume.
    #[serde(default)]
    pub start_block_height: i64,
    /// Sleep between polls when no new block is available.
    #[serde(default = "default_block_height_discover_backoff_ms")]
    pub block_height_discover_backoff_ms: u64,
    /// How close to the tip the scanner must be before fees and solvency are reported.
    #[serde(default)]
    pub observation_flexibility_blocks: i64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/utxo")
}
fn default_block_height_discover_backoff_ms() -> u64 {
    5000
}

impl Default for BlockScannerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            start_block_height: 0,
            block_height_discover_backoff_ms: default_block_height_discover_backoff_ms(),
            observation_flexibility_blocks: 0,
        }
    }
}

/// TSS service settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TssConfig {
    /// Base URL of the TSS service.
    #[serde(default = "default_tss_url")]
    pub url: String,
    /// Hard limit on one keysign.
    #[serde(default = "default_keysign_timeout_secs")]
    pub keysign_timeout_secs: u64,
    /// How often queued messages are flushed to the service.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

fn default_tss_url() -> String {
    "http://127.0.0.1:8321".to_string()
}
fn default_keysign_timeout_secs() -> u64 {
    300
}
fn default_dispatch_interval_ms() -> u64 {
    1000
}

impl Default for TssConfig {
    fn default() -> Self {
        Self {
            url: default_tss_url(),
            keysign_timeout_secs: default_keysign_timeout_secs(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

/// RPC transport settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConfig {
    /// Retries for transient transport failures.
    #[serde(default = "default_rpc_retries")]
    pub retries: u32,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_rpc_retries() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            retries: default_rpc_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_parallel_mempool_scan() -> usize {
    5
}
fn default_mempool_txid_cache_size() -> usize {
    10_000
}
fn default_settlement_block_time_ms() -> u64 {
    6000
}

impl ChainClientConfig {
    /// A configuration with every optional field at its default.
    pub fn new(chain: Chain, rpc_host: impl Into<String>) -> Self {
        Self {
            chain,
            network: ChainNetwork::default(),
            rpc_host: rpc_host.into(),
            username: String::new(),
            password: String::new(),
            disable_tls: true,
            parallel_mempool_scan: default_parallel_mempool_scan(),
            mempool_txid_cache_size: default_mempool_txid_cache_size(),
            settlement_block_time_ms: default_settlement_block_time_ms(),
            block_scanner: BlockScannerConfig::default(),
            tss: TssConfig::default(),
            rpc: RpcConfig::default(),
        }
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        anyhow::ensure!(!cfg.rpc_host.is_empty(), "rpc_host must be set");
        anyhow::ensure!(
            cfg.parallel_mempool_scan > 0,
            "parallel_mempool_scan must be positive"
        );
        Ok(cfg)
    }

    /// The RPC endpoint URL.
    pub fn rpc_url(&self) -> String {
        if self.rpc_host.starts_with("http://") || self.rpc_host.starts_with("https://") {
            return self.rpc_host.clone();
        }
        let scheme = if self.disable_tls { "http" } else { "https" };
        format!("{scheme}://{}", self.rpc_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btc.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
chain = "btc"
network = "testnet"
rpc_host = "127.0.0.1:18443"

[block_scanner]
start_block_height = 42
"#
        )
        .unwrap();

        let cfg = ChainClientConfig::load(&path).unwrap();
        assert_eq!(cfg.chain, Chain::BTC);
        assert_eq!(cfg.network, ChainNetwork::TestNet);
        assert_eq!(cfg.parallel_mempool_scan, 5);
        assert_eq!(cfg.mempool_txid_cache_size, 10_000);
        assert_eq!(cfg.block_scanner.start_block_height, 42);
        assert_eq!(cfg.block_scanner.block_height_discover_backoff_ms, 5000);
        assert_eq!(cfg.tss.keysign_timeout_secs, 300);
        assert_eq!(cfg.rpc.retries, 3);
        assert_eq!(cfg.rpc_url(), "http://127.0.0.1:18443");
    }

    #[test]
    fn load_rejects_missing_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "chain = \"LTC\"\nrpc_host = \"\"\n").unwrap();
        assert!(ChainClientConfig::load(&path).is_err());
        assert!(ChainClientConfig::load(dir.path().join("missing.toml")).is_err());
    }
}

// Path: crates/tss/src/signer.rs
//! Batching front-end to the TSS service.
//!
//! Callers submit one 32-byte message at a time. A dispatcher groups pending messages by
//! vault key and, once per tick, sends up to [`MAX_KEYSIGN_PER_REQUEST`] of them per key
//! in one request. Messages are sorted first so every member of the signing committee
//! proposes the same batch.

use crate::error::TssError;
use crate::server::TssServer;
use crate::signature::{decode_recovery_id, normalize_signature};
use crate::types::{KeysignRequest, KeysignSignature, KeysignStatus};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ferry_types::{Bridge, ErrorCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Upper bound of messages in one keysign request.
pub const MAX_KEYSIGN_PER_REQUEST: usize = 15;
/// Settlement heights in requests are rounded down to a multiple of this.
const BLOCK_HEIGHT_ROUNDING: i64 = 20;

type Reply = oneshot::Sender<Result<KeysignSignature, TssError>>;

struct KeysignTask {
    pool_pubkey: String,
    msg: String,
    reply: Reply,
}

struct VersionCache {
    version: String,
    checked_at: Option<Instant>,
}

struct Inner {
    server: Arc<dyn TssServer>,
    bridge: Arc<dyn Bridge>,
    version: Mutex<VersionCache>,
    version_ttl: Duration,
}

impl Inner {
    /// The settlement-chain version, refreshed at most once per `version_ttl`. A failed
    /// refresh keeps the previous value.
    async fn current_version(&self) -> String {
        {
            let cache = self.version.lock();
            if let Some(at) = cache.checked_at {
                if !cache.version.is_empty() && at.elapsed() < self.version_ttl {
                    return cache.version.clone();
                }
            }
        }
        match self.bridge.get_version().await {
            Ok(v) => {
                let mut cache = self.version.lock();
                cache.version = v.clone();
                cache.checked_at = Some(Instant::now());
                v
            }
            Err(e) => {
                tracing::warn!(target: "tss", error = %e, "failed to get settlement chain version");
                self.version.lock().version.clone()
            }
        }
    }

    async fn sign_batch(&self, pool_pubkey: String, tasks: Vec<KeysignTask>) {
        let messages: Vec<String> = tasks.iter().map(|t| t.msg.clone()).collect();
        let version = self.current_version().await;
        let height = match self.bridge.get_block_height().await {
            Ok(h) => h,
            Err(e) => {
                fail_all(tasks, TssError::Bridge(e));
                return;
            }
        };
        let req = KeysignRequest {
            pool_pub_key: pool_pubkey,
            messages,
            block_height: height / BLOCK_HEIGHT_ROUNDING * BLOCK_HEIGHT_ROUNDING,
            version,
        };
        tracing::info!(
            target: "tss",
            pool_pub_key = %req.pool_pub_key,
            messages = req.messages.len(),
            block_height = req.block_height,
            "sending keysign request"
        );

        let resp = match self.server.key_sign(req).await {
            Ok(r) => r,
            Err(e) => {
                fail_all(tasks, e);
                return;
            }
        };

        if resp.status == KeysignStatus::Success && resp.blame.is_empty() {
            for task in tasks {
                let found = resp.signatures.iter().find(|s| s.msg == task.msg).cloned();
                let result = found.ok_or_else(|| TssError::MissingSignature(task.msg.clone()));
                // The requester may already have timed out.
                let _ = task.reply.send(result);
            }
            return;
        }

        tracing::warn!(
            target: "tss",
            round = %resp.blame.round,
            reason = %resp.blame.fail_reason,
            blamed = resp.blame.blame_nodes.len(),
            "keysign failed"
        );
        fail_all(tasks, TssError::from_blame(resp.blame));
    }
}

fn fail_all(tasks: Vec<KeysignTask>, err: TssError) {
    ferry_telemetry::error_metrics().inc_error("tss", err.code());
    for task in tasks {
        let _ = task.reply.send(Err(err.clone()));
    }
}

/// Takes the next batch for one key: at most [`MAX_KEYSIGN_PER_REQUEST`] tasks,
/// lowest messages first.
fn take_batch(pending: &mut Vec<KeysignTask>) -> Vec<KeysignTask> {
    pending.sort_by(|a, b| a.msg.cmp(&b.msg));
    let n = pending.len().min(MAX_KEYSIGN_PER_REQUEST);
    pending.drain(..n).collect()
}

/// Queues sign requests and batches them to a [`TssServer`].
pub struct TssSigner {
    inner: Arc<Inner>,
    task_tx: mpsc::UnboundedSender<KeysignTask>,
    task_rx: Mutex<Option<mpsc::UnboundedReceiver<KeysignTask>>>,
    keysign_timeout: Duration,
    dispatch_interval: Duration,
    shutdown_sender: Arc<watch::Sender<bool>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TssSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TssSigner")
            .field("keysign_timeout", &self.keysign_timeout)
            .field("dispatch_interval", &self.dispatch_interval)
            .finish_non_exhaustive()
    }
}

impl TssSigner {
    /// `version_ttl` bounds how long a fetched settlement version is reused; one
    /// settlement block time is the usual choice.
    pub fn new(
        server: Arc<dyn TssServer>,
        bridge: Arc<dyn Bridge>,
        keysign_timeout: Duration,
        dispatch_interval: Duration,
        version_ttl: Duration,
    ) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (shutdown_sender, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                server,
                bridge,
                version: Mutex::new(VersionCache {
                    version: String::new(),
                    checked_at: None,
                }),
                version_ttl,
            }),
            task_tx,
            task_rx: Mutex::new(Some(task_rx)),
            keysign_timeout,
            dispatch_interval,
            shutdown_sender: Arc::new(shutdown_sender),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the dispatcher. A second call is a no-op.
    pub fn start(&self) {
        let Some(mut task_rx) = self.task_rx.lock().take() else {
            return;
        };
        let inner = self.inner.clone();
        let mut shutdown_rx = self.shutdown_sender.subscribe();
        let dispatch_interval = self.dispatch_interval;

        let handle = tokio::spawn(async move {
            let mut pending: HashMap<String, Vec<KeysignTask>> = HashMap::new();
            let mut batches: Vec<JoinHandle<()>> = Vec::new();
            let mut interval =
                time::interval_at(time::Instant::now() + dispatch_interval, dispatch_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    task = task_rx.recv() => {
                        match task {
                            Some(t) => pending.entry(t.pool_pubkey.clone()).or_default().push(t),
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        pending.retain(|_, v| !v.is_empty());
                        for (key, tasks) in pending.iter_mut() {
                            let batch = take_batch(tasks);
                            let inner = inner.clone();
                            let key = key.clone();
                            batches.push(tokio::spawn(async move {
                                inner.sign_batch(key, batch).await;
                            }));
                        }
                        batches.retain(|h| !h.is_finished());
                    }
                }
            }
            for (_, tasks) in pending.drain() {
                fail_all(tasks, TssError::Stopped);
            }
            for h in batches {
                let _ = h.await;
            }
            tracing::info!(target: "tss", "keysign dispatcher stopped");
        });
        self.task_handles.lock().push(handle);
    }

    /// Signals the dispatcher to stop and waits for in-flight batches.
    pub async fn stop(&self) {
        let _ = self.shutdown_sender.send(true);
        let handles = std::mem::take(&mut *self.task_handles.lock());
        for h in handles {
            let _ = h.await;
        }
    }

    /// Signs `msg` with the vault key `pool_pubkey` through the TSS service.
    ///
    /// Returns the 64-byte low-S `R‖S` signature and the recovery id, or `None` when
    /// `msg` is empty or this node was not selected for the signing committee.
    pub async fn remote_sign(
        &self,
        msg: &[u8],
        pool_pubkey: &str,
    ) -> Result<Option<([u8; 64], Vec<u8>)>, TssError> {
        if msg.is_empty() {
            return Ok(None);
        }
        let encoded = B64.encode(msg);
        let (reply, rx) = oneshot::channel();
        self.task_tx
            .send(KeysignTask {
                pool_pubkey: pool_pubkey.to_string(),
                msg: encoded.clone(),
                reply,
            })
            .map_err(|_| TssError::Stopped)?;

        let sig = match time::timeout(self.keysign_timeout, rx).await {
            Err(_) => {
                tracing::warn!(target: "tss", msg = %encoded, "keysign timed out");
                return Err(TssError::Timeout {
                    secs: self.keysign_timeout.as_secs(),
                });
            }
            Ok(Err(_)) => return Err(TssError::Stopped),
            Ok(Ok(result)) => result?,
        };

        if sig.r.is_empty() && sig.s.is_empty() {
            tracing::debug!(target: "tss", msg = %encoded, "not part of the keysign committee");
            return Ok(None);
        }
        let compact = normalize_signature(&sig.r, &sig.s)?;
        let recovery_id = decode_recovery_id(&sig.recovery_id)?;
        Ok(Some((compact, recovery_id)))
    }
}

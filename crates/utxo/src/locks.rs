// Path: crates/utxo/src/locks.rs
use ferry_types::PubKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per vault, created on first use. Entries are never removed, since a
/// removed entry could still have waiters.
#[derive(Debug, Default)]
pub struct VaultLocks {
    locks: Mutex<HashMap<PubKey, Arc<AsyncMutex<()>>>>,
}

impl VaultLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, vault: &PubKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(vault.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits until no other ceremony holds `vault`.
    pub async fn lock(&self, vault: &PubKey) -> OwnedMutexGuard<()> {
        self.entry(vault).lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn serialises_per_vault_only() {
        let locks = Arc::new(VaultLocks::new());
        let a = PubKey::new("02aa");
        let b = PubKey::new("02bb");

        let held = locks.lock(&a).await;
        // Another vault is not blocked.
        let _other = tokio::time::timeout(Duration::from_millis(50), locks.lock(&b))
            .await
            .unwrap();

        let waiter = {
            let locks = locks.clone();
            let a = a.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&a).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 2);
    }
}

//! The node-local key-value store. Entries are immutable once written:
//! `put` is first-writer-wins, and keys leave only by being transferred to
//! another node.

use std::collections::HashMap;

use tokio::sync::{RwLock, RwLockWriteGuard};

use chordal_types::ChordError;

#[derive(Default)]
pub(crate) struct KvStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl KvStore {
    pub fn new() -> Self {
        KvStore::default()
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ChordError> {
        self.inner
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(ChordError::KeyNotFound)
    }

    /// First-writer-wins insert. The existence check runs under the shared
    /// lock and is repeated after the upgrade, so of two racing writers
    /// exactly one succeeds and the other sees `KeyExists`.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), ChordError> {
        {
            let map = self.inner.read().await;
            if map.contains_key(key) {
                return Err(ChordError::KeyExists);
            }
        }
        let mut map = self.inner.write().await;
        if map.contains_key(key) {
            return Err(ChordError::KeyExists);
        }
        map.insert(key.to_string(), value);
        Ok(())
    }

    /// Exclusive guard over the whole map, held across a transfer-out scan
    /// so puts block for its duration.
    pub async fn transfer_guard(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<u8>>> {
        self.inner.write().await
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_key() {
        let store = KvStore::new();
        assert!(matches!(store.get("nope").await, Err(ChordError::KeyNotFound)));
        // The failed read must not create an entry.
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = KvStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn second_put_is_rejected() {
        let store = KvStore::new();
        store.put("k", b"v1".to_vec()).await.unwrap();
        assert!(matches!(
            store.put("k", b"v2".to_vec()).await,
            Err(ChordError::KeyExists)
        ));
        // First write survives untouched.
        assert_eq!(store.get("k").await.unwrap(), b"v1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_puts_elect_one_winner() {
        use std::sync::Arc;

        let store = Arc::new(KvStore::new());
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put("contested", vec![i]).await.is_ok()
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn random_keys_round_trip() {
        use rand::distributions::{Alphanumeric, DistString};

        let store = KvStore::new();
        let mut keys = Vec::new();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let key = Alphanumeric.sample_string(&mut rng, 12);
            if store.put(&key, key.as_bytes().to_vec()).await.is_ok() {
                keys.push(key);
            }
        }

        for key in &keys {
            assert_eq!(store.get(key).await.unwrap(), key.as_bytes());
        }
    }

    #[tokio::test]
    async fn transfer_guard_blocks_puts() {
        use std::sync::Arc;
        use std::time::Duration;

        let store = Arc::new(KvStore::new());
        let guard = store.transfer_guard().await;

        let racer = {
            let store = store.clone();
            tokio::spawn(async move { store.put("k", b"v".to_vec()).await })
        };

        // The racing put cannot make progress while the guard is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!racer.is_finished());

        drop(guard);
        racer.await.unwrap().unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");
    }
}

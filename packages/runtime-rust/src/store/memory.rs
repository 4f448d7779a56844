//! In-memory [`CallContextStore`] backed by a locked [`HashMap`].
//!
//! Nothing survives the process. The single map lock is held across every
//! check-then-act sequence, so a context is handed out at most once even under
//! concurrent restores.

use std::collections::HashMap;

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, CallContext, ErrorKind};
use parking_lot::Mutex;
use tracing::debug;

use super::{check_key, CallContextStore};

#[derive(Debug, Default)]
pub struct MemoryContextStore {
    entries: Mutex<HashMap<String, CallContext>>,
}

impl MemoryContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CallContextStore for MemoryContextStore {
    async fn store(&self, ctx: &CallContext) -> BusResult<String> {
        let key = ctx.key();
        check_key(&key)?;
        if self.entries.lock().insert(key.clone(), ctx.clone()).is_some() {
            debug!(key = %key, "replaced call context stored under the same key");
        }
        Ok(key)
    }

    async fn restore(&self, key: &str) -> BusResult<CallContext> {
        check_key(key)?;
        self.entries
            .lock()
            .remove(key)
            .ok_or_else(|| BusError::not_found(ErrorKind::IllegalInput, key))
    }

    async fn remove(&self, key: &str) -> BusResult<()> {
        check_key(key)?;
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::testing::full_context;

    #[tokio::test]
    async fn restore_returns_stored_context_once() {
        let store = MemoryContextStore::new();
        let ctx = full_context("msg:1");

        let key = store.store(&ctx).await.unwrap();
        assert_eq!(key, ctx.key());
        assert_eq!(store.restore(&key).await.unwrap(), ctx);

        let err = store.restore(&key).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::IllegalInput);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn remove_discards_context() {
        let store = MemoryContextStore::new();
        let key = store.store(&full_context("msg:2")).await.unwrap();
        store.remove(&key).await.unwrap();
        assert!(store.restore(&key).await.unwrap_err().is_not_found());
        // Removing twice is harmless.
        store.remove(&key).await.unwrap();
    }

    #[tokio::test]
    async fn same_pair_overwrites_previous_context() {
        let store = MemoryContextStore::new();
        let first = full_context("msg:3");
        let mut second = full_context("msg:3");
        second.operation = Some("refund".into());

        store.store(&first).await.unwrap();
        let key = store.store(&second).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.restore(&key).await.unwrap().operation.as_deref(), Some("refund"));
    }

    #[tokio::test]
    async fn concurrent_restores_hand_out_context_once() {
        let store = Arc::new(MemoryContextStore::new());
        let key = store.store(&full_context("msg:4")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move { store.restore(&key).await.is_ok() }));
        }

        let mut restored = 0;
        for handle in handles {
            if handle.await.unwrap() {
                restored += 1;
            }
        }
        assert_eq!(restored, 1);
    }
}

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;

use crate::backend::{
    Acl, Coordinator, CreateMode, MemoryEnsemble, MemorySession, Stat, Version, Watch,
};
use crate::{Error, NodeSync, Result};

/// Counts down injected failures, returning true while one should fire
fn take(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// Wraps a backend and injects transient failures
///
/// Failed `exists` and `create` calls report `ConnectionLoss`. A lost create
/// reply applies the create on the backend first and then reports
/// `ConnectionLoss`, like a reply that never made it back over the wire.
#[derive(Debug)]
pub struct FlakyCoordinator {
    inner: Arc<dyn Coordinator>,
    exists_failures: AtomicU32,
    create_failures: AtomicU32,
    lost_create_replies: AtomicU32,
    exists_calls: AtomicU32,
    create_calls: AtomicU32,
}

impl FlakyCoordinator {
    pub fn new(inner: Arc<dyn Coordinator>) -> Self {
        Self {
            inner,
            exists_failures: AtomicU32::new(0),
            create_failures: AtomicU32::new(0),
            lost_create_replies: AtomicU32::new(0),
            exists_calls: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_exists(&self, times: u32) {
        self.exists_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_create(&self, times: u32) {
        self.create_failures.store(times, Ordering::SeqCst);
    }

    pub fn lose_create_replies(&self, times: u32) {
        self.lost_create_replies.store(times, Ordering::SeqCst);
    }

    pub fn exists_calls(&self) -> u32 {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Coordinator for FlakyCoordinator {
    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.exists_failures) {
            return Err(Error::ConnectionLoss);
        }
        self.inner.exists(path).await
    }

    async fn create(
        &self,
        path: &str,
        data: Bytes,
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.create_failures) {
            return Err(Error::ConnectionLoss);
        }
        let created = self.inner.create(path, data, acl, mode).await?;
        if take(&self.lost_create_replies) {
            return Err(Error::ConnectionLoss);
        }
        Ok(created)
    }

    async fn get(&self, path: &str) -> Result<(Bytes, Stat)> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, data: Bytes, version: Version) -> Result<Stat> {
        self.inner.set(path, data, version).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.inner.children(path).await
    }

    async fn delete(&self, path: &str, version: Version) -> Result<()> {
        self.inner.delete(path, version).await
    }

    async fn exists_watch(&self, path: &str) -> Result<(Option<Stat>, Watch)> {
        self.inner.exists_watch(path).await
    }
}

/// One `NodeSync` per fresh session, all rooted at `root_path`
///
/// The raw sessions are returned too so tests can close or expire them.
pub async fn ensemble_sessions(
    ensemble: &MemoryEnsemble,
    root_path: &str,
    count: usize,
) -> Result<Vec<(Arc<MemorySession>, NodeSync)>> {
    let handles = (0..count).map(|_| async {
        let session = Arc::new(ensemble.connect());
        let sync = NodeSync::new(session.clone(), root_path).await?;
        Ok::<_, Error>((session, sync))
    });
    join_all(handles).await.into_iter().collect()
}

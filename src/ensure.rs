// Recursive, race-tolerant namespace creation
//
// Many processes may ensure overlapping paths at once. The only postcondition
// that matters is that every prefix exists afterwards, not who created it, so
// losing a creation race is just another reason to look again.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::backend::{Acl, Coordinator, CreateMode};
use crate::path::prefixes;
use crate::retry::{Attempt, RetryPolicy};
use crate::{NodeSync, Result};

/// Make sure `path` and all of its ancestors exist
///
/// Session expiry and other fatal errors abort at once. Everything else,
/// including a racer creating the node first, is retried under `retry`.
pub async fn ensure_path(
    backend: &dyn Coordinator,
    path: &str,
    acl: &[Acl],
    retry: &RetryPolicy,
) -> Result<()> {
    for prefix in prefixes(path)? {
        let node = prefix.as_str();
        retry
            .run(node, move || ensure_node(backend, node, acl))
            .await?;
    }
    Ok(())
}

async fn ensure_node(backend: &dyn Coordinator, path: &str, acl: &[Acl]) -> Attempt<()> {
    match backend.exists(path).await {
        Ok(Some(_)) => return Attempt::Done(()),
        Ok(None) => {}
        Err(err) => return Attempt::classify(Err(err)),
    }

    match backend
        .create(path, Bytes::new(), acl, CreateMode::Persistent)
        .await
    {
        Ok(created) => {
            debug!("created namespace node {}", created);
            Attempt::Done(())
        }
        Err(err) => {
            trace!("create of {} failed, checking again: {}", path, err);
            Attempt::classify(Err(err))
        }
    }
}

impl NodeSync {
    /// Ensure an absolute path with this session's ACL and retry policy
    pub async fn ensure_path(&self, path: &str) -> Result<()> {
        ensure_path(
            self.backend.as_ref(),
            path,
            &self.config.acl,
            &self.config.retry,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryEnsemble;
    use crate::test_utils::FlakyCoordinator;
    use crate::Error;
    use std::sync::Arc;

    fn open() -> Vec<Acl> {
        vec![Acl::open_unsafe()]
    }

    #[tokio::test]
    async fn test_creates_every_prefix() {
        let session = MemoryEnsemble::new().connect();
        ensure_path(&session, "/a/b/c", &open(), &RetryPolicy::default())
            .await
            .unwrap();
        for path in ["/a", "/a/b", "/a/b/c"] {
            assert!(session.exists(path).await.unwrap().is_some(), "{path} missing");
        }
    }

    #[tokio::test]
    async fn test_idempotent() {
        let session = MemoryEnsemble::new().connect();
        let retry = RetryPolicy::bounded(1);
        ensure_path(&session, "/x/y", &open(), &retry).await.unwrap();
        ensure_path(&session, "/x/y", &open(), &retry).await.unwrap();
        ensure_path(&session, "/x", &open(), &retry).await.unwrap();
    }

    #[tokio::test]
    async fn test_root_and_empty_segments() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        ensure_path(&session, "/", &open(), &RetryPolicy::default())
            .await
            .unwrap();
        ensure_path(&session, "//m//n/", &open(), &RetryPolicy::default())
            .await
            .unwrap();
        assert!(session.exists("/m/n").await.unwrap().is_some());
        assert_eq!(ensemble.node_count(), 3);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_relative() {
        let session = MemoryEnsemble::new().connect();
        let retry = RetryPolicy::default();
        assert!(matches!(
            ensure_path(&session, "", &open(), &retry).await,
            Err(Error::InvalidPath { .. })
        ));
        assert!(matches!(
            ensure_path(&session, "rel/path", &open(), &retry).await,
            Err(Error::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_absorbs_transient_failures() {
        let ensemble = MemoryEnsemble::new();
        let flaky = FlakyCoordinator::new(Arc::new(ensemble.connect()));
        flaky.fail_exists(3);
        flaky.fail_create(2);

        ensure_path(&flaky, "/t/u", &open(), &RetryPolicy::default())
            .await
            .unwrap();

        let session = ensemble.connect();
        assert!(session.exists("/t/u").await.unwrap().is_some());
        assert!(flaky.exists_calls() > 3);
    }

    #[tokio::test]
    async fn test_lost_create_reply_is_harmless() {
        let ensemble = MemoryEnsemble::new();
        let flaky = FlakyCoordinator::new(Arc::new(ensemble.connect()));
        flaky.lose_create_replies(1);

        ensure_path(&flaky, "/lost", &open(), &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(flaky.create_calls(), 1);
        assert_eq!(ensemble.node_count(), 2);
    }

    #[tokio::test]
    async fn test_session_expiry_is_fatal() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        ensemble.expire(session.id());
        let result = ensure_path(&session, "/gone", &open(), &RetryPolicy::default()).await;
        assert!(matches!(result, Err(Error::SessionExpired)));
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let ensemble = MemoryEnsemble::new();
        let flaky = FlakyCoordinator::new(Arc::new(ensemble.connect()));
        flaky.fail_exists(10);
        let result = ensure_path(&flaky, "/b", &open(), &RetryPolicy::bounded(4)).await;
        assert!(matches!(
            result,
            Err(Error::RetriesExhausted { attempts: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_creators_converge() {
        let ensemble = MemoryEnsemble::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = ensemble.connect();
            handles.push(tokio::spawn(async move {
                ensure_path(&session, "/race/deep/path", &open(), &RetryPolicy::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ensemble.node_count(), 4);
    }
}

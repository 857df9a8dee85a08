// Single-node value store
//
// Reads and upserts of one leaf payload below the root. Writes are guarded by
// the version observed just before them; a concurrent writer in between
// makes the write fail with `BadVersion` instead of being overwritten.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use crate::backend::ANY_VERSION;
use crate::{NodeSync, Result};

impl NodeSync {
    /// Payload stored at `root/where/key`
    ///
    /// Missing nodes and backend failures are returned as they are.
    pub async fn fetch(&self, where_: &str, key: &str) -> Result<Bytes> {
        let path = self.resolve(&[where_, key]);
        let (data, _) = self.backend.get(&path).await?;
        Ok(data)
    }

    /// Replace the payload at `root/where/key` and return the previous one
    ///
    /// The node is created when absent, in which case the previous payload is
    /// empty. Version conflicts are not retried.
    pub async fn fetch_and_set(
        &self,
        where_: &str,
        key: &str,
        value: impl Into<Bytes>,
    ) -> Result<Bytes> {
        let path = self.resolve(&[where_, key]);
        self.ensure_path(&path).await?;

        let (old, version) = match self.backend.get(&path).await {
            Ok((data, stat)) => (data, stat.version),
            Err(err) => {
                trace!("read of {} failed, writing unconditionally: {}", path, err);
                (Bytes::new(), ANY_VERSION)
            }
        };

        let stat = self.backend.set(&path, value.into(), version).await?;
        debug!("stored {} at version {}", path, stat.version);
        Ok(old)
    }

    /// `fetch` decoded from JSON
    pub async fn fetch_json<T: DeserializeOwned>(&self, where_: &str, key: &str) -> Result<T> {
        let data = self.fetch(where_, key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// `fetch_and_set` with JSON encoding
    ///
    /// Returns `None` when there was no previous payload.
    pub async fn fetch_and_set_json<T>(&self, where_: &str, key: &str, value: &T) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let encoded = serde_json::to_vec(value)?;
        let old = self.fetch_and_set(where_, key, encoded).await?;
        if old.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&old)?))
    }
}

// Coordination backend contract
//
// Everything above this module talks to the backend through `Coordinator`.
// The model is ZooKeeper's: a tree of versioned nodes, sequential and
// ephemeral creation, and one-shot existence watches.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{Error, Result};

pub mod memory;

pub use memory::{MemoryEnsemble, MemorySession};

/// Data version of a node
pub type Version = i32;

/// Expected version that matches any current version
pub const ANY_VERSION: Version = -1;

/// Identifier of a backend session
pub type SessionId = u64;

/// Node metadata returned alongside existence checks and reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Number of writes to the node's payload
    pub version: Version,
    /// Number of changes to the node's children
    pub cversion: Version,
    pub num_children: u32,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<SessionId>,
    /// Transaction that created the node
    pub czxid: u64,
    /// Transaction that last modified the node
    pub mzxid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Permission bits of an ACL entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Perms(pub u32);

impl Perms {
    pub const READ: Perms = Perms(1);
    pub const WRITE: Perms = Perms(1 << 1);
    pub const CREATE: Perms = Perms(1 << 2);
    pub const DELETE: Perms = Perms(1 << 3);
    pub const ADMIN: Perms = Perms(1 << 4);
    pub const ALL: Perms = Perms(0x1f);

    pub fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Perms {
    type Output = Perms;

    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub perms: Perms,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    /// World readable and writable
    ///
    /// Only suitable inside a private, trusted network. This is not a security
    /// boundary.
    pub fn open_unsafe() -> Self {
        Self {
            perms: Perms::ALL,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// The watching session expired before the node changed
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub path: String,
}

/// One-shot subscription to the next change of a node
///
/// Delivers at most one event. A fresh watch has to be installed to keep
/// observing the node.
#[derive(Debug)]
pub struct Watch {
    rx: oneshot::Receiver<WatchedEvent>,
}

impl Watch {
    /// Pair a watch with the sender a backend keeps to trigger it
    pub fn channel() -> (oneshot::Sender<WatchedEvent>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for the event
    ///
    /// Fails with `ConnectionClosed` if the backend dropped the subscription.
    pub async fn fired(self) -> Result<WatchedEvent> {
        self.rx.await.map_err(|_| Error::ConnectionClosed)
    }
}

#[async_trait]
pub trait Coordinator: Send + Sync + std::fmt::Debug {
    /// `Ok(None)` when the node does not exist
    async fn exists(&self, path: &str) -> Result<Option<Stat>>;

    /// Create a node and return its actual path
    ///
    /// Sequential modes append a zero-padded 10-digit counter to `path`.
    async fn create(&self, path: &str, data: Bytes, acl: &[Acl], mode: CreateMode)
        -> Result<String>;

    async fn get(&self, path: &str) -> Result<(Bytes, Stat)>;

    /// Replace the payload if the node is at `version` (or `ANY_VERSION`)
    async fn set(&self, path: &str, data: Bytes, version: Version) -> Result<Stat>;

    /// Leaf names of the node's children
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn delete(&self, path: &str, version: Version) -> Result<()>;

    /// Existence check that also installs a one-shot watch on `path`
    async fn exists_watch(&self, path: &str) -> Result<(Option<Stat>, Watch)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mode_flags() {
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(!CreateMode::Ephemeral.is_sequential());
    }

    #[test]
    fn test_open_acl_grants_everything() {
        let acl = Acl::open_unsafe();
        assert!(acl.perms.contains(Perms::READ | Perms::WRITE | Perms::ADMIN));
        assert_eq!(acl.scheme, "world");
    }

    #[tokio::test]
    async fn test_watch_reports_dropped_sender() {
        let (tx, watch) = Watch::channel();
        drop(tx);
        assert!(matches!(watch.fired().await, Err(Error::ConnectionClosed)));
    }
}

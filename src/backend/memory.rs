// In-process coordination backend
//
// Implements the ZooKeeper data model inside one process so that several
// sessions can race against the same tree. Sessions stand in for separate
// client processes: closing or expiring one deletes its ephemeral nodes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::{
    Acl, Coordinator, CreateMode, EventKind, SessionId, Stat, Version, Watch, WatchedEvent,
    ANY_VERSION,
};
use crate::{Error, Result};

/// Width of the counter appended to sequential nodes
const SEQUENCE_DIGITS: usize = 10;

#[derive(Debug)]
struct Znode {
    data: Bytes,
    stat: Stat,
    #[allow(dead_code)]
    acl: Vec<Acl>,
    children: BTreeSet<String>,
    /// Last counter handed to a sequential child
    sequence: u64,
}

impl Znode {
    fn new(data: Bytes, acl: Vec<Acl>, zxid: u64, owner: Option<SessionId>) -> Self {
        Self {
            data,
            stat: Stat {
                ephemeral_owner: owner,
                czxid: zxid,
                mzxid: zxid,
                ..Stat::default()
            },
            acl,
            children: BTreeSet::new(),
            sequence: 0,
        }
    }
}

#[derive(Debug)]
struct Watcher {
    session: SessionId,
    tx: oneshot::Sender<WatchedEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed,
    Expired,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<String, Znode>,
    watches: HashMap<String, Vec<Watcher>>,
    sessions: HashMap<SessionId, SessionState>,
    ephemerals: HashMap<SessionId, BTreeSet<String>>,
    zxid: u64,
    last_session: SessionId,
}

fn validate(path: &str) -> Result<()> {
    let invalid = |reason| {
        Err(Error::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if !path.starts_with('/') {
        return invalid("path must be absolute");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("path must not end with '/'");
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return invalid("empty path segment"),
            "." | ".." => return invalid("relative path segment"),
            _ => {}
        }
    }
    Ok(())
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn leaf_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn check_version(path: &str, expected: Version, actual: Version) -> Result<()> {
    if expected != ANY_VERSION && expected != actual {
        return Err(Error::BadVersion {
            path: path.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Znode::new(Bytes::new(), Vec::new(), 0, None));
        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashMap::new(),
            ephemerals: HashMap::new(),
            zxid: 0,
            last_session: 0,
        }
    }

    fn check_session(&self, session: SessionId) -> Result<()> {
        match self.sessions.get(&session) {
            Some(SessionState::Open) => Ok(()),
            Some(SessionState::Expired) => Err(Error::SessionExpired),
            Some(SessionState::Closed) | None => Err(Error::ConnectionClosed),
        }
    }

    fn node(&self, path: &str) -> Result<&Znode> {
        self.nodes.get(path).ok_or_else(|| Error::NoNode {
            path: path.to_string(),
        })
    }

    fn fire(&mut self, path: &str, kind: EventKind) {
        if let Some(watchers) = self.watches.remove(path) {
            trace!("firing {} watches on {} ({:?})", watchers.len(), path, kind);
            for watcher in watchers {
                let _ = watcher.tx.send(WatchedEvent {
                    kind,
                    path: path.to_string(),
                });
            }
        }
    }

    fn next_zxid(&mut self) -> u64 {
        self.zxid += 1;
        self.zxid
    }

    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        data: Bytes,
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        self.check_session(session)?;
        // sequential names may end with '/', the suffix completes them
        let requested = match path.strip_suffix('/') {
            Some(trimmed) if mode.is_sequential() && !trimmed.is_empty() => trimmed,
            _ => path,
        };
        validate(requested)?;
        if path == "/" {
            return Err(Error::NodeExists {
                path: path.to_string(),
            });
        }

        let parent_path = parent_of(path).to_string();
        let parent = self
            .nodes
            .get_mut(&parent_path)
            .ok_or_else(|| Error::NoNode {
                path: path.to_string(),
            })?;
        if parent.stat.ephemeral_owner.is_some() {
            return Err(Error::NoChildrenForEphemerals { path: parent_path });
        }

        let full_path = if mode.is_sequential() {
            parent.sequence += 1;
            format!("{}{:0width$}", path, parent.sequence, width = SEQUENCE_DIGITS)
        } else {
            path.to_string()
        };
        validate(&full_path)?;
        if self.nodes.contains_key(&full_path) {
            return Err(Error::NodeExists { path: full_path });
        }

        let zxid = self.next_zxid();
        let owner = mode.is_ephemeral().then_some(session);
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.insert(leaf_of(&full_path).to_string());
            parent.stat.cversion += 1;
            parent.stat.num_children += 1;
        }
        self.nodes
            .insert(full_path.clone(), Znode::new(data, acl.to_vec(), zxid, owner));
        if owner.is_some() {
            self.ephemerals
                .entry(session)
                .or_default()
                .insert(full_path.clone());
        }

        self.fire(&full_path, EventKind::NodeCreated);
        Ok(full_path)
    }

    fn remove(&mut self, path: &str) {
        let Some(node) = self.nodes.remove(path) else {
            return;
        };
        if let Some(owner) = node.stat.ephemeral_owner {
            if let Some(owned) = self.ephemerals.get_mut(&owner) {
                owned.remove(path);
            }
        }
        let parent_path = parent_of(path).to_string();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.remove(leaf_of(path));
            parent.stat.cversion += 1;
            parent.stat.num_children = parent.stat.num_children.saturating_sub(1);
        }
        self.fire(path, EventKind::NodeDeleted);
    }

    fn delete(&mut self, session: SessionId, path: &str, version: Version) -> Result<()> {
        self.check_session(session)?;
        validate(path)?;
        if path == "/" {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "the root node cannot be deleted",
            });
        }
        let node = self.node(path)?;
        check_version(path, version, node.stat.version)?;
        if !node.children.is_empty() {
            return Err(Error::NotEmpty {
                path: path.to_string(),
            });
        }
        self.next_zxid();
        self.remove(path);
        Ok(())
    }

    fn set(&mut self, session: SessionId, path: &str, data: Bytes, version: Version) -> Result<Stat> {
        self.check_session(session)?;
        validate(path)?;
        let zxid = self.zxid + 1;
        let node = self.nodes.get_mut(path).ok_or_else(|| Error::NoNode {
            path: path.to_string(),
        })?;
        check_version(path, version, node.stat.version)?;
        node.data = data;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        let stat = node.stat;
        self.zxid = zxid;
        self.fire(path, EventKind::NodeDataChanged);
        Ok(stat)
    }

    fn get(&self, session: SessionId, path: &str) -> Result<(Bytes, Stat)> {
        self.check_session(session)?;
        validate(path)?;
        let node = self.node(path)?;
        Ok((node.data.clone(), node.stat))
    }

    fn exists(&self, session: SessionId, path: &str) -> Result<Option<Stat>> {
        self.check_session(session)?;
        validate(path)?;
        Ok(self.nodes.get(path).map(|node| node.stat))
    }

    fn children(&self, session: SessionId, path: &str) -> Result<Vec<String>> {
        self.check_session(session)?;
        validate(path)?;
        Ok(self.node(path)?.children.iter().cloned().collect())
    }

    fn exists_watch(&mut self, session: SessionId, path: &str) -> Result<(Option<Stat>, Watch)> {
        let stat = self.exists(session, path)?;
        let (tx, watch) = Watch::channel();
        self.watches
            .entry(path.to_string())
            .or_default()
            .push(Watcher { session, tx });
        Ok((stat, watch))
    }

    fn end_session(&mut self, session: SessionId, state: SessionState) {
        match self.sessions.get(&session) {
            Some(SessionState::Open) => {}
            _ => return,
        }
        self.sessions.insert(session, state);

        // the ending session's own watches never see the cleanup below
        let mut orphaned = Vec::new();
        for (path, watchers) in self.watches.iter_mut() {
            let (own, others): (Vec<_>, Vec<_>) = watchers
                .drain(..)
                .partition(|watcher| watcher.session == session);
            *watchers = others;
            orphaned.extend(own.into_iter().map(|watcher| (path.clone(), watcher)));
        }
        self.watches.retain(|_, watchers| !watchers.is_empty());
        if state == SessionState::Expired {
            for (path, watcher) in orphaned {
                let _ = watcher.tx.send(WatchedEvent {
                    kind: EventKind::SessionExpired,
                    path,
                });
            }
        }

        let owned = self.ephemerals.remove(&session).unwrap_or_default();
        debug!(
            "session {} ended ({:?}), removing {} ephemeral nodes",
            session,
            state,
            owned.len()
        );
        for path in owned {
            self.next_zxid();
            self.remove(&path);
        }
    }
}

/// A shared in-memory tree that sessions connect to
#[derive(Debug, Clone)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Open a new session against the tree
    pub fn connect(&self) -> MemorySession {
        let mut tree = self.tree.lock();
        tree.last_session += 1;
        let id = tree.last_session;
        tree.sessions.insert(id, SessionState::Open);
        MemorySession {
            id,
            tree: self.tree.clone(),
        }
    }

    /// Expire a session as if its heartbeats had stopped
    ///
    /// Ephemeral nodes of the session are deleted, its pending watches receive
    /// `SessionExpired` and every later call on it fails with `SessionExpired`.
    pub fn expire(&self, session: SessionId) {
        self.tree.lock().end_session(session, SessionState::Expired);
    }

    /// Number of nodes in the tree, root included
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

/// One client session of a [`MemoryEnsemble`]
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    tree: Arc<Mutex<Tree>>,
}

impl MemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Close the session cleanly, deleting its ephemeral nodes
    pub fn close(&self) {
        self.tree.lock().end_session(self.id, SessionState::Closed);
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.tree.lock().exists(self.id, path)
    }

    async fn create(
        &self,
        path: &str,
        data: Bytes,
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        self.tree.lock().create(self.id, path, data, acl, mode)
    }

    async fn get(&self, path: &str) -> Result<(Bytes, Stat)> {
        self.tree.lock().get(self.id, path)
    }

    async fn set(&self, path: &str, data: Bytes, version: Version) -> Result<Stat> {
        self.tree.lock().set(self.id, path, data, version)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.tree.lock().children(self.id, path)
    }

    async fn delete(&self, path: &str, version: Version) -> Result<()> {
        self.tree.lock().delete(self.id, path, version)
    }

    async fn exists_watch(&self, path: &str) -> Result<(Option<Stat>, Watch)> {
        self.tree.lock().exists_watch(self.id, path)
    }
}

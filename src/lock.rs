// Fair distributed lock on ephemeral sequential nodes
//
// A lock is a directory. Each request is an ephemeral sequential child, the
// ticket. The alive ticket with the lowest sequence holds the lock; every
// other ticket watches only the ticket right before it. Queue positions are
// always recomputed from the backend, never cached.
//
// UNLOCKED -> enqueue -> QUEUED -> await_head -> HOLDING -> release -> UNLOCKED

use bytes::Bytes;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::backend::{CreateMode, EventKind, ANY_VERSION};
use crate::path::{join, leaf};
use crate::retry::Attempt;
use crate::sequence::{sequence_number, sort_children};
use crate::{Error, NodeSync, Result};

/// Marks protected node names so a client can find its own node again
const PROTECTED_PREFIX: &str = "_c_";

/// A queued lock request
///
/// Owned by the session that created it; the backend drops the node when
/// that session ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    dir: String,
    name: String,
}

impl Ticket {
    /// Rebuild a ticket from its lock directory and node name
    pub fn new(dir: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// Absolute path of the lock directory
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Node name, including the backend's sequence suffix
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> String {
        join(&self.dir, &[&self.name])
    }

    pub fn sequence(&self, width: usize) -> Option<u64> {
        sequence_number(&self.name, width)
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl NodeSync {
    /// Ticket handle for a node name returned by an earlier `enqueue`
    pub fn ticket(&self, where_: &str, name: &str) -> Ticket {
        Ticket::new(self.resolve(&[where_]), name)
    }

    /// Join the queue of the lock at `where`
    ///
    /// Never waits for the lock. The ticket is created protected: if the
    /// create reply is lost, the directory is searched for the node before
    /// trying again, so one call never leaves two tickets behind.
    pub async fn enqueue(&self, where_: &str) -> Result<Ticket> {
        let dir = self.resolve(&[where_]);
        self.ensure_path(&dir).await?;

        let guid = format!("{}{}-", PROTECTED_PREFIX, Uuid::new_v4().simple());
        let requested = join(&dir, &[format!("{}{}", guid, self.config.lock_node_prefix)]);

        let (in_dir, marker, target) = (dir.as_str(), guid.as_str(), requested.as_str());
        let name = self
            .config
            .retry
            .run(target, move || self.create_protected(in_dir, marker, target))
            .await?;

        let ticket = Ticket { dir, name };
        debug!("enqueued {}", ticket);
        Ok(ticket)
    }

    async fn create_protected(&self, dir: &str, guid: &str, requested: &str) -> Attempt<String> {
        let lost = match self
            .backend
            .create(
                requested,
                Bytes::new(),
                &self.config.acl,
                CreateMode::EphemeralSequential,
            )
            .await
        {
            Ok(created) => return Attempt::Done(leaf(&created).to_string()),
            Err(err @ Error::ConnectionLoss) => err,
            Err(err) => return Attempt::Fatal(err),
        };

        // the create may have landed before the connection dropped
        match self.backend.children(dir).await {
            Ok(children) => match children.into_iter().find(|name| name.starts_with(guid)) {
                Some(name) => {
                    trace!("adopted {} after lost create reply", name);
                    Attempt::Done(name)
                }
                None => Attempt::Retry(lost),
            },
            Err(Error::ConnectionLoss) => Attempt::Retry(lost),
            Err(err) => Attempt::Fatal(err),
        }
    }

    /// Current queue of the lock at `where`, head first
    pub async fn queue(&self, where_: &str) -> Result<Vec<String>> {
        self.sorted_queue(&self.resolve(&[where_])).await
    }

    async fn sorted_queue(&self, dir: &str) -> Result<Vec<String>> {
        let children = self.backend.children(dir).await?;
        Ok(sort_children(children, self.config.sequence_width))
    }

    /// Whether `ticket` currently holds its lock
    pub async fn is_head(&self, ticket: &Ticket) -> Result<bool> {
        let queue = self.sorted_queue(&ticket.dir).await?;
        Ok(queue.first().is_some_and(|head| head == &ticket.name))
    }

    /// Wait until `ticket` is the head of its queue
    ///
    /// Only the immediate predecessor is watched. When it disappears the queue
    /// is read again, since a predecessor that was itself still waiting may
    /// have vanished with its session. There is no timeout.
    pub async fn await_head(&self, ticket: &Ticket) -> Result<()> {
        loop {
            let queue = self.sorted_queue(&ticket.dir).await?;
            let position = queue
                .iter()
                .position(|name| name == &ticket.name)
                .ok_or_else(|| Error::TicketNotQueued {
                    dir: ticket.dir.clone(),
                    ticket: ticket.name.clone(),
                })?;

            if position == 0 {
                debug!("{} is head of its queue", ticket);
                return Ok(());
            }

            let predecessor = join(&ticket.dir, &[&queue[position - 1]]);
            debug!("{} waiting on {}", ticket, predecessor);
            self.await_deletion(&predecessor).await?;
        }
    }

    async fn await_deletion(&self, path: &str) -> Result<()> {
        loop {
            let (stat, watch) = self.backend.exists_watch(path).await?;
            if stat.is_none() {
                return Ok(());
            }
            let event = watch.fired().await?;
            trace!("watch on {} fired: {:?}", path, event.kind);
            match event.kind {
                EventKind::NodeDeleted => return Ok(()),
                EventKind::SessionExpired => return Err(Error::SessionExpired),
                _ => {}
            }
        }
    }

    /// Give up `ticket`, whether it held the lock or was still queued
    ///
    /// A failed delete is returned: the lock may still be held by a ticket
    /// the caller believes gone.
    pub async fn release(&self, ticket: Ticket) -> Result<()> {
        self.backend.delete(&ticket.path(), ANY_VERSION).await?;
        debug!("released {}", ticket);
        Ok(())
    }

    /// Wait for `ticket` to reach the head of the queue, then release it
    ///
    /// An empty queue means there is nothing to release and returns at once.
    pub async fn await_and_release(&self, ticket: Ticket) -> Result<()> {
        let queue = self.sorted_queue(&ticket.dir).await?;
        let Some(head) = queue.first() else {
            debug!("queue {} is empty, nothing to release", ticket.dir);
            return Ok(());
        };
        if head != &ticket.name {
            self.await_head(&ticket).await?;
        }
        self.release(ticket).await
    }

    /// Enqueue and wait until the lock at `where` is held
    ///
    /// If waiting fails the ticket is withdrawn so it does not block the
    /// queue for the rest of the session.
    pub async fn lock(&self, where_: &str) -> Result<Ticket> {
        let ticket = self.enqueue(where_).await?;
        if let Err(err) = self.await_head(&ticket).await {
            if let Err(cleanup) = self.release(ticket.clone()).await {
                warn!("could not withdraw {}: {}", ticket, cleanup);
            }
            return Err(err);
        }
        Ok(ticket)
    }
}

pub use bytes::Bytes;
pub use std::sync::Arc;

pub use crate::backend::{
    Acl, Coordinator, CreateMode, EventKind, MemoryEnsemble, MemorySession, Perms, Stat,
    WatchedEvent, ANY_VERSION,
};
pub use crate::config::Config;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::lock::Ticket;
pub use crate::retry::RetryPolicy;
pub use crate::sequence::{sort_children, SEQUENCE_WIDTH};
pub use crate::NodeSync;

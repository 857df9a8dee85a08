use thiserror::Error;

use crate::backend::Version;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session expired")]
    SessionExpired,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection lost before the reply arrived")]
    ConnectionLoss,

    #[error("Node {path:?} does not exist")]
    NoNode { path: String },

    #[error("Node {path:?} already exists")]
    NodeExists { path: String },

    #[error("Version conflict on {path:?}: expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: Version,
        actual: Version,
    },

    #[error("Node {path:?} has children")]
    NotEmpty { path: String },

    #[error("Ephemeral node {path:?} cannot have children")]
    NoChildrenForEphemerals { path: String },

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Ticket {ticket:?} is not queued under {dir:?}")]
    TicketNotQueued { dir: String, ticket: String },

    #[error("Gave up on {path:?} after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// How a caller should react to an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session or connection is gone, or the request can never succeed
    Fatal,
    /// Contention or a backend hiccup; retrying may succeed
    Transient,
    /// The request does not apply to the current state of the tree
    Precondition,
    /// An optimistic write lost against a concurrent writer
    Conflict,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SessionExpired
            | Error::ConnectionClosed
            | Error::InvalidPath { .. }
            | Error::Config(_)
            | Error::RetriesExhausted { .. } => ErrorKind::Fatal,
            Error::NoNode { .. }
            | Error::NotEmpty { .. }
            | Error::NoChildrenForEphemerals { .. }
            | Error::TicketNotQueued { .. }
            | Error::Serialization(_) => ErrorKind::Precondition,
            Error::BadVersion { .. } => ErrorKind::Conflict,
            Error::ConnectionLoss | Error::NodeExists { .. } | Error::Other(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Fatal errors are never retried
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

pub type Result<T> = std::result::Result<T, Error>;

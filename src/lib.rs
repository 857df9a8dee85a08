#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

//! Race-safe namespace creation and a fair distributed mutex on top of a
//! ZooKeeper-style coordination backend.
//!
//! Processes share no memory. They agree through the backend alone: atomic
//! node creation, version-checked writes, child listings and one-shot
//! existence watches.

use std::sync::Arc;

use tracing::debug;

pub mod backend;
pub mod config;
pub mod ensure;
pub mod error;
pub mod lock;
pub mod path;
pub mod prelude;
pub mod retry;
pub mod sequence;
pub mod store;

pub mod test_utils;

pub use backend::Coordinator;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use lock::Ticket;

/// A backend connection bound to a root namespace
///
/// Every `where`/`key` argument of the store and lock operations is resolved
/// below `root_path`. The root exists by the time a handle is returned.
#[derive(Debug, Clone)]
pub struct NodeSync {
    backend: Arc<dyn Coordinator>,
    root_path: String,
    config: Config,
}

impl NodeSync {
    /// Bind `backend` to `root_path` with the default configuration
    pub async fn new(backend: Arc<dyn Coordinator>, root_path: impl Into<String>) -> Result<Self> {
        Self::with_config(backend, root_path, Config::default()).await
    }

    pub async fn with_config(
        backend: Arc<dyn Coordinator>,
        root_path: impl Into<String>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let sync = Self {
            backend,
            root_path: root_path.into(),
            config,
        };
        sync.ensure_path(&sync.root_path).await?;
        debug!("namespace {} ready", sync.root_path);
        Ok(sync)
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Coordinator> {
        &self.backend
    }

    /// Absolute path of `parts` below the root
    pub fn resolve<S: AsRef<str>>(&self, parts: &[S]) -> String {
        path::join(&self.root_path, parts)
    }
}

// Session configuration
//
// Values that used to be process-wide defaults travel with the session
// handle instead.

use serde::{Deserialize, Serialize};

use crate::backend::Acl;
use crate::retry::RetryPolicy;
use crate::sequence::SEQUENCE_WIDTH;
use crate::{Error, Result};

/// Default name of a lock ticket before the backend appends its sequence
pub const DEFAULT_LOCK_NODE_PREFIX: &str = "lock-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ACL applied to every node this library creates
    pub acl: Vec<Acl>,
    /// Width of the backend's sequence suffix
    pub sequence_width: usize,
    /// Requested name of lock tickets
    pub lock_node_prefix: String,
    /// Retry budget of the path ensurer
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            acl: vec![Acl::open_unsafe()],
            sequence_width: SEQUENCE_WIDTH,
            lock_node_prefix: DEFAULT_LOCK_NODE_PREFIX.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Parse a JSON document, filling absent fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sequence_width == 0 {
            return Err(Error::Config("sequence_width must be positive".into()));
        }
        if self.acl.is_empty() {
            return Err(Error::Config("at least one ACL entry is required".into()));
        }
        if self.lock_node_prefix.contains('/') {
            return Err(Error::Config("lock_node_prefix must not contain '/'".into()));
        }
        Ok(())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_acl(mut self, acl: Vec<Acl>) -> Self {
        self.acl = acl;
        self
    }
}

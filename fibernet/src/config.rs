//! Process configuration.
//!
//! A process knows its own id and the inner listen address of every process
//! in the deployment:
//!
//! ```json
//! { "process": 1, "peers": { "1": "127.0.0.1:20001", "2": "127.0.0.1:20002" } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fibernet_core::MAX_PROCESS;

/// Errors loading a [`ProcessConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Not valid JSON or not the expected shape.
    #[error("invalid process config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The process has no entry in the address book.
    #[error("no address for process {process}")]
    MissingAddress {
        /// Process without an address.
        process: u32,
    },

    /// A process id does not fit the wire encoding.
    #[error("process id {process} out of range (max {MAX_PROCESS})")]
    ProcessOutOfRange {
        /// Offending id.
        process: u32,
    },
}

/// Identity of this process and the address book of its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Id of this process.
    pub process: u32,
    /// Inner listen address per process id, including this one.
    #[serde(default)]
    pub peers: BTreeMap<u32, String>,
}

impl ProcessConfig {
    /// Configuration for `process` with an empty address book.
    pub fn new(process: u32) -> Self {
        Self {
            process,
            peers: BTreeMap::new(),
        }
    }

    /// Add or replace the address of `process`.
    pub fn with_peer(mut self, process: u32, address: impl Into<String>) -> Self {
        self.peers.insert(process, address.into());
        self
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`], [`ConfigError::ProcessOutOfRange`], or
    /// [`ConfigError::MissingAddress`] if this process has no address.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ids and the local entry.
    ///
    /// # Errors
    ///
    /// See [`from_json`](Self::from_json).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(&process) = std::iter::once(&self.process)
            .chain(self.peers.keys())
            .find(|&&p| p > MAX_PROCESS)
        {
            return Err(ConfigError::ProcessOutOfRange { process });
        }
        self.listen_address().map(|_| ())
    }

    /// Address of `process`, if known.
    pub fn address_of(&self, process: u32) -> Option<&str> {
        self.peers.get(&process).map(String::as_str)
    }

    /// Address this process listens on.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingAddress`] if the address book lacks it.
    pub fn listen_address(&self) -> Result<&str, ConfigError> {
        self.address_of(self.process)
            .ok_or(ConfigError::MissingAddress {
                process: self.process,
            })
    }
}

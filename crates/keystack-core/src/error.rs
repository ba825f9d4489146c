//! Error types for keystack-core

use thiserror::Error;

use crate::registry::StructureKind;

/// Result type for counter store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by counter stores and the registry
///
/// Key absence and CAS mismatches are ordinary return values, never errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage-level failure surfaced by the relational connector
    #[error("backend error: {0}")]
    Backend(#[from] keystack_rdbc::Error),

    /// `get_and_add` lost every compare-and-set race it attempted
    #[error("concurrency exhausted for key '{key}' after {attempts} attempts")]
    ConcurrencyExhausted {
        /// Contended key
        key: String,
        /// Number of compare-and-set attempts made
        attempts: u32,
    },

    /// Invalid configuration or missing collaborator
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cached structure was requested under a different kind
    #[error("structure '{name}' is cached as {cached}, not {requested}")]
    IncompatibleStructure {
        /// Normalised structure name
        name: String,
        /// Kind already registered under the name
        cached: StructureKind,
        /// Kind asked for
        requested: StructureKind,
    },

    /// Structure kind this layer does not provide
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether retrying the same call may succeed
    ///
    /// `ConcurrencyExhausted` is final: `get_and_add` already spent its
    /// attempts.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retriable(),
            _ => false,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Configuration(format!("invalid YAML: {}", e))
    }
}

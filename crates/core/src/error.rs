//! Core error types for sluice operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Core error type shared by the cache, work queue, and controller crates.
#[derive(Debug, Error)]
pub enum Error {
    // Index errors
    #[error("index '{name}' does not exist")]
    UnknownIndex { name: String },

    #[error("index '{name}' is already registered")]
    IndexConflict { name: String },

    #[error("cannot add indexers to a store holding {items} items")]
    IndexerPopulated { items: usize },

    // Key errors
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("key function failed: {reason}")]
    KeyFuncFailed { reason: String },

    // Controller lifecycle errors
    #[error("timed out after {timeout:?} waiting for the cache to sync")]
    CacheSyncTimeout { timeout: Duration },

    #[error("stopped before the cache finished syncing")]
    CacheSyncAborted,

    #[error("event source channel closed")]
    SourceClosed,

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    // Generic I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an unknown index error.
    pub fn unknown_index(name: impl Into<String>) -> Self {
        Self::UnknownIndex { name: name.into() }
    }

    /// Create an index conflict error.
    pub fn index_conflict(name: impl Into<String>) -> Self {
        Self::IndexConflict { name: name.into() }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a key function error.
    pub fn key_func_failed(reason: impl Into<String>) -> Self {
        Self::KeyFuncFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }
}

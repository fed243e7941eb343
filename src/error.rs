//! Error types for the supervisor
//!
//! Only binary-not-found and spawn failures are fatal to callers. RPC failures
//! during polling or transaction refetch are absorbed by the background loops
//! and reflected as connectivity state, never propagated upward.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to supervisor callers
#[derive(Debug, Error)]
pub enum Error {
    /// The daemon binary does not exist on disk. Fatal to the caller.
    #[error("daemon binary not found at {}", .0.display())]
    BinaryNotFound(PathBuf),

    /// Spawning the daemon process failed. Fatal to the caller.
    #[error("failed to spawn daemon: {0}")]
    Spawn(#[source] std::io::Error),

    /// Filesystem error while resolving or persisting configuration
    #[error("config error: {0}")]
    Config(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from a single RPC call
///
/// These are transient from the supervisor's point of view: the poller and the
/// reconciliation watcher log them and keep scheduling.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Could not reach the daemon at all
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// The daemon answered with an error object
    #[error("rpc error {code}: {message}")]
    Server { code: i32, message: String },

    /// The response carried neither a result nor an error
    #[error("rpc response missing result")]
    MissingResult,

    /// The result did not match the expected shape
    #[error("malformed rpc result: {0}")]
    Malformed(String),
}

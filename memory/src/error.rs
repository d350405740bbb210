//! Error taxonomy for the memory core.
//!
//! Estimation is the one concern with no error type: estimators never fail,
//! they fall back to a conservative default (see `estimator`).

use std::time::Duration;

use thiserror::Error;

/// Failure of an external capability (retrieval, summarization, model call).
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability failed: {0}")]
    Failed(String),
    /// The caller-supplied deadline elapsed. Timeouts are always explicit
    /// parameters, never ambient; there is no implicit cancellation.
    #[error("capability timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by [`MemoryManager`](crate::MemoryManager) operations.
///
/// Every mutating operation either fully succeeds or returns one of these
/// and leaves prior state unchanged.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Adding a block whose name already exists. The existing block is
    /// untouched.
    #[error("a block named {name:?} already exists")]
    BlockNameConflict { name: String },

    /// A dynamic block's capability failed while assembling the context.
    /// The whole `read()` is aborted; a partial context is never returned.
    #[error("block {name:?} failed to render")]
    BlockRead {
        name: String,
        #[source]
        source: CapabilityError,
    },

    /// The caller tried to pin a content kind the core has no handling for.
    /// Rejected before any state mutation.
    #[error("unsupported content kind: {kind}")]
    UnsupportedContentKind { kind: String },

    /// The hard token ceiling is exceeded and nothing evictable remains.
    /// This is a configuration error; output is never silently truncated.
    #[error("context requires {required} tokens but the limit is {limit} with nothing left to evict")]
    BudgetExceeded { required: u32, limit: u32 },

    /// The per-session write lock was not acquired within the caller's
    /// deadline.
    #[error("write lock not acquired within {waited:?}")]
    WriteLockTimeout { waited: Duration },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Storage backend failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

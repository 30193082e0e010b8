//! Error taxonomy for the blocktree engine.

use thiserror::Error;

/// Result alias for all engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the block cache and B-tree layers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("device I/O failure: {0}")]
    IoError(#[from] std::io::Error),

    /// The allocator scanned the whole bitmap and found no clear bit.
    #[error("allocator exhausted: no free block available")]
    NoSpace,

    /// Every slot is pinned; eviction has nowhere to go.
    #[error("cache exhausted: every slot is pinned")]
    CacheFull,

    /// Search or delete found no entry for the key.
    #[error("key not found")]
    NotFound,

    /// Traversal found an invariant violation: orphan child, cycle, key disorder.
    #[error("corrupt tree: {0}")]
    CorruptTree(&'static str),

    /// Out-of-range block number or mismatched buffer size.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

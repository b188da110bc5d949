use thiserror::Error;

use crate::lock::ThreadId;

/// Failures reported by lock construction and by `enter`/`leave`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LockError {
    #[error("a lock needs at least one thread")]
    NoThreads,

    #[error("the splitter chain needs at least one level")]
    NoLevels,

    #[error("thread id {id} is out of range for a lock of {capacity} threads")]
    InvalidThreadId { id: ThreadId, capacity: usize },

    #[error("thread {0} entered again without leaving")]
    AlreadyEntered(ThreadId),

    #[error("thread {0} left without holding the lock")]
    NotHolding(ThreadId),
}

impl LockError {
    /// Whether the error comes from calling a built lock incorrectly, as
    /// opposed to building it with bad parameters.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidThreadId { .. } | Self::AlreadyEntered(_) | Self::NotHolding(_)
        )
    }
}

use crate::guard::IdGuard;
use crate::LockError;

mod adaptive;
mod colored_bakery;
mod one_bit;
mod peterson;
mod tournament;

pub use adaptive::{AdaptiveLock, DEFAULT_MAX_LEVELS};
pub use colored_bakery::{Color, ColoredBakeryLock};
pub use one_bit::OneBitLock;
pub use tournament::TournamentLock;

/// Index of a competing thread, in `0..capacity()`.
pub type ThreadId = usize;

/// Mutual exclusion among a fixed set of thread ids.
///
/// At any instant at most one id is between a successful [`Lock::enter`] and
/// its matching [`Lock::leave`]. Each id must be driven by one thread at a
/// time; misuse is reported as a [`LockError`] rather than corrupting the
/// shared registers.
pub trait Lock: Sync {
    /// Number of thread ids the lock was built for.
    fn capacity(&self) -> usize;

    /// Spins until `id` may enter the critical section.
    fn enter(&self, id: ThreadId) -> Result<(), LockError>;

    /// Releases the critical section previously entered by `id`.
    fn leave(&self, id: ThreadId) -> Result<(), LockError>;

    /// Like [`Lock::enter`], but leaves again when the guard is dropped.
    fn acquire(&self, id: ThreadId) -> Result<IdGuard<'_, Self>, LockError> {
        self.enter(id)?;
        Ok(IdGuard::new(self, id))
    }
}

pub trait BoundedLock: Lock + Sized {
    fn with_capacity(max_threads: usize) -> Result<Self, LockError>;
}

#![deny(unsafe_op_in_unsafe_fn)]

//! Mutual exclusion built from shared read/write registers.
//!
//! Every lock here hands out the critical section to a fixed population of
//! threads, each identified by a caller-assigned [`ThreadId`] in `0..N`.

pub mod bench;
pub mod lock;

mod error;
mod guard;
mod owner;
mod spin;

pub use error::LockError;
pub use guard::IdGuard;
pub use lock::{
    AdaptiveLock, BoundedLock, ColoredBakeryLock, Lock, OneBitLock, ThreadId,
    TournamentLock,
};

use std::sync::atomic::{AtomicU8, Ordering::*};

use crate::lock::ThreadId;
use crate::LockError::{self, *};

const IDLE: u8 = 0;
const ENTERING: u8 = 1;
const HOLDING: u8 = 2;
const LEAVING: u8 = 3;

/// Per-thread usage state, one word per id.
///
/// Only the thread owning an id is supposed to touch its word; the
/// compare-exchanges make a second caller on the same id fail instead of
/// slipping into the protocol.
pub struct Owners {
    states: Box<[AtomicU8]>,
}

impl Owners {
    pub fn new(max_threads: usize) -> Self {
        let states = (0..max_threads).map(|_| AtomicU8::new(IDLE)).collect();
        Owners { states }
    }

    pub fn capacity(&self) -> usize { self.states.len() }

    pub fn check(&self, id: ThreadId) -> Result<&AtomicU8, LockError> {
        self.states.get(id).ok_or(InvalidThreadId { id, capacity: self.capacity() })
    }

    /// Runs `acquire` for `id` if it is idle, then marks it as holding.
    pub fn enter(&self, id: ThreadId, acquire: impl FnOnce()) -> Result<(), LockError> {
        let state = self.check(id)?;
        state.compare_exchange(IDLE, ENTERING, Acquire, Relaxed)
            .map_err(|_| AlreadyEntered(id))?;
        acquire();
        state.store(HOLDING, Release);
        Ok(())
    }

    /// Runs `release` for `id` if it holds the lock, then marks it idle.
    pub fn leave(&self, id: ThreadId, release: impl FnOnce()) -> Result<(), LockError> {
        let state = self.check(id)?;
        state.compare_exchange(HOLDING, LEAVING, Acquire, Relaxed)
            .map_err(|_| NotHolding(id))?;
        release();
        state.store(IDLE, Release);
        Ok(())
    }

    #[cfg(test)]
    pub fn is_holding(&self, id: ThreadId) -> bool {
        self.states.get(id).is_some_and(|state| state.load(Acquire) == HOLDING)
    }
}

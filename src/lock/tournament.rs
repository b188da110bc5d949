//! Peterson's tournament algorithm.
//!
//! Thread ids are the leaves of a complete binary tree whose internal nodes
//! are two-party Peterson locks. A thread climbs from its leaf to the root,
//! winning one node per level; holding the root is holding the lock.

use crate::lock::peterson::PetersonNode;
use crate::lock::{BoundedLock, Lock, ThreadId};
use crate::owner::Owners;
use crate::LockError::{self, *};

pub struct TournamentLock {
    // levels[l] has one node per pair of level-l contestants; level 0 sits
    // right above the leaves.
    levels: Box<[Box<[PetersonNode]>]>,
    owners: Owners,
}

impl TournamentLock {
    /// Number of leaves, `max_threads` rounded up to a power of two.
    pub fn leaves(&self) -> usize { 1 << self.height() }

    pub fn height(&self) -> usize { self.levels.len() }

    fn climb(&self, id: ThreadId) {
        let mut node = id;
        for level in self.levels.iter() {
            let side = node & 1;
            node >>= 1;
            level[node].enter(side);
        }
    }

    fn descend(&self, id: ThreadId) {
        for (height, level) in self.levels.iter().enumerate().rev() {
            let side = (id >> height) & 1;
            level[id >> (height + 1)].leave(side);
        }
    }
}

impl BoundedLock for TournamentLock {
    fn with_capacity(max_threads: usize) -> Result<Self, LockError> {
        if max_threads == 0 { return Err(NoThreads) }
        let leaves = max_threads.next_power_of_two();
        let height = leaves.trailing_zeros() as usize;
        // Padding leaves never climb, so their side of a node stays unwanted.
        let levels = (0..height)
            .map(|level| {
                (0..leaves >> (level + 1)).map(|_| PetersonNode::new()).collect::<Box<[_]>>()
            })
            .collect();
        log::debug!(
            "tournament lock: {} threads padded to {} leaves, height {}",
            max_threads, leaves, height
        );
        Ok(TournamentLock { levels, owners: Owners::new(max_threads) })
    }
}

impl Lock for TournamentLock {
    fn capacity(&self) -> usize { self.owners.capacity() }

    fn enter(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.enter(id, || self.climb(id))
    }

    fn leave(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.leave(id, || self.descend(id))
    }
}

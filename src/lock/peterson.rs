use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::*};

use crate::spin::wait_while;

/// Two-party Peterson lock. Each side (0 or 1) is played by at most one
/// thread at a time; the caller guarantees that.
pub struct PetersonNode {
    flags: [AtomicBool; 2],
    victim: AtomicUsize,
}

impl PetersonNode {
    pub fn new() -> Self {
        PetersonNode {
            flags: [AtomicBool::new(false), AtomicBool::new(false)],
            victim: AtomicUsize::new(0),
        }
    }

    pub fn enter(&self, side: usize) {
        let other = 1 - side;
        self.flags[side].store(true, SeqCst);
        self.victim.store(side, SeqCst);
        wait_while(|| {
            self.flags[other].load(SeqCst) && self.victim.load(SeqCst) == side
        });
    }

    pub fn leave(&self, side: usize) {
        self.flags[side].store(false, SeqCst);
    }

    #[cfg(test)]
    pub fn is_wanted(&self, side: usize) -> bool {
        self.flags[side].load(SeqCst)
    }
}

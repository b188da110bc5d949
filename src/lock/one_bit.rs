//! Burns and Lamport's one-bit algorithm: `N` shared bits and nothing else.
//!
//! Deadlock-free but not starvation-free; lower ids win every race against
//! higher ones.

use std::sync::atomic::{AtomicBool, Ordering::*};

use crate::lock::{BoundedLock, Lock, ThreadId};
use crate::owner::Owners;
use crate::spin::wait_while;
use crate::LockError::{self, *};

pub struct OneBitLock {
    bits: Box<[AtomicBool]>,
    owners: Owners,
}

impl OneBitLock {
    fn wait_turn(&self, id: ThreadId) {
        let bits = &self.bits;
        loop {
            bits[id].store(true, SeqCst);
            match (0..id).find(|&j| bits[j].load(SeqCst)) {
                Some(j) => {
                    // Back off completely and let the lower id through.
                    bits[id].store(false, SeqCst);
                    wait_while(|| bits[j].load(SeqCst));
                }
                None => break,
            }
        }
        for bit in &bits[id + 1..] {
            wait_while(|| bit.load(SeqCst));
        }
    }
}

impl BoundedLock for OneBitLock {
    fn with_capacity(max_threads: usize) -> Result<Self, LockError> {
        if max_threads == 0 { return Err(NoThreads) }
        let bits = (0..max_threads).map(|_| AtomicBool::new(false)).collect();
        log::debug!("one-bit lock: {} threads", max_threads);
        Ok(OneBitLock { bits, owners: Owners::new(max_threads) })
    }
}

impl Lock for OneBitLock {
    fn capacity(&self) -> usize { self.bits.len() }

    fn enter(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.enter(id, || self.wait_turn(id))
    }

    fn leave(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.leave(id, || self.bits[id].store(false, SeqCst))
    }
}

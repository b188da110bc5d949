//! Merritt and Taubenfeld's simple adaptive algorithm.
//!
//! The lock is a chain of splitters. A thread starts at the splitter named
//! by the shared `next` counter and either stops there (wins), moves down to
//! the following splitter, or is sent back to wait for `next` to move past
//! it. The winner publishes `next = level + 1` on exit. The number of
//! splitters a thread visits depends on how many threads are competing at
//! the time, not on `N`.
//!
//! The chain is unbounded in theory and `next` never goes back, so every
//! critical section consumes at least one splitter. The chain here holds
//! `max_levels` splitters. Once a thread would step past the last one it
//! takes the fallback route instead: a shared [`parking_lot::RawMutex`]
//! followed by side 1 of a two-party Peterson gate whose side 0 is played by
//! the chain winners. Taking the fallback also pushes `next` to the end of
//! the chain, which releases every thread waiting on it into the fallback as
//! well. From then on the lock keeps working, without the adaptive bound.

use std::ops::ControlFlow::{self, Break, Continue};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::*};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::lock::peterson::PetersonNode;
use crate::lock::{BoundedLock, Lock, ThreadId};
use crate::owner::Owners;
use crate::spin::wait_while;
use crate::LockError::{self, *};

/// Splitters allocated by [`BoundedLock::with_capacity`].
pub const DEFAULT_MAX_LEVELS: usize = 1 << 20;

const CHAIN_SIDE: usize = 0;
const FALLBACK_SIDE: usize = 1;

#[derive(Default)]
struct Splitter {
    x: AtomicUsize,
    y: AtomicBool,
    z: AtomicBool,
    b: AtomicBool,
}

/// Per-thread bookkeeping, written only by the owning thread.
#[derive(Default)]
struct Seat {
    level: AtomicUsize,
    fallback: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    TestOccupied(usize),
    TestOwner(usize),
    Won(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Chain(usize),
    Fallback,
}

pub struct AdaptiveLock {
    next: AtomicUsize,
    splitters: Box<[Splitter]>,
    seats: Box<[Seat]>,
    gate: PetersonNode,
    overflow: RawMutex,
    exhausted: AtomicBool,
    fallback_entries: AtomicU64,
    owners: Owners,
}

impl AdaptiveLock {
    pub fn with_levels(max_threads: usize, max_levels: usize) -> Result<Self, LockError> {
        if max_threads == 0 { return Err(NoThreads) }
        if max_levels == 0 { return Err(NoLevels) }
        let splitters = (0..max_levels).map(|_| Splitter::default()).collect();
        let seats = (0..max_threads).map(|_| Seat::default()).collect();
        log::debug!("adaptive lock: {} threads, {} splitters", max_threads, max_levels);
        Ok(AdaptiveLock {
            next: AtomicUsize::new(0),
            splitters,
            seats,
            gate: PetersonNode::new(),
            overflow: RawMutex::INIT,
            exhausted: AtomicBool::new(false),
            fallback_entries: AtomicU64::new(0),
            owners: Owners::new(max_threads),
        })
    }

    pub fn max_levels(&self) -> usize { self.splitters.len() }

    /// Splitter the next contender will start from.
    pub fn next_level(&self) -> usize { self.next.load(SeqCst) }

    /// Whether some thread has run off the end of the splitter chain.
    pub fn is_exhausted(&self) -> bool { self.exhausted.load(SeqCst) }

    /// Critical sections entered through the fallback route so far.
    pub fn fallback_entries(&self) -> u64 { self.fallback_entries.load(SeqCst) }

    fn await_next_past(&self, level: usize) {
        wait_while(|| self.next.load(SeqCst) <= level);
    }

    fn step(&self, id: ThreadId, step: Step) -> ControlFlow<Route, Step> {
        match step {
            Step::Start => Continue(Step::TestOccupied(self.next.load(SeqCst))),
            Step::TestOccupied(level) => {
                let Some(splitter) = self.splitters.get(level) else {
                    return Break(Route::Fallback);
                };
                self.seats[id].level.store(level, Relaxed);
                splitter.x.store(id, SeqCst);
                if splitter.y.load(SeqCst) {
                    splitter.b.store(true, SeqCst);
                    self.await_next_past(level);
                    return Continue(Step::Start);
                }
                splitter.y.store(true, SeqCst);
                Continue(Step::TestOwner(level))
            }
            Step::TestOwner(level) => {
                let splitter = &self.splitters[level];
                if splitter.x.load(SeqCst) != id {
                    wait_while(|| !splitter.b.load(SeqCst) && !splitter.z.load(SeqCst));
                    if splitter.z.load(SeqCst) {
                        // Someone stopped here; wait for it to leave.
                        self.await_next_past(level);
                        return Continue(Step::Start);
                    }
                    return Continue(Step::TestOccupied(level + 1));
                }
                splitter.z.store(true, SeqCst);
                if splitter.b.load(SeqCst) {
                    Continue(Step::TestOccupied(level + 1))
                } else {
                    Continue(Step::Won(level))
                }
            }
            Step::Won(level) => Break(Route::Chain(level)),
        }
    }

    fn walk_chain(&self, id: ThreadId) -> Route {
        let mut step = Step::Start;
        loop {
            match self.step(id, step) {
                Continue(next) => step = next,
                Break(route) => return route,
            }
        }
    }

    fn wait_turn(&self, id: ThreadId) {
        let route = self.walk_chain(id);
        self.take_route(id, route);
    }

    fn take_route(&self, id: ThreadId, route: Route) {
        match route {
            Route::Chain(_) => {
                self.seats[id].fallback.store(false, Relaxed);
                self.gate.enter(CHAIN_SIDE);
            }
            Route::Fallback => {
                // Nobody will win a splitter past the end to move `next` on,
                // so close the chain: every thread awaiting `next` restarts
                // and lands here too.
                self.next.fetch_max(self.max_levels(), SeqCst);
                if !self.exhausted.swap(true, SeqCst) {
                    log::warn!(
                        "adaptive lock ran out of its {} splitters, falling back to a shared mutex",
                        self.max_levels()
                    );
                }
                self.overflow.lock();
                self.seats[id].fallback.store(true, Relaxed);
                self.fallback_entries.fetch_add(1, Relaxed);
                self.gate.enter(FALLBACK_SIDE);
            }
        }
    }

    fn release(&self, id: ThreadId) {
        let seat = &self.seats[id];
        if seat.fallback.load(Relaxed) {
            self.gate.leave(FALLBACK_SIDE);
            // SAFETY: `wait_turn` locked `overflow` for this id and `Owners`
            // only lets the holder of the id get here.
            unsafe { self.overflow.unlock() };
        } else {
            self.gate.leave(CHAIN_SIDE);
            // A closed chain stays closed.
            self.next.fetch_max(seat.level.load(Relaxed) + 1, SeqCst);
        }
    }
}

impl BoundedLock for AdaptiveLock {
    fn with_capacity(max_threads: usize) -> Result<Self, LockError> {
        Self::with_levels(max_threads, DEFAULT_MAX_LEVELS)
    }
}

impl Lock for AdaptiveLock {
    fn capacity(&self) -> usize { self.seats.len() }

    fn enter(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.enter(id, || self.wait_turn(id))
    }

    fn leave(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.leave(id, || self.release(id))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn lone_thread_wins_at_next() {
        let lock = AdaptiveLock::with_levels(2, 16).unwrap();
        assert_eq!(lock.walk_chain(0), Route::Chain(0));
        let splitter = &lock.splitters[0];
        assert!(splitter.y.load(SeqCst) && splitter.z.load(SeqCst));
        assert!(!splitter.b.load(SeqCst));
    }

    #[test]
    fn leave_moves_next_past_the_winning_level() {
        let lock = AdaptiveLock::with_levels(1, 16).unwrap();
        for round in 0..5 {
            assert_eq!(lock.next_level(), round);
            lock.enter(0).unwrap();
            lock.leave(0).unwrap();
        }
        assert_eq!(lock.next_level(), 5);
        assert!(!lock.is_exhausted());
    }

    #[test]
    fn occupied_splitter_is_blocked_and_restarted() {
        let lock = AdaptiveLock::with_levels(2, 16).unwrap();
        // Thread 1 already won level 0 and has since left.
        lock.splitters[0].x.store(1, SeqCst);
        lock.splitters[0].y.store(true, SeqCst);
        lock.next.store(1, SeqCst);
        assert_eq!(lock.step(0, Step::TestOccupied(0)), Continue(Step::Start));
        assert!(lock.splitters[0].b.load(SeqCst));
        assert_eq!(lock.step(0, Step::Start), Continue(Step::TestOccupied(1)));
    }

    #[test]
    fn blocked_owner_moves_down() {
        let lock = AdaptiveLock::with_levels(2, 16).unwrap();
        let splitter = &lock.splitters[3];
        splitter.x.store(0, SeqCst);
        splitter.b.store(true, SeqCst);
        assert_eq!(lock.step(0, Step::TestOwner(3)), Continue(Step::TestOccupied(4)));
        assert!(splitter.z.load(SeqCst));
    }

    #[test]
    fn running_off_the_chain_takes_the_fallback() {
        let lock = AdaptiveLock::with_levels(1, 3).unwrap();
        for _ in 0..3 {
            lock.enter(0).unwrap();
            lock.leave(0).unwrap();
        }
        assert_eq!(lock.next_level(), 3);
        assert_eq!(lock.walk_chain(0), Route::Fallback);

        lock.enter(0).unwrap();
        assert!(lock.is_exhausted());
        assert_eq!(lock.fallback_entries(), 1);
        lock.leave(0).unwrap();
        lock.enter(0).unwrap();
        lock.leave(0).unwrap();
        assert_eq!(lock.fallback_entries(), 2);
        assert_eq!(lock.next_level(), 3);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(AdaptiveLock::with_levels(0, 4), Err(NoThreads)));
        assert!(matches!(AdaptiveLock::with_levels(4, 0), Err(NoLevels)));
        let lock = AdaptiveLock::with_capacity(4).unwrap();
        assert_eq!(lock.max_levels(), DEFAULT_MAX_LEVELS);
        assert_eq!(lock.capacity(), 4);
    }

    #[test]
    fn lone_thread_uses_one_splitter_per_entry() {
        // Work depends on contention, not on the 64 ids the lock was built for.
        let lock = AdaptiveLock::with_levels(64, 1_000).unwrap();
        for round in 0..200 {
            lock.enter(17).unwrap();
            assert_eq!(lock.seats[17].level.load(Relaxed), round);
            lock.leave(17).unwrap();
            assert_eq!(lock.next_level(), round + 1);
        }
    }

    #[test]
    fn descent_is_bounded_by_contenders() {
        const CONTENDERS: usize = 3;
        let lock = AdaptiveLock::with_levels(64, 1 << 16).unwrap();
        let deepest = AtomicUsize::new(0);
        thread::scope(|s| {
            for id in [5, 30, 63] {
                let (lock, deepest) = (&lock, &deepest);
                s.spawn(move || {
                    for _ in 0..2_000 {
                        lock.enter(id).unwrap();
                        let level = lock.seats[id].level.load(Relaxed);
                        deepest.fetch_max(level.saturating_sub(lock.next_level()), SeqCst);
                        lock.leave(id).unwrap();
                    }
                });
            }
        });
        assert!(!lock.is_exhausted());
        assert!(deepest.load(SeqCst) <= 2 * CONTENDERS, "descended {}", deepest.load(SeqCst));
    }

    #[test]
    fn fallback_releases_threads_waiting_on_the_chain() {
        let lock = AdaptiveLock::with_levels(2, 1).unwrap();
        // Thread 1 claims the only splitter but has not checked x yet.
        assert_eq!(lock.step(1, Step::TestOccupied(0)), Continue(Step::TestOwner(0)));
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                lock.enter(0).unwrap();
                lock.leave(0).unwrap();
            });
            // Thread 0 finds the splitter occupied, blocks it and waits on `next`.
            while !lock.splitters[0].b.load(SeqCst) { thread::yield_now(); }
            assert_eq!(lock.step(1, Step::TestOwner(0)), Continue(Step::TestOccupied(1)));
            assert_eq!(lock.step(1, Step::TestOccupied(1)), Break(Route::Fallback));
            lock.take_route(1, Route::Fallback);
            assert_eq!(lock.next_level(), 1);
            lock.release(1);
            waiter.join().unwrap();
        });
        assert_eq!(lock.fallback_entries(), 2);
        // A fresh arrival goes straight to the fallback as well.
        lock.enter(1).unwrap();
        lock.leave(1).unwrap();
        assert_eq!(lock.fallback_entries(), 3);
    }

    #[test]
    fn late_chain_winner_keeps_the_chain_closed() {
        let lock = AdaptiveLock::with_levels(2, 4).unwrap();
        lock.enter(0).unwrap();
        assert_eq!(lock.seats[0].level.load(Relaxed), 0);
        thread::scope(|s| {
            let overflow = s.spawn(|| {
                lock.take_route(1, Route::Fallback);
                lock.release(1);
            });
            // The fallback closes the chain before queueing at the gate.
            while lock.next_level() != 4 { thread::yield_now(); }
            lock.leave(0).unwrap();
            overflow.join().unwrap();
        });
        assert_eq!(lock.next_level(), 4);
        assert_eq!(lock.walk_chain(0), Route::Fallback);
    }
}

#![allow(dead_code)]

use std::hint;
use std::panic;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering::*};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use rand::Rng;
use register_mutex::{Lock, ThreadId};

pub const WATCHDOG: Duration = Duration::from_secs(300);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Runs `work` on its own thread and fails the test if it makes no
/// progress within `limit`. The limit only flags a stuck test.
pub fn with_watchdog<T, F>(limit: Duration, work: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let _ = tx.send(work());
    });
    match rx.recv_timeout(limit) {
        Ok(value) => value,
        Err(RecvTimeoutError::Timeout) => panic!("no progress within {:?}", limit),
        Err(RecvTimeoutError::Disconnected) => match handle.join() {
            Err(payload) => panic::resume_unwind(payload),
            Ok(()) => unreachable!("worker exited without a result"),
        },
    }
}

#[derive(Debug)]
pub struct Tally {
    pub max_inside: usize,
    pub count: i64,
    pub entries: usize,
}

impl Tally {
    pub fn expected(ids: &[ThreadId], rounds: usize) -> i64 {
        ids.iter().map(|&id| if id % 2 == 0 { rounds as i64 } else { -(rounds as i64) }).sum()
    }
}

/// Each id enters `rounds` times and, while inside, lingers for a random
/// moment before updating a counter with a separate read and write.
pub fn contend<L: Lock>(lock: &L, ids: &[ThreadId], rounds: usize) -> Tally {
    let inside = AtomicUsize::new(0);
    let max_inside = AtomicUsize::new(0);
    let entries = AtomicUsize::new(0);
    let count = AtomicI64::new(0);
    thread::scope(|s| {
        for &id in ids {
            let (inside, max_inside, entries, count) = (&inside, &max_inside, &entries, &count);
            s.spawn(move || {
                let mut rng = rand::thread_rng();
                let delta = if id % 2 == 0 { 1 } else { -1 };
                for _ in 0..rounds {
                    lock.enter(id).unwrap();
                    let now = inside.fetch_add(1, SeqCst) + 1;
                    max_inside.fetch_max(now, SeqCst);
                    let value = count.load(Relaxed);
                    for _ in 0..rng.gen_range(0..16) { hint::spin_loop(); }
                    count.store(value + delta, Relaxed);
                    entries.fetch_add(1, Relaxed);
                    inside.fetch_sub(1, SeqCst);
                    lock.leave(id).unwrap();
                }
            });
        }
    });
    Tally {
        max_inside: max_inside.into_inner(),
        count: count.into_inner(),
        entries: entries.into_inner(),
    }
}

//! Shared-counter benchmark: even ids add one, odd ids subtract one, each
//! inside the critical section, and the final count is checked.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering::*};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;
use thiserror::Error;

use crate::lock::{
    AdaptiveLock, BoundedLock, ColoredBakeryLock, Lock, OneBitLock, ThreadId, TournamentLock,
    DEFAULT_MAX_LEVELS,
};
use crate::LockError;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("invalid value {value:?} for {var}")]
    Config { var: &'static str, value: String },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("worker thread {0} panicked")]
    WorkerPanicked(ThreadId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Unlocked,
    Reentrant,
    Adaptive,
    ColoredBakery,
    OneBit,
    Tournament,
}

impl LockKind {
    pub const ALL: [LockKind; 6] = [
        LockKind::Unlocked,
        LockKind::Reentrant,
        LockKind::Adaptive,
        LockKind::ColoredBakery,
        LockKind::OneBit,
        LockKind::Tournament,
    ];

    fn name(self) -> &'static str {
        match self {
            LockKind::Unlocked => "none",
            LockKind::Reentrant => "reentrant",
            LockKind::Adaptive => "adaptive",
            LockKind::ColoredBakery => "colored-bakery",
            LockKind::OneBit => "one-bit",
            LockKind::Tournament => "tournament",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for LockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        LockKind::ALL.into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub locks: Vec<LockKind>,
    pub threads: usize,
    pub increments: u64,
    pub max_levels: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            // The unlocked baseline only makes sense with one thread.
            locks: LockKind::ALL.into_iter().filter(|&kind| kind != LockKind::Unlocked).collect(),
            threads: 8,
            increments: 5_000_000,
            max_levels: DEFAULT_MAX_LEVELS,
        }
    }
}

impl BenchConfig {
    pub const LOCKS_VAR: &'static str = "REGMUTEX_LOCKS";
    pub const THREADS_VAR: &'static str = "REGMUTEX_THREADS";
    pub const INCREMENTS_VAR: &'static str = "REGMUTEX_INCREMENTS";
    pub const MAX_LEVELS_VAR: &'static str = "REGMUTEX_MAX_LEVELS";

    /// Defaults overridden by whichever `REGMUTEX_*` variables are set.
    pub fn from_env() -> Result<Self, BenchError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, BenchError> {
        let mut config = BenchConfig::default();
        if let Some(value) = lookup(Self::LOCKS_VAR) {
            config.locks = value.split(',')
                .filter(|name| !name.trim().is_empty())
                .map(str::parse::<LockKind>)
                .collect::<Result<_, _>>()
                .map_err(|_| BenchError::Config { var: Self::LOCKS_VAR, value: value.clone() })?;
        }
        if let Some(value) = lookup(Self::THREADS_VAR) {
            config.threads = parse_var(Self::THREADS_VAR, value)?;
        }
        if let Some(value) = lookup(Self::INCREMENTS_VAR) {
            config.increments = parse_var(Self::INCREMENTS_VAR, value)?;
        }
        if let Some(value) = lookup(Self::MAX_LEVELS_VAR) {
            config.max_levels = parse_var(Self::MAX_LEVELS_VAR, value)?;
        }
        if expected_count(config.threads, config.increments).is_none() {
            return Err(BenchError::Config {
                var: Self::INCREMENTS_VAR,
                value: config.increments.to_string(),
            });
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, BenchError> {
    value.trim().parse().map_err(|_| BenchError::Config { var, value })
}

/// A built lock of one of the benchmarked kinds.
pub enum Contender {
    Unlocked,
    Reentrant(ReentrantMutex<()>),
    Adaptive(AdaptiveLock),
    ColoredBakery(ColoredBakeryLock),
    OneBit(OneBitLock),
    Tournament(TournamentLock),
}

impl Contender {
    pub fn build(kind: LockKind, config: &BenchConfig) -> Result<Self, LockError> {
        let threads = config.threads;
        Ok(match kind {
            LockKind::Unlocked => Contender::Unlocked,
            LockKind::Reentrant => Contender::Reentrant(ReentrantMutex::new(())),
            LockKind::Adaptive => {
                Contender::Adaptive(AdaptiveLock::with_levels(threads, config.max_levels)?)
            }
            LockKind::ColoredBakery => {
                Contender::ColoredBakery(ColoredBakeryLock::with_capacity(threads)?)
            }
            LockKind::OneBit => Contender::OneBit(OneBitLock::with_capacity(threads)?),
            LockKind::Tournament => Contender::Tournament(TournamentLock::with_capacity(threads)?),
        })
    }

    pub fn kind(&self) -> LockKind {
        match self {
            Contender::Unlocked => LockKind::Unlocked,
            Contender::Reentrant(_) => LockKind::Reentrant,
            Contender::Adaptive(_) => LockKind::Adaptive,
            Contender::ColoredBakery(_) => LockKind::ColoredBakery,
            Contender::OneBit(_) => LockKind::OneBit,
            Contender::Tournament(_) => LockKind::Tournament,
        }
    }

    pub fn run(&self, threads: usize, increments: u64) -> Result<BenchReport, BenchError> {
        match self {
            Contender::Unlocked => hammer(self.kind(), &Unlocked, threads, increments),
            Contender::Reentrant(mutex) => hammer(self.kind(), mutex, threads, increments),
            Contender::Adaptive(lock) => hammer(self.kind(), &ById(lock), threads, increments),
            Contender::ColoredBakery(lock) => hammer(self.kind(), &ById(lock), threads, increments),
            Contender::OneBit(lock) => hammer(self.kind(), &ById(lock), threads, increments),
            Contender::Tournament(lock) => hammer(self.kind(), &ById(lock), threads, increments),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchReport {
    pub kind: LockKind,
    pub threads: usize,
    pub increments: u64,
    pub final_count: i64,
    pub expected: i64,
    /// Entries that found another thread already inside.
    pub violations: u64,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn passed(&self) -> bool {
        self.final_count == self.expected && self.violations == 0
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASS" } else { "FAIL" };
        write!(
            f,
            "{verdict} {:<14} threads={} increments={} count={} expected={} violations={} elapsed={:?}",
            self.kind, self.threads, self.increments, self.final_count, self.expected,
            self.violations, self.elapsed,
        )
    }
}

/// Builds and runs every configured lock kind in turn.
pub fn run_all(config: &BenchConfig) -> Result<Vec<BenchReport>, BenchError> {
    config.locks.iter().map(|&kind| -> Result<BenchReport, BenchError> {
        let contender = Contender::build(kind, config)?;
        let report = contender.run(config.threads, config.increments)?;
        log::info!("{}", report);
        Ok(report)
    }).collect()
}

/// Final count of a correct run, or `None` if the counter could leave the
/// `i64` range along the way.
pub fn expected_count(threads: usize, increments: u64) -> Option<i64> {
    let adders = i64::try_from(threads.div_ceil(2)).ok()?;
    let subtractors = i64::try_from(threads / 2).ok()?;
    let increments = i64::try_from(increments).ok()?;
    let added = adders.checked_mul(increments)?;
    let subtracted = subtractors.checked_mul(increments)?;
    added.checked_sub(subtracted)
}

/// Counter updated with a separate read and write, so unsynchronized
/// updates get lost instead of racing.
struct RacyCounter(AtomicI64);

impl RacyCounter {
    fn bump(&self, delta: i64) {
        let value = self.0.load(Relaxed);
        self.0.store(value + delta, Relaxed);
    }
}

trait Section: Sync {
    fn run(&self, id: ThreadId, body: impl FnOnce()) -> Result<(), LockError>;
}

struct Unlocked;

impl Section for Unlocked {
    fn run(&self, _: ThreadId, body: impl FnOnce()) -> Result<(), LockError> {
        body();
        Ok(())
    }
}

impl Section for ReentrantMutex<()> {
    fn run(&self, _: ThreadId, body: impl FnOnce()) -> Result<(), LockError> {
        let _guard = self.lock();
        body();
        Ok(())
    }
}

struct ById<'a, L>(&'a L);

impl<L: Lock> Section for ById<'_, L> {
    fn run(&self, id: ThreadId, body: impl FnOnce()) -> Result<(), LockError> {
        self.0.enter(id)?;
        body();
        self.0.leave(id)
    }
}

fn hammer<S: Section>(
    kind: LockKind,
    section: &S,
    threads: usize,
    increments: u64,
) -> Result<BenchReport, BenchError> {
    let expected = expected_count(threads, increments).ok_or_else(|| BenchError::Config {
        var: BenchConfig::INCREMENTS_VAR,
        value: increments.to_string(),
    })?;
    let counter = RacyCounter(AtomicI64::new(0));
    let inside = AtomicUsize::new(0);
    let violations = AtomicUsize::new(0);
    let start = Instant::now();
    thread::scope(|s| {
        let workers: Vec<_> = (0..threads).map(|id| {
            let (counter, inside, violations) = (&counter, &inside, &violations);
            let delta = if id % 2 == 0 { 1 } else { -1 };
            s.spawn(move || -> Result<(), LockError> {
                for _ in 0..increments {
                    section.run(id, || {
                        if inside.fetch_add(1, SeqCst) != 0 {
                            violations.fetch_add(1, Relaxed);
                        }
                        counter.bump(delta);
                        inside.fetch_sub(1, SeqCst);
                    })?;
                }
                Ok(())
            })
        }).collect();
        workers.into_iter().enumerate().try_for_each(|(id, worker)| -> Result<(), BenchError> {
            worker.join().map_err(|_| BenchError::WorkerPanicked(id))??;
            Ok(())
        })
    })?;
    Ok(BenchReport {
        kind,
        threads,
        increments,
        final_count: counter.0.load(SeqCst),
        expected,
        violations: violations.load(SeqCst) as u64,
        elapsed: start.elapsed(),
    })
}

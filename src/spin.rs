use std::{hint, thread};

// 2^6 pause instructions per round before handing the core back.
const SPIN_LIMIT: u32 = 6;

pub struct Spin { step: u32 }

impl Spin {
    pub fn new() -> Self {
        Spin { step: 0 }
    }
    pub fn spin(&mut self) {
        if self.step > SPIN_LIMIT {
            // An oversubscribed holder only makes progress if we let it run.
            thread::yield_now();
            return;
        }
        for _ in 0..1u32 << self.step { hint::spin_loop(); }
        self.step += 1;
    }
}

/// Busy-waits while `cond` holds. `cond` is re-evaluated every round, so
/// any atomic it loads is read afresh.
pub fn wait_while(mut cond: impl FnMut() -> bool) {
    let mut spin = Spin::new();
    while cond() { spin.spin(); }
}

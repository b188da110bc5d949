//! Taubenfeld's Black-White Bakery algorithm.
//!
//! Tickets carry a colour as well as a number. A thread takes the shared
//! colour in the doorway and numbers itself after the tickets of that colour
//! only; every release flips the shared colour away from the releaser's.
//! Threads holding the old colour therefore go first, and ticket numbers
//! stay below `N` instead of growing forever as in Lamport's bakery.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering::*};

use crate::lock::{BoundedLock, Lock, ThreadId};
use crate::owner::Owners;
use crate::spin::wait_while;
use crate::LockError::{self, *};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    pub fn flipped(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    fn from_bits(bits: u8) -> Self {
        if bits == Color::Black as u8 { Color::Black } else { Color::White }
    }
}

struct AtomicColor(AtomicU8);

impl AtomicColor {
    fn new(color: Color) -> Self { AtomicColor(AtomicU8::new(color as u8)) }
    fn load(&self) -> Color { Color::from_bits(self.0.load(SeqCst)) }
    fn store(&self, color: Color) { self.0.store(color as u8, SeqCst) }
    fn compare_exchange(&self, current: Color, new: Color) -> Result<Color, Color> {
        self.0.compare_exchange(current as u8, new as u8, SeqCst, SeqCst)
            .map(Color::from_bits)
            .map_err(Color::from_bits)
    }
}

pub struct ColoredBakeryLock {
    color: AtomicColor,
    choosing: Box<[AtomicBool]>,
    numbers: Box<[AtomicUsize]>,
    colors: Box<[AtomicColor]>,
    owners: Owners,
}

impl ColoredBakeryLock {
    pub fn current_color(&self) -> Color { self.color.load() }

    /// Ticket currently published by `id`; a number of 0 means no ticket.
    ///
    /// Colour and number are read separately, so while `id` is in its
    /// doorway the pair may mix two tickets. It is only stable while `id`
    /// holds the lock or is idle; use it for tests and diagnostics.
    pub fn ticket(&self, id: ThreadId) -> Option<(Color, usize)> {
        let number = self.numbers.get(id)?.load(SeqCst);
        Some((self.colors[id].load(), number))
    }

    fn take_ticket(&self, id: ThreadId) -> (Color, usize) {
        let ColoredBakeryLock { color, choosing, numbers, colors, owners: _ } = self;
        choosing[id].store(true, SeqCst);
        let my_color = color.load();
        colors[id].store(my_color);
        let mut max_number = 0;
        for (number, color) in numbers.iter().zip(colors.iter()) {
            if color.load() != my_color { continue }
            let number = number.load(SeqCst);
            if number > max_number { max_number = number; }
        }
        let my_number = max_number + 1;
        numbers[id].store(my_number, SeqCst);
        choosing[id].store(false, SeqCst);
        (my_color, my_number)
    }

    fn wait_turn(&self, id: ThreadId) {
        let ColoredBakeryLock { color, choosing, numbers, colors, owners: _ } = self;
        let (my_color, my_number) = self.take_ticket(id);
        for j in (0..self.capacity()).filter(|&j| j != id) {
            wait_while(|| choosing[j].load(SeqCst));
            if colors[j].load() == my_color {
                // Same colour: plain bakery order on (number, id).
                wait_while(|| {
                    let number = numbers[j].load(SeqCst);
                    number != 0
                        && colors[j].load() == my_color
                        && (number, j) < (my_number, id)
                });
            } else {
                // Different colour: the stale colour goes first, so only
                // wait while our colour is still the shared one.
                wait_while(|| {
                    numbers[j].load(SeqCst) != 0
                        && color.load() == my_color
                        && colors[j].load() != my_color
                });
            }
        }
    }

    fn release(&self, id: ThreadId) {
        let next = self.colors[id].load().flipped();
        let current = self.color.load();
        // Only the holder writes the shared colour, so this cannot race.
        if let Err(found) = self.color.compare_exchange(current, next) {
            log::debug!("colour flip to {:?} by thread {} found {:?}", next, id, found);
        }
        self.numbers[id].store(0, SeqCst);
    }
}

impl BoundedLock for ColoredBakeryLock {
    fn with_capacity(max_threads: usize) -> Result<Self, LockError> {
        if max_threads == 0 { return Err(NoThreads) }
        let mut choosing: Vec<AtomicBool> = Vec::with_capacity(max_threads);
        let mut numbers: Vec<AtomicUsize> = Vec::with_capacity(max_threads);
        let mut colors: Vec<AtomicColor> = Vec::with_capacity(max_threads);
        for _ in 0..max_threads {
            choosing.push(AtomicBool::new(false));
            numbers.push(AtomicUsize::new(0));
            colors.push(AtomicColor::new(Color::White));
        }
        log::debug!("colored bakery lock: {} threads", max_threads);
        Ok(ColoredBakeryLock {
            color: AtomicColor::new(Color::White),
            choosing: choosing.into_boxed_slice(),
            numbers: numbers.into_boxed_slice(),
            colors: colors.into_boxed_slice(),
            owners: Owners::new(max_threads),
        })
    }
}

impl Lock for ColoredBakeryLock {
    fn capacity(&self) -> usize { self.numbers.len() }

    fn enter(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.enter(id, || self.wait_turn(id))
    }

    fn leave(&self, id: ThreadId) -> Result<(), LockError> {
        self.owners.leave(id, || self.release(id))
    }
}

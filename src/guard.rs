use crate::lock::{Lock, ThreadId};

/// Holds the critical section for one thread id and leaves it on drop.
pub struct IdGuard<'a, L: Lock + ?Sized> {
    lock: &'a L,
    id: ThreadId,
}

impl<'a, L: Lock + ?Sized> IdGuard<'a, L> {
    pub(crate) fn new(lock: &'a L, id: ThreadId) -> Self {
        Self { lock, id }
    }

    pub fn id(&self) -> ThreadId { self.id }
}

impl<L: Lock + ?Sized> Drop for IdGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.leave(self.id) {
            log::error!("guard for thread {} could not leave: {}", self.id, err);
        }
    }
}

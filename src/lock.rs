use crate::access::Handle;
use std::collections::VecDeque;

/// Mutual exclusion on one way of a set.
#[derive(Debug, Default, Clone)]
pub struct EntryLock {
    holder: Option<Handle>,
    waiters: VecDeque<Handle>,
}

impl EntryLock {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    #[must_use]
    pub fn holder(&self) -> Option<Handle> {
        self.holder
    }

    #[must_use]
    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }
}

/// Entry locks of every way of a module.
#[derive(Debug)]
pub struct LockTable {
    associativity: usize,
    locks: Vec<EntryLock>,
}

impl LockTable {
    #[must_use]
    pub fn new(num_sets: usize, associativity: usize) -> Self {
        Self {
            associativity,
            locks: vec![EntryLock::default(); num_sets * associativity],
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, set: usize, way: usize) -> &EntryLock {
        &self.locks[set * self.associativity + way]
    }

    #[inline]
    fn get_mut(&mut self, set: usize, way: usize) -> &mut EntryLock {
        &mut self.locks[set * self.associativity + way]
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self, set: usize, way: usize) -> bool {
        self.get(set, way).is_locked()
    }

    /// Take the lock if it is free.
    pub fn try_lock(&mut self, set: usize, way: usize, handle: Handle) -> bool {
        let lock = self.get_mut(set, way);
        if lock.holder.is_some() {
            return false;
        }
        log::trace!("lock {set}:{way} acquired by {handle}");
        lock.holder = Some(handle);
        true
    }

    /// Queue `handle` to be woken when the lock is released.
    ///
    /// Accesses that already waited once go to the head of the queue.
    pub fn wait(&mut self, set: usize, way: usize, handle: Handle, rewait: bool) {
        let lock = self.get_mut(set, way);
        if rewait {
            lock.waiters.push_front(handle);
        } else {
            lock.waiters.push_back(handle);
        }
    }

    /// Release the lock and return the first waiter to wake up.
    ///
    /// The woken access repeats its lookup from the start, since the block
    /// may have been replaced while it waited.
    pub fn unlock(&mut self, set: usize, way: usize) -> Option<Handle> {
        let lock = self.get_mut(set, way);
        let holder = lock.holder.take();
        log::trace!(
            "lock {set}:{way} released by {:?} ({} waiting)",
            holder,
            lock.waiters.len()
        );
        lock.waiters.pop_front()
    }

    /// Next waiter of a free lock, used when a woken access did not take it.
    pub fn wake_next(&mut self, set: usize, way: usize) -> Option<Handle> {
        let lock = self.get_mut(set, way);
        if lock.holder.is_some() {
            return None;
        }
        lock.waiters.pop_front()
    }

    #[must_use]
    pub fn num_locked(&self) -> usize {
        self.locks.iter().filter(|lock| lock.is_locked()).count()
    }
}

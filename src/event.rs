use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Discrete event scheduler.
///
/// Events scheduled for the same cycle are delivered in scheduling order.
pub trait Scheduler<E> {
    fn schedule(&mut self, event: E, delay: u64);

    /// Next due event, advancing the current cycle to its timestamp.
    fn pop(&mut self) -> Option<E>;

    #[must_use]
    fn now(&self) -> u64;

    /// Cycle of the next due event.
    #[must_use]
    fn peek_cycle(&self) -> Option<u64>;

    /// Advance the clock without delivering events.
    fn advance_to(&mut self, cycle: u64);

    #[must_use]
    fn len(&self) -> usize;

    #[must_use]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Entry<E> {
    cycle: u64,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        (self.cycle, self.seq) == (other.cycle, other.seq)
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.cycle, self.seq).cmp(&(other.cycle, other.seq))
    }
}

/// Binary heap ordered by `(cycle, sequence number)`.
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<Reverse<Entry<E>>>,
    now: u64,
    seq: u64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            now: 0,
            seq: 0,
        }
    }
}

impl<E> Scheduler<E> for EventQueue<E> {
    fn schedule(&mut self, event: E, delay: u64) {
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            cycle: self.now + delay,
            seq: self.seq,
            event,
        }));
    }

    fn pop(&mut self) -> Option<E> {
        let Reverse(entry) = self.heap.pop()?;
        self.now = entry.cycle;
        Some(entry.event)
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn peek_cycle(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(entry)| entry.cycle)
    }

    fn advance_to(&mut self, cycle: u64) {
        let limit = self.peek_cycle().unwrap_or(cycle);
        self.now = self.now.max(cycle.min(limit));
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

use crate::access::Handle;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Bound(usize),
    Queued,
}

/// Bounded pool of lookup ports of a module.
///
/// Requests coming from below (down-up) are queued ahead of requests from
/// above, so that coherence actions are not starved by new misses.
#[derive(Debug)]
pub struct PortArbiter {
    ports: Vec<Option<Handle>>,
    waiting: VecDeque<Handle>,
}

impl PortArbiter {
    #[must_use]
    pub fn new(num_ports: usize) -> Self {
        Self {
            ports: vec![None; num_ports],
            waiting: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ports.len()
    }

    #[must_use]
    pub fn num_locked(&self) -> usize {
        self.ports.iter().filter(|port| port.is_some()).count()
    }

    #[must_use]
    pub fn num_waiting(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub fn has_free_port(&self) -> bool {
        self.ports.iter().any(Option::is_none)
    }

    pub fn acquire(&mut self, handle: Handle, downup: bool) -> Acquire {
        if let Some(port) = self.ports.iter().position(Option::is_none) {
            self.ports[port] = Some(handle);
            return Acquire::Bound(port);
        }
        if downup {
            self.waiting.push_front(handle);
        } else {
            self.waiting.push_back(handle);
        }
        Acquire::Queued
    }

    /// Release `port` and hand it to the first waiter, if any.
    pub fn release(&mut self, port: usize) -> Option<Handle> {
        let next = self.waiting.pop_front();
        self.ports[port] = next;
        next
    }
}

use crate::{
    access::{AccessId, Handle},
    address,
};
use indexmap::{IndexMap, IndexSet};
use stats::AccessKind;
use std::collections::HashMap;

/// In-flight client access of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub handle: Handle,
    pub id: AccessId,
    pub kind: AccessKind,
    pub block: address,
    /// Access this one was coalesced into.
    pub master: Option<Handle>,
}

/// In-flight client accesses of a module in issue order.
#[derive(Debug, Default)]
pub struct AccessIndex {
    list: IndexMap<Handle, Entry>,
    writes: IndexSet<Handle>,
    buckets: HashMap<address, Vec<Handle>>,
    num_coalesced: usize,
}

impl AccessIndex {
    pub fn start(&mut self, entry: Entry) {
        if entry.kind.is_write() {
            self.writes.insert(entry.handle);
        }
        self.buckets
            .entry(entry.block)
            .or_default()
            .push(entry.handle);
        self.list.insert(entry.handle, entry);
    }

    pub fn finish(&mut self, handle: Handle) -> Option<Entry> {
        let entry = self.list.shift_remove(&handle)?;
        if entry.master.is_some() {
            self.num_coalesced -= 1;
        }
        self.writes.shift_remove(&handle);
        if let Some(bucket) = self.buckets.get_mut(&entry.block) {
            bucket.retain(|other| *other != handle);
            if bucket.is_empty() {
                self.buckets.remove(&entry.block);
            }
        }
        Some(entry)
    }

    pub fn coalesce(&mut self, handle: Handle, master: Handle) {
        if let Some(entry) = self.list.get_mut(&handle) {
            if entry.master.replace(master).is_none() {
                self.num_coalesced += 1;
            }
        }
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&Entry> {
        self.list.get(&handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[must_use]
    pub fn num_coalesced(&self) -> usize {
        self.num_coalesced
    }

    /// Accesses that perform their own lookup.
    #[must_use]
    pub fn num_in_flight(&self) -> usize {
        self.list.len() - self.num_coalesced
    }

    /// Access issued right before `handle`, to any address.
    #[must_use]
    pub fn previous(&self, handle: Handle) -> Option<&Entry> {
        let pos = self.list.get_index_of(&handle)?;
        let (_, entry) = self.list.get_index(pos.checked_sub(1)?)?;
        Some(entry)
    }

    /// Youngest write to `block` issued before access `older_than`.
    #[must_use]
    pub fn in_flight_write(&self, block: address, older_than: AccessId) -> Option<Handle> {
        self.writes
            .iter()
            .rev()
            .filter_map(|handle| self.list.get(handle))
            .find(|entry| entry.block == block && entry.id < older_than)
            .map(|entry| entry.handle)
    }

    /// Youngest access to `block` issued before access `older_than`.
    #[must_use]
    pub fn in_flight_address(&self, block: address, older_than: AccessId) -> Option<Handle> {
        self.buckets
            .get(&block)?
            .iter()
            .rev()
            .filter_map(|handle| self.list.get(handle))
            .find(|entry| entry.id < older_than)
            .map(|entry| entry.handle)
    }

    /// Access that `handle` can be merged into.
    ///
    /// For a prefetch, any other in-flight access to the block is returned
    /// and the prefetch is dropped by the caller.
    pub fn can_coalesce(
        &self,
        kind: AccessKind,
        block: address,
        handle: Handle,
        port_locked: impl Fn(Handle) -> bool,
    ) -> Option<Handle> {
        let pos = self.list.get_index_of(&handle)?;
        let mut older = self.list.values().take(pos).rev();
        match kind {
            AccessKind::LOAD => {
                // only the run of reads at the tail of the list
                for entry in older {
                    if !matches!(entry.kind, AccessKind::LOAD | AccessKind::PREFETCH) {
                        return None;
                    }
                    if entry.block == block && entry.kind == AccessKind::LOAD {
                        return Some(entry.master.unwrap_or(entry.handle));
                    }
                }
                None
            }
            AccessKind::STORE | AccessKind::NC_STORE => {
                let previous = older.next()?;
                if previous.kind != kind || previous.block != block {
                    return None;
                }
                let master = previous.master.unwrap_or(previous.handle);
                if port_locked(master) {
                    return None;
                }
                Some(master)
            }
            AccessKind::PREFETCH => self
                .buckets
                .get(&block)?
                .iter()
                .rev()
                .find(|other| **other != handle)
                .copied(),
            _ => None,
        }
    }
}

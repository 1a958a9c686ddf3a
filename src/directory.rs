use bitvec::prelude::*;

/// Sharers and owner of one way, as indices into the upper neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub sharers: BitVec,
    pub owner: Option<usize>,
}

impl Entry {
    fn new(num_high: usize) -> Self {
        Self {
            sharers: bitvec![0; num_high],
            owner: None,
        }
    }

    #[must_use]
    pub fn num_sharers(&self) -> usize {
        self.sharers.count_ones()
    }

    #[must_use]
    pub fn is_sharer(&self, high: usize) -> bool {
        self.sharers.get(high).is_some_and(|bit| *bit)
    }

    pub fn sharers(&self) -> impl Iterator<Item = usize> + '_ {
        self.sharers.iter_ones()
    }
}

/// Per way sharer records of a module.
#[derive(Debug)]
pub struct Directory {
    associativity: usize,
    entries: Vec<Entry>,
}

impl Directory {
    #[must_use]
    pub fn new(num_sets: usize, associativity: usize, num_high: usize) -> Self {
        Self {
            associativity,
            entries: vec![Entry::new(num_high); num_sets * associativity],
        }
    }

    #[inline]
    #[must_use]
    pub fn entry(&self, set: usize, way: usize) -> &Entry {
        &self.entries[set * self.associativity + way]
    }

    #[inline]
    fn entry_mut(&mut self, set: usize, way: usize) -> &mut Entry {
        &mut self.entries[set * self.associativity + way]
    }

    pub fn add_sharer(&mut self, set: usize, way: usize, high: usize) {
        self.entry_mut(set, way).sharers.set(high, true);
    }

    /// Forget `high` as sharer and owner.
    pub fn remove_sharer(&mut self, set: usize, way: usize, high: usize) {
        let entry = self.entry_mut(set, way);
        entry.sharers.set(high, false);
        if entry.owner == Some(high) {
            entry.owner = None;
        }
    }

    pub fn set_owner(&mut self, set: usize, way: usize, owner: Option<usize>) {
        self.entry_mut(set, way).owner = owner;
    }

    pub fn clear(&mut self, set: usize, way: usize) {
        let entry = self.entry_mut(set, way);
        entry.sharers.fill(false);
        entry.owner = None;
    }
}

/// How requests find the upper level copies of a block.
pub trait SharerDiscovery: std::fmt::Debug + Send + Sync + 'static {
    /// Upper neighbors that must see a read of the block.
    #[must_use]
    fn read_targets(&self, entry: &Entry, num_high: usize) -> Vec<usize>;

    /// Upper neighbors that must drop the block before it is written or evicted.
    #[must_use]
    fn invalidation_targets(&self, entry: &Entry, num_high: usize) -> Vec<usize>;

    /// Whether upper neighbors other than `except` are known to hold the block.
    ///
    /// Policies that ask every upper neighbor learn this from the replies.
    #[must_use]
    fn known_sharers(&self, entry: &Entry, except: Option<usize>) -> bool {
        let _ = (entry, except);
        false
    }

    #[must_use]
    fn supports_peer_transfer(&self) -> bool {
        false
    }
}

/// Point to point requests driven by the directory records.
///
/// Reads only need the owner to downgrade, invalidations go to every sharer.
#[derive(Debug, Default, Clone)]
pub struct DirectoryPolicy {}

impl SharerDiscovery for DirectoryPolicy {
    fn read_targets(&self, entry: &Entry, _num_high: usize) -> Vec<usize> {
        entry.owner.into_iter().collect()
    }

    fn invalidation_targets(&self, entry: &Entry, _num_high: usize) -> Vec<usize> {
        entry.sharers().collect()
    }

    fn known_sharers(&self, entry: &Entry, except: Option<usize>) -> bool {
        entry.sharers().any(|high| Some(high) != except)
    }

    fn supports_peer_transfer(&self) -> bool {
        true
    }
}

/// Broadcast to every upper neighbor.
#[derive(Debug, Default, Clone)]
pub struct SnoopPolicy {}

impl SharerDiscovery for SnoopPolicy {
    fn read_targets(&self, _entry: &Entry, num_high: usize) -> Vec<usize> {
        (0..num_high).collect()
    }

    fn invalidation_targets(&self, _entry: &Entry, num_high: usize) -> Vec<usize> {
        (0..num_high).collect()
    }
}

#[must_use]
pub fn policy(policy: crate::config::Policy) -> Box<dyn SharerDiscovery> {
    match policy {
        crate::config::Policy::Directory => Box::new(DirectoryPolicy::default()),
        crate::config::Policy::Snoop => Box::new(SnoopPolicy::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::{Directory, DirectoryPolicy, SharerDiscovery, SnoopPolicy};

    #[test]
    fn test_directory_records() {
        let mut dir = Directory::new(2, 2, 3);
        dir.add_sharer(1, 1, 0);
        dir.add_sharer(1, 1, 2);
        dir.set_owner(1, 1, Some(2));
        assert_eq!(dir.entry(1, 1).num_sharers(), 2);
        assert_eq!(dir.entry(1, 0).num_sharers(), 0);

        dir.remove_sharer(1, 1, 2);
        assert_eq!(dir.entry(1, 1).owner, None);
        assert!(dir.entry(1, 1).is_sharer(0));
        assert!(!dir.entry(1, 1).is_sharer(2));

        dir.clear(1, 1);
        assert_eq!(dir.entry(1, 1).num_sharers(), 0);
    }

    #[test]
    fn test_policies_pick_targets() {
        let mut dir = Directory::new(1, 1, 4);
        dir.add_sharer(0, 0, 1);
        dir.add_sharer(0, 0, 3);
        dir.set_owner(0, 0, Some(3));
        let entry = dir.entry(0, 0);

        let directory = DirectoryPolicy::default();
        assert_eq!(directory.read_targets(entry, 4), vec![3]);
        assert_eq!(directory.invalidation_targets(entry, 4), vec![1, 3]);
        assert!(directory.supports_peer_transfer());
        assert!(directory.known_sharers(entry, Some(3)));
        let empty = Directory::new(1, 1, 4);
        assert!(!directory.known_sharers(empty.entry(0, 0), None));

        let snoop = SnoopPolicy::default();
        assert_eq!(snoop.read_targets(entry, 4), vec![0, 1, 2, 3]);
        assert_eq!(snoop.invalidation_targets(entry, 4), vec![0, 1, 2, 3]);
        assert!(!snoop.supports_peer_transfer());
        assert!(!snoop.known_sharers(entry, None));
    }
}

use super::{address, config};

pub trait SetIndexer: std::fmt::Debug + Send + Sync + 'static {
    /// Compute the set index of a block address.
    #[must_use]
    fn compute_set_index(&self, block: address, num_sets: usize, block_size_log2: u32) -> usize;
}

pub mod linear {
    /// Consecutive blocks map to consecutive sets.
    #[derive(Default, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct SetIndex {}

    impl super::SetIndexer for SetIndex {
        #[inline]
        fn compute_set_index(
            &self,
            block: super::address,
            num_sets: usize,
            block_size_log2: u32,
        ) -> usize {
            ((block >> block_size_log2) % num_sets as u64) as usize
        }
    }
}

pub mod interleaved {
    /// Skips the blocks served by the other `modulo - 1` interleaved modules,
    /// so that every set of this module is used.
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct SetIndex {
        pub modulo: u64,
    }

    impl super::SetIndexer for SetIndex {
        #[inline]
        fn compute_set_index(
            &self,
            block: super::address,
            num_sets: usize,
            block_size_log2: u32,
        ) -> usize {
            (((block >> block_size_log2) / self.modulo) % num_sets as u64) as usize
        }
    }
}

/// Set index function matching the address range of a module.
#[must_use]
pub fn for_range(range: &config::Range) -> Box<dyn SetIndexer> {
    match *range {
        config::Range::Interleaved { modulo, .. } => Box::new(interleaved::SetIndex { modulo }),
        config::Range::All | config::Range::Bounds { .. } => Box::new(linear::SetIndex::default()),
    }
}

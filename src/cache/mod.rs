pub mod block;

pub use block::Block;

use crate::{
    address,
    config::{self, ReplacementPolicy, VictimBias},
    set_index::{self, SetIndexer},
};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// NMOESI block state.
#[derive(
    Debug,
    Default,
    strum::Display,
    strum::EnumIter,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum State {
    #[default]
    INVALID,
    /// Written without coherence, merged on eviction.
    NON_COHERENT,
    MODIFIED,
    OWNED,
    EXCLUSIVE,
    SHARED,
}

impl State {
    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != State::INVALID
    }

    /// Holds data newer than the level below.
    #[inline]
    #[must_use]
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            State::MODIFIED | State::OWNED | State::NON_COHERENT
        )
    }

    /// Writable without asking the level below.
    #[inline]
    #[must_use]
    pub fn is_exclusive(self) -> bool {
        matches!(self, State::MODIFIED | State::EXCLUSIVE)
    }

    /// State after merging dirty data written back from above.
    #[must_use]
    pub fn absorb_dirty(self) -> State {
        match self {
            State::EXCLUSIVE | State::MODIFIED => State::MODIFIED,
            State::SHARED | State::OWNED => State::OWNED,
            other => other,
        }
    }

    /// State of a holder after it answered a read from below.
    ///
    /// A holder never stays exclusive once another module reads the block.
    #[must_use]
    pub fn demote(self, dirty: bool) -> State {
        match self {
            State::INVALID => State::INVALID,
            State::NON_COHERENT => State::NON_COHERENT,
            _ if dirty => State::OWNED,
            State::MODIFIED | State::OWNED => State::OWNED,
            State::EXCLUSIVE | State::SHARED => State::SHARED,
        }
    }

    #[must_use]
    pub fn letter(self) -> char {
        match self {
            State::INVALID => 'I',
            State::NON_COHERENT => 'N',
            State::MODIFIED => 'M',
            State::OWNED => 'O',
            State::EXCLUSIVE => 'E',
            State::SHARED => 'S',
        }
    }
}

/// State of a block filled from below.
#[must_use]
pub fn next_state(shared: bool, dirty: bool) -> State {
    match (shared, dirty) {
        (false, true) => State::MODIFIED,
        (true, true) => State::OWNED,
        (false, false) => State::EXCLUSIVE,
        (true, false) => State::SHARED,
    }
}

/// Result of a block lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub set: usize,
    pub tag: address,
    pub way: Option<usize>,
    pub state: State,
}

impl Lookup {
    #[inline]
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.way.is_some()
    }
}

#[derive(Debug, Clone)]
struct Set {
    blocks: Vec<Block>,
    /// Ways ordered from most to least recently used (or inserted).
    order: VecDeque<usize>,
}

/// Set associative array of blocks.
#[derive(Debug)]
pub struct BlockStore {
    num_sets: usize,
    associativity: usize,
    block_size: u32,
    block_size_log2: u32,
    replacement_policy: ReplacementPolicy,
    victim_bias: Option<VictimBias>,
    set_index_function: Box<dyn SetIndexer>,
    sets: Vec<Set>,
}

impl BlockStore {
    #[must_use]
    pub fn new(config: &config::Module) -> Self {
        let set = Set {
            blocks: vec![Block::default(); config.associativity],
            order: (0..config.associativity).collect(),
        };
        Self {
            num_sets: config.num_sets,
            associativity: config.associativity,
            block_size: config.block_size,
            block_size_log2: config.block_size_log2(),
            replacement_policy: config.replacement_policy,
            victim_bias: config.victim_bias,
            set_index_function: set_index::for_range(&config.range),
            sets: vec![set; config.num_sets],
        }
    }

    #[inline]
    #[must_use]
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    #[inline]
    #[must_use]
    pub fn associativity(&self) -> usize {
        self.associativity
    }

    #[inline]
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    #[must_use]
    pub fn block_address(&self, addr: address) -> address {
        addr & !(u64::from(self.block_size) - 1)
    }

    #[inline]
    #[must_use]
    pub fn set_index(&self, addr: address) -> usize {
        self.set_index_function.compute_set_index(
            self.block_address(addr),
            self.num_sets,
            self.block_size_log2,
        )
    }

    /// Look up the block containing `addr`.
    ///
    /// A way whose transient tag matches counts as a hit while it is locked,
    /// so that later accesses wait for the block being brought in.
    #[must_use]
    pub fn find(&self, addr: address, is_locked: impl Fn(usize, usize) -> bool) -> Lookup {
        let tag = self.block_address(addr);
        let set = self.set_index(addr);
        let blocks = &self.sets[set].blocks;

        let way = blocks.iter().position(|block| block.matches(tag)).or_else(|| {
            blocks
                .iter()
                .enumerate()
                .position(|(way, block)| block.transient_tag == Some(tag) && is_locked(set, way))
        });
        let state = way.map_or(State::INVALID, |way| blocks[way].state);
        Lookup {
            set,
            tag,
            way,
            state,
        }
    }

    /// Set and way of a valid block containing `addr`.
    #[must_use]
    pub fn find_valid(&self, addr: address) -> Option<(usize, usize)> {
        let tag = self.block_address(addr);
        let set = self.set_index(addr);
        let way = self.sets[set]
            .blocks
            .iter()
            .position(|block| block.matches(tag))?;
        Some((set, way))
    }

    #[must_use]
    pub fn state_of(&self, addr: address) -> State {
        self.find_valid(addr)
            .map_or(State::INVALID, |(set, way)| self.block(set, way).state)
    }

    #[inline]
    #[must_use]
    pub fn block(&self, set: usize, way: usize) -> &Block {
        &self.sets[set].blocks[way]
    }

    pub fn set_block(&mut self, set: usize, way: usize, tag: address, state: State) {
        let block = &mut self.sets[set].blocks[way];
        let refill = !block.is_valid() || block.tag != tag;
        log::trace!(
            "set block {set}:{way} {} -> {tag:#x} {state}",
            block
        );
        block.tag = tag;
        block.state = state;
        if refill {
            block.prefetched = false;
            if self.replacement_policy == ReplacementPolicy::FIFO {
                self.move_to_front(set, way);
            }
        }
    }

    pub fn set_state(&mut self, set: usize, way: usize, state: State) {
        self.sets[set].blocks[way].state = state;
    }

    pub fn set_transient_tag(&mut self, set: usize, way: usize, tag: address) {
        self.sets[set].blocks[way].transient_tag = Some(tag);
    }

    pub fn set_prefetched(&mut self, set: usize, way: usize, prefetched: bool) {
        self.sets[set].blocks[way].prefetched = prefetched;
    }

    /// Record an access for the replacement policy.
    pub fn touch(&mut self, set: usize, way: usize) {
        if self.replacement_policy == ReplacementPolicy::LRU {
            self.move_to_front(set, way);
        }
    }

    fn move_to_front(&mut self, set: usize, way: usize) {
        let order = &mut self.sets[set].order;
        if let Some(pos) = order.iter().position(|w| *w == way) {
            order.remove(pos);
        }
        order.push_front(way);
    }

    /// Choose the way to replace in `set`.
    ///
    /// Invalid ways come first, then unlocked ways in replacement order.
    /// If every way is locked, the least recently used one is returned and
    /// the caller will fail to lock it.
    pub fn select_victim<R>(
        &self,
        set: usize,
        is_locked: impl Fn(usize, usize) -> bool,
        rng: &mut R,
    ) -> usize
    where
        R: rand::Rng,
    {
        let Set { blocks, order } = &self.sets[set];
        let candidates: SmallVec<[usize; 16]> = order
            .iter()
            .rev()
            .copied()
            .filter(|way| !is_locked(set, *way))
            .collect();

        let Some(&oldest) = candidates.first() else {
            return order.back().copied().unwrap_or_default();
        };
        if let Some(&way) = candidates.iter().find(|way| !blocks[**way].is_valid()) {
            return way;
        }

        let preferred: SmallVec<[usize; 16]> = match self.victim_bias {
            Some(bias) => candidates
                .iter()
                .copied()
                .filter(|way| {
                    let state = blocks[*way].state;
                    match bias {
                        VictimBias::MODIFIED_FIRST => state == State::MODIFIED,
                        VictimBias::EXCLUSIVE_FIRST => state == State::EXCLUSIVE,
                        VictimBias::SHARED_FIRST => state == State::SHARED,
                    }
                })
                .collect(),
            None => SmallVec::new(),
        };
        let pool = if preferred.is_empty() {
            &candidates
        } else {
            &preferred
        };

        match self.replacement_policy {
            ReplacementPolicy::LRU | ReplacementPolicy::FIFO => pool.first().copied().unwrap_or(oldest),
            ReplacementPolicy::RANDOM => pool[rng.gen_range(0..pool.len())],
        }
    }

    /// Valid blocks as `(tag, state)`.
    pub fn valid_blocks(&self) -> impl Iterator<Item = (address, State)> + '_ {
        self.sets
            .iter()
            .flat_map(|set| set.blocks.iter())
            .filter(|block| block.is_valid())
            .map(|block| (block.tag, block.state))
    }
}

use super::State;
use crate::address;

/// One way of a set.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    /// Block aligned address of the cached block.
    pub tag: address,
    pub state: State,
    /// Tag of the block the current lock holder is bringing in.
    ///
    /// Only meaningful while the entry lock of the way is held.
    pub transient_tag: Option<address>,
    /// Brought in by a prefetch and not accessed since.
    pub prefetched: bool,
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("tag", &format_args!("{:#x}", self.tag))
            .field("state", &self.state)
            .finish()
    }
}

impl Block {
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    /// Valid block whose way is being refilled with another block.
    #[inline]
    #[must_use]
    pub fn is_replacing(&self) -> bool {
        self.is_valid() && self.transient_tag.is_some_and(|tag| tag != self.tag)
    }

    #[inline]
    #[must_use]
    pub fn matches(&self, tag: address) -> bool {
        self.is_valid() && self.tag == tag
    }
}

use serde::{Deserialize, Serialize};

/// Kind of a memory system access or protocol sub-request.
#[derive(
    Debug,
    strum::EnumIter,
    strum::Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum AccessKind {
    LOAD,
    STORE,
    NC_STORE,
    PREFETCH,
    FIND_AND_LOCK,
    READ_REQUEST,
    WRITE_REQUEST,
    EVICT,
    INVALIDATE,
    PEER,
    MESSAGE,
}

impl AccessKind {
    /// Accesses that a client of the memory system can issue.
    #[must_use]
    pub fn is_client(self) -> bool {
        matches!(
            self,
            AccessKind::LOAD | AccessKind::STORE | AccessKind::NC_STORE | AccessKind::PREFETCH
        )
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessKind::STORE | AccessKind::NC_STORE | AccessKind::WRITE_REQUEST
        )
    }

    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            AccessKind::LOAD | AccessKind::PREFETCH | AccessKind::READ_REQUEST
        )
    }
}

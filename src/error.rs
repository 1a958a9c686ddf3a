use crate::{access::Handle, address, coherence, config};
use stats::AccessKind;

/// Fatal simulation errors.
///
/// Retryable conditions such as a busy entry lock never surface here,
/// they travel inside the access as [`crate::access::TransactionError`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Coherence(#[from] coherence::Violation),

    #[error("expected exactly one lower module of {module} serving address {addr:#x} (found {found})")]
    Routing {
        module: String,
        addr: address,
        found: usize,
    },

    #[error("module {module} has no {which} network")]
    MissingNetwork { module: String, which: &'static str },

    #[error("unknown module {0:?}")]
    UnknownModule(String),

    #[error("{0} is not an access a client can issue")]
    NotClient(AccessKind),

    #[error("deadlock: {pending} accesses are waiting but no event is scheduled")]
    Deadlock { pending: usize },

    #[error("deadlock: {pending} accesses are in flight but none retired in {cycles} cycles")]
    Stalled { pending: usize, cycles: u64 },

    #[error("access handle {0} is no longer live")]
    StaleHandle(Handle),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Config(#[from] config::Error),
}

//! Transaction descriptors.
//!
//! Every client access and every protocol sub-request lives in a [`Frame`]
//! stored in an [`Arena`]. Frames refer to each other through generational
//! [`Handle`]s, so a handle to a retired frame is detected instead of
//! silently aliasing a new one.

use crate::{
    address, cache::State, interconn::Message, module::ModuleId, protocol::Step,
};
use stats::AccessKind;

/// Monotonically increasing id in issue order.
pub type AccessId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot table with free list reuse.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            Some((
                Handle {
                    index: index as u32,
                    generation: slot.generation,
                },
                value,
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards main memory.
    UP_DOWN,
    /// Towards the upper level sharers.
    DOWN_UP,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// The sender no longer holds the block exclusively.
    ClearOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Load,
    Store,
    NcStore,
    Prefetch,
    FindAndLock {
        blocking: bool,
        allocate: bool,
        downup: bool,
    },
    Evict,
    ReadRequest {
        direction: Direction,
        /// issued by a non-coherent store
        nc_write: bool,
        /// upper level module the holder sends its data to directly
        peer: Option<ModuleId>,
    },
    WriteRequest {
        direction: Direction,
    },
    Invalidate {
        except: Option<ModuleId>,
    },
    Peer,
    Message(MessageKind),
}

impl Kind {
    #[must_use]
    pub fn access_kind(&self) -> AccessKind {
        match self {
            Kind::Load => AccessKind::LOAD,
            Kind::Store => AccessKind::STORE,
            Kind::NcStore => AccessKind::NC_STORE,
            Kind::Prefetch => AccessKind::PREFETCH,
            Kind::FindAndLock { .. } => AccessKind::FIND_AND_LOCK,
            Kind::Evict => AccessKind::EVICT,
            Kind::ReadRequest { .. } => AccessKind::READ_REQUEST,
            Kind::WriteRequest { .. } => AccessKind::WRITE_REQUEST,
            Kind::Invalidate { .. } => AccessKind::INVALIDATE,
            Kind::Peer => AccessKind::PEER,
            Kind::Message(_) => AccessKind::MESSAGE,
        }
    }

    #[must_use]
    pub fn is_client(&self) -> bool {
        self.access_kind().is_client()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reply {
    NONE,
    ACK,
    ACK_DATA,
    ACK_DATA_SENT_TO_PEER,
    ACK_ERROR,
}

/// Retryable failure of a transaction.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[error("entry {set}:{way} of module {module} is locked")]
    LockBusy {
        module: ModuleId,
        set: usize,
        way: usize,
    },
    #[error("request to module {module} failed")]
    Downstream { module: ModuleId },
}

/// Block chosen for replacement, or the block an eviction writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub set: usize,
    pub way: usize,
    pub tag: address,
    pub state: State,
}

#[derive(Debug)]
pub struct Frame {
    pub id: AccessId,
    pub kind: Kind,
    /// Module that issued the access.
    pub module: ModuleId,
    /// Module that performs the lookup, equal to `module` for client accesses.
    pub target: ModuleId,
    pub addr: address,
    pub ret: Option<(Handle, Step)>,

    pub set: usize,
    pub way: usize,
    pub tag: address,
    pub state: State,
    pub victim: Option<Victim>,
    pub hit: bool,
    pub locked: bool,
    pub port: Option<usize>,
    pub port_locked: bool,
    /// Entry lock this frame was queued on.
    pub waited_on: Option<(usize, usize)>,
    pub error: Option<TransactionError>,

    pub shared: bool,
    pub dirty: bool,
    pub retain_owner: bool,
    pub pending: usize,
    pub reply: Reply,
    pub reply_size: u32,
    pub message: Option<Message>,

    pub master: Option<AccessId>,
    pub waiters: Vec<(Handle, Step)>,
    pub retries: usize,
    pub issue_cycle: u64,
}

impl Frame {
    #[must_use]
    pub fn new(
        id: AccessId,
        kind: Kind,
        module: ModuleId,
        target: ModuleId,
        addr: address,
        ret: Option<(Handle, Step)>,
        issue_cycle: u64,
    ) -> Self {
        Self {
            id,
            kind,
            module,
            target,
            addr,
            ret,
            set: 0,
            way: 0,
            tag: 0,
            state: State::INVALID,
            victim: None,
            hit: false,
            locked: false,
            port: None,
            port_locked: false,
            waited_on: None,
            error: None,
            shared: false,
            dirty: false,
            retain_owner: false,
            pending: 0,
            reply: Reply::NONE,
            reply_size: 0,
            message: None,
            master: None,
            waiters: Vec::new(),
            retries: 0,
            issue_cycle,
        }
    }

    /// Handle of the frame waiting for this one to return.
    #[must_use]
    pub fn parent(&self) -> Option<Handle> {
        self.ret.map(|(parent, _)| parent)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]@{:#x}",
            self.kind.access_kind(),
            self.id,
            self.addr
        )
    }
}

//! The NMOESI transaction engine.
//!
//! Every protocol is a state machine over its own step enum. A step runs to
//! completion and either schedules the next step of the same access, starts a
//! sub-request that resumes the access later, or parks the access as a waiter
//! of another access, an entry lock or a port.

pub mod evict;
pub mod find_and_lock;
pub mod invalidate;
pub mod load;
pub mod message;
pub mod nc_store;
pub mod peer;
pub mod prefetch;
pub mod read_request;
pub mod store;
pub mod write_request;

pub use evict::EvictStep;
pub use find_and_lock::FindAndLockStep;
pub use invalidate::InvalidateStep;
pub use load::LoadStep;
pub use message::MessageStep;
pub use nc_store::NcStoreStep;
pub use peer::PeerStep;
pub use prefetch::PrefetchStep;
pub use read_request::ReadRequestStep;
pub use store::StoreStep;
pub use write_request::WriteRequestStep;

use crate::{
    access::{Frame, Handle, Kind, TransactionError},
    address, coherence,
    error::Error,
    event::Scheduler,
    index,
    interconn::{Interconnect, NetworkId},
    module::ModuleId,
    observer::Observer,
    sim::{Outcome, Simulator},
    State,
};
use console::style;
use rand::Rng;
use stats::{AccessKind, RequestStatus, RetryReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Load(LoadStep),
    Store(StoreStep),
    NcStore(NcStoreStep),
    Prefetch(PrefetchStep),
    FindAndLock(FindAndLockStep),
    Evict(EvictStep),
    ReadRequest(ReadRequestStep),
    WriteRequest(WriteRequestStep),
    Invalidate(InvalidateStep),
    Peer(PeerStep),
    Message(MessageStep),
}

macro_rules! impl_step_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Step {
                fn from(step: $ty) -> Self {
                    Step::$variant(step)
                }
            }
        )*
    };
}

impl_step_from!(
    Load(LoadStep),
    Store(StoreStep),
    NcStore(NcStoreStep),
    Prefetch(PrefetchStep),
    FindAndLock(FindAndLockStep),
    Evict(EvictStep),
    ReadRequest(ReadRequestStep),
    WriteRequest(WriteRequestStep),
    Invalidate(InvalidateStep),
    Peer(PeerStep),
    Message(MessageStep),
);

impl Step {
    /// First step of an access of the given kind.
    #[must_use]
    pub fn start(kind: &Kind) -> Self {
        match kind {
            Kind::Load => LoadStep::Start.into(),
            Kind::Store => StoreStep::Start.into(),
            Kind::NcStore => NcStoreStep::Start.into(),
            Kind::Prefetch => PrefetchStep::Start.into(),
            Kind::FindAndLock { .. } => FindAndLockStep::Start.into(),
            Kind::Evict => EvictStep::Start.into(),
            Kind::ReadRequest { .. } => ReadRequestStep::Start.into(),
            Kind::WriteRequest { .. } => WriteRequestStep::Start.into(),
            Kind::Invalidate { .. } => InvalidateStep::Start.into(),
            Kind::Peer => PeerStep::Start.into(),
            Kind::Message(_) => MessageStep::Start.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub access: Handle,
    pub step: Step,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn dispatch(&mut self, event: Event) -> Result<(), Error> {
        let Event { access, step } = event;
        log::trace!("cycle {}: {access} {step:?}", self.cycle());
        match step {
            Step::Load(step) => self.load(access, step),
            Step::Store(step) => self.store(access, step),
            Step::NcStore(step) => self.nc_store(access, step),
            Step::Prefetch(step) => self.prefetch(access, step),
            Step::FindAndLock(step) => self.find_and_lock(access, step),
            Step::Evict(step) => self.evict(access, step),
            Step::ReadRequest(step) => self.read_request(access, step),
            Step::WriteRequest(step) => self.write_request(access, step),
            Step::Invalidate(step) => self.invalidate(access, step),
            Step::Peer(step) => self.peer(access, step),
            Step::Message(step) => self.message(access, step),
        }
    }

    pub(crate) fn frame(&self, handle: Handle) -> Result<&Frame, Error> {
        self.frames.get(handle).ok_or(Error::StaleHandle(handle))
    }

    pub(crate) fn frame_mut(&mut self, handle: Handle) -> Result<&mut Frame, Error> {
        self.frames.get_mut(handle).ok_or(Error::StaleHandle(handle))
    }

    pub(crate) fn parent_of(&self, handle: Handle) -> Result<Handle, Error> {
        self.frame(handle)?
            .parent()
            .ok_or_else(|| Error::Protocol(format!("access {handle} has no parent")))
    }

    pub(crate) fn name(&self, module: ModuleId) -> String {
        self.hierarchy.name(module).to_string()
    }

    pub(crate) fn block_size(&self, module: ModuleId) -> u32 {
        self.hierarchy.modules[module].block_size
    }

    pub(crate) fn schedule(&mut self, handle: Handle, step: impl Into<Step>, delay: u64) {
        self.queue.schedule(
            Event {
                access: handle,
                step: step.into(),
            },
            delay,
        );
    }

    pub(crate) fn spawn(
        &mut self,
        kind: Kind,
        module: ModuleId,
        target: ModuleId,
        addr: address,
        ret: Option<(Handle, Step)>,
    ) -> Handle {
        self.next_id += 1;
        let frame = Frame::new(
            self.next_id,
            kind,
            module,
            target,
            addr,
            ret,
            self.cycle(),
        );
        self.frames.insert(frame)
    }

    /// Start a sub-request that resumes `parent` at `resume` once it retires.
    ///
    /// The sub-request starts in a later event, so the caller may still fill
    /// in fields of the returned frame.
    pub(crate) fn call(
        &mut self,
        parent: Handle,
        kind: Kind,
        module: ModuleId,
        target: ModuleId,
        addr: address,
        resume: impl Into<Step>,
    ) -> Handle {
        let handle = self.spawn(kind, module, target, addr, Some((parent, resume.into())));
        self.schedule(handle, Step::start(&kind), 0);
        handle
    }

    /// Resume `handle` at `resume` once `other` retires.
    pub(crate) fn wait_for(
        &mut self,
        handle: Handle,
        other: Handle,
        resume: impl Into<Step>,
    ) -> Result<(), Error> {
        log::trace!("{handle} waits for {other}");
        self.frame_mut(other)?.waiters.push((handle, resume.into()));
        Ok(())
    }

    /// Destroy a frame, waking its waiters and resuming its parent.
    pub(crate) fn retire(&mut self, handle: Handle) -> Result<Frame, Error> {
        let frame = self
            .frames
            .remove(handle)
            .ok_or(Error::StaleHandle(handle))?;
        for (waiter, step) in &frame.waiters {
            self.schedule(*waiter, *step, 0);
        }
        if let Some((parent, step)) = frame.ret {
            self.schedule(parent, step, 0);
        }
        Ok(frame)
    }

    /// Release the entry lock `handle` holds on its target block.
    pub(crate) fn unlock_line(&mut self, handle: Handle) -> Result<(), Error> {
        let frame = self.frame_mut(handle)?;
        if !frame.locked {
            return Ok(());
        }
        frame.locked = false;
        let (target, set, way) = (frame.target, frame.set, frame.way);
        if let Some(next) = self.hierarchy.modules[target].locks.unlock(set, way) {
            self.schedule(next, FindAndLockStep::Start, 0);
        }
        Ok(())
    }

    pub(crate) fn set_error(
        &mut self,
        handle: Handle,
        error: TransactionError,
    ) -> Result<(), Error> {
        self.frame_mut(handle)?.error = Some(error);
        Ok(())
    }

    pub(crate) fn observe(&mut self, mut notify: impl FnMut(&mut dyn Observer)) {
        notify(&mut self.collector);
        for observer in &mut self.observers {
            notify(observer.as_mut());
        }
    }

    pub(crate) fn check_block(&self, module: ModuleId, addr: address) -> Result<(), Error> {
        if self.config.check_coherence {
            coherence::check(&self.hierarchy, module, addr)?;
        }
        Ok(())
    }

    /// Network connecting two modules, in either direction.
    pub(crate) fn link(&self, a: ModuleId, b: ModuleId) -> Result<NetworkId, Error> {
        let (ma, mb) = (&self.hierarchy.modules[a], &self.hierarchy.modules[b]);
        [
            (ma.low_network, mb.high_network),
            (ma.high_network, mb.low_network),
            (ma.low_network, mb.low_network),
        ]
        .into_iter()
        .find_map(|(x, y)| x.filter(|x| Some(*x) == y))
        .ok_or_else(|| Error::MissingNetwork {
            module: format!("{ma} to {mb}"),
            which: "shared",
        })
    }

    /// Put a message for `handle` on the network between `src` and `dest`.
    ///
    /// On delivery the access resumes at `resume`. A rejected message makes
    /// the access repeat `retry` in the next cycle.
    pub(crate) fn send(
        &mut self,
        handle: Handle,
        src: ModuleId,
        dest: ModuleId,
        size: u32,
        request: bool,
        retry: impl Into<Step>,
        resume: impl Into<Step>,
    ) -> Result<(), Error> {
        let network = self.link(src, dest)?;
        let now = self.cycle();
        let kind = self.frame(handle)?.kind.access_kind();
        let network_name = self.interconn.network_name(network).to_string();
        match self.interconn.try_send(network, src, dest, size, now) {
            Some(message) => {
                let delay = message.arrival_cycle.saturating_sub(now);
                self.frame_mut(handle)?.message = Some(message);
                let src_name = self.name(src);
                self.observe(|o| o.message_sent(&network_name, &src_name, kind, size, request));
                self.schedule(handle, resume, delay);
            }
            None => {
                self.observe(|o| o.message_rejected(&network_name));
                self.schedule(handle, retry, 1);
            }
        }
        Ok(())
    }

    /// Consume the message `handle` is waiting for.
    pub(crate) fn deliver(&mut self, handle: Handle) -> Result<(), Error> {
        if let Some(message) = self.frame_mut(handle)?.message.take() {
            self.interconn.receive(&message);
        }
        Ok(())
    }

    /// Register a client access and look for an access to merge it into.
    pub(crate) fn start_client(
        &mut self,
        handle: Handle,
        kind: AccessKind,
    ) -> Result<Option<Handle>, Error> {
        let frame = self.frame(handle)?;
        let (module_id, addr, id) = (frame.module, frame.addr, frame.id);
        let now = self.cycle();

        let module = &mut self.hierarchy.modules[module_id];
        let block = module.cache.block_address(addr);
        module.index.start(index::Entry {
            handle,
            id,
            kind,
            block,
            master: None,
        });
        let frames = &self.frames;
        let master = module.index.can_coalesce(kind, block, handle, |other| {
            frames.get(other).is_some_and(|frame| frame.port_locked)
        });
        log::debug!(
            "{}: {kind}[{id}] {addr:#x} (block {block:#x})",
            style(format!("{} ACCESS START", module.name)).bold(),
        );

        let name = self.name(module_id);
        self.observe(|o| o.access_start(&name, kind, addr, now));
        Ok(master)
    }

    /// Merge a client access into `master`, resuming it when the master retires.
    pub(crate) fn coalesce(
        &mut self,
        handle: Handle,
        master: Handle,
        resume: impl Into<Step>,
    ) -> Result<(), Error> {
        let master_id = self.frame(master)?.id;
        let frame = self.frame_mut(handle)?;
        frame.master = Some(master_id);
        let (module, kind) = (frame.module, frame.kind.access_kind());
        self.hierarchy.modules[module].index.coalesce(handle, master);
        self.wait_for(handle, master, resume)?;

        let name = self.name(module);
        self.observe(|o| o.coalesced(&name, kind));
        Ok(())
    }

    /// Retire a client access and record its outcome.
    pub(crate) fn finish_client(&mut self, handle: Handle, aborted: bool) -> Result<(), Error> {
        self.last_progress = self.cycle();
        let frame = self.frame(handle)?;
        let (module, addr, id, kind) = (
            frame.module,
            frame.addr,
            frame.id,
            frame.kind.access_kind(),
        );
        let (status, hit, state) = match frame.master {
            _ if aborted => (
                RequestStatus::ABORTED,
                false,
                self.hierarchy.state(module, addr),
            ),
            Some(_) => (RequestStatus::COALESCED, frame.hit, frame.state),
            None if frame.hit => (RequestStatus::HIT, true, frame.state),
            None => (RequestStatus::MISS, false, frame.state),
        };
        let now = self.cycle();
        let outcome = Outcome {
            id,
            module,
            kind,
            addr,
            status,
            hit,
            state,
            retries: frame.retries,
            issue_cycle: frame.issue_cycle,
            finish_cycle: now,
        };
        log::debug!(
            "{}: {kind}[{id}] {addr:#x} {status} in {} cycles, state {state}",
            style(format!("{} ACCESS FINISH", self.hierarchy.name(module))).bold(),
            outcome.latency(),
        );

        // accesses merged into this one report its result
        let merged: Vec<Handle> = frame.waiters.iter().map(|(waiter, _)| *waiter).collect();
        for waiter in merged {
            if let Some(waiter) = self.frames.get_mut(waiter) {
                if waiter.master == Some(id) {
                    waiter.hit = hit;
                    waiter.state = state;
                }
            }
        }

        self.hierarchy.modules[module].index.finish(handle);
        let name = self.name(module);
        let latency = outcome.latency();
        self.observe(|o| o.access_finish(&name, kind, status, latency));
        self.outcomes.insert(id, outcome);
        self.retire(handle)?;
        Ok(())
    }

    /// Clear a failed attempt and repeat `resume` after a random backoff.
    pub(crate) fn retry(&mut self, handle: Handle, resume: impl Into<Step>) -> Result<(), Error> {
        let frame = self.frame_mut(handle)?;
        let reason = match frame.error.take() {
            Some(TransactionError::LockBusy { .. }) => RetryReason::LOCK_BUSY,
            _ => RetryReason::DOWNSTREAM_ERROR,
        };
        frame.hit = false;
        frame.shared = false;
        frame.dirty = false;
        frame.retain_owner = false;
        frame.retries += 1;
        let (module, kind, id) = (frame.module, frame.kind.access_kind(), frame.id);

        let latency = self.hierarchy.modules[module].latency.max(1);
        let delay = latency + self.rng.gen_range(0..latency);
        let name = self.name(module);
        log::debug!(
            "{}: {kind}[{id}] {reason} in {delay} cycles",
            style(format!("{name} RETRY")).yellow(),
        );
        self.observe(|o| o.retry(&name, kind, reason));
        self.schedule(handle, resume, delay);
        Ok(())
    }

    /// Fill or update the block an access holds the lock of.
    pub(crate) fn set_line_state(&mut self, handle: Handle, state: State) -> Result<(), Error> {
        let frame = self.frame_mut(handle)?;
        frame.state = state;
        let (target, set, way, tag) = (frame.target, frame.set, frame.way, frame.tag);
        self.hierarchy.modules[target]
            .cache
            .set_block(set, way, tag, state);
        Ok(())
    }
}

use crate::{
    access::{Handle, Kind, TransactionError, Victim},
    error::Error,
    interconn::Interconnect,
    port::Acquire,
    protocol::EvictStep,
    sim::Simulator,
    State,
};
use console::style;

/// Find the block of an access in the target module and lock its way.
///
/// On a miss with allocation a victim way is chosen and evicted first.
/// The results are written into the parent access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindAndLockStep {
    Start,
    Port,
    Action,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn find_and_lock(
        &mut self,
        handle: Handle,
        step: FindAndLockStep,
    ) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, addr) = (frame.target, frame.addr);
        let Kind::FindAndLock {
            blocking,
            allocate,
            downup,
        } = frame.kind
        else {
            return Err(Error::Protocol(format!("{frame} is not a lookup")));
        };
        let parent = self.parent_of(handle)?;

        match step {
            FindAndLockStep::Start => {
                self.frame_mut(parent)?.port_locked = true;
                match self.hierarchy.modules[m].ports.acquire(handle, downup) {
                    Acquire::Bound(port) => {
                        self.frame_mut(handle)?.port = Some(port);
                        self.find_and_lock(handle, FindAndLockStep::Port)
                    }
                    Acquire::Queued => {
                        let name = self.name(m);
                        log::trace!("{name}: {handle} waits for a port");
                        self.observe(|o| o.port_wait(&name));
                        Ok(())
                    }
                }
            }
            FindAndLockStep::Port => {
                let module = &self.hierarchy.modules[m];
                let locks = &module.locks;
                let lookup = module
                    .cache
                    .find(addr, |set, way| locks.is_locked(set, way));

                let mut victim = None;
                let way = match lookup.way {
                    Some(way) => way,
                    None if allocate => {
                        let way = module.cache.select_victim(
                            lookup.set,
                            |set, way| locks.is_locked(set, way),
                            &mut self.rng,
                        );
                        let block = module.cache.block(lookup.set, way);
                        if block.is_valid() {
                            victim = Some(Victim {
                                set: lookup.set,
                                way,
                                tag: block.tag,
                                state: block.state,
                            });
                        }
                        way
                    }
                    None => {
                        // nothing to lock
                        self.release_port(handle)?;
                        self.release_stale_wait(handle, None)?;
                        let parent = self.frame_mut(parent)?;
                        parent.set = lookup.set;
                        parent.tag = lookup.tag;
                        parent.state = State::INVALID;
                        parent.hit = false;
                        parent.locked = false;
                        self.retire(handle)?;
                        return Ok(());
                    }
                };

                let (set, tag, hit) = (lookup.set, lookup.tag, lookup.is_hit());
                let frame = self.frame_mut(handle)?;
                frame.set = set;
                frame.way = way;
                frame.tag = tag;
                frame.hit = hit;
                frame.state = if hit { lookup.state } else { State::INVALID };
                frame.victim = victim;
                self.release_stale_wait(handle, Some((set, way)))?;

                let module = &mut self.hierarchy.modules[m];
                if module.locks.try_lock(set, way, handle) {
                    module.cache.set_transient_tag(set, way, tag);
                    module.cache.touch(set, way);
                    let latency = module.latency;
                    log::trace!(
                        "{}: {addr:#x} at {set}:{way} hit={hit} victim={victim:?}",
                        style(format!("{} LOCK", module.name)).cyan(),
                    );
                    let frame = self.frame_mut(handle)?;
                    frame.locked = true;
                    frame.waited_on = None;
                    // the port stays taken for the lookup
                    self.schedule(handle, FindAndLockStep::Action, latency);
                    return Ok(());
                }

                self.release_port(handle)?;
                self.frame_mut(parent)?.port_locked = false;
                if blocking {
                    let frame = self.frame_mut(handle)?;
                    let rewait = frame.waited_on == Some((set, way));
                    frame.waited_on = Some((set, way));
                    self.hierarchy.modules[m]
                        .locks
                        .wait(set, way, handle, rewait);
                    let name = self.name(m);
                    log::trace!("{name}: {handle} waits for lock {set}:{way}");
                    self.observe(|o| o.lock_wait(&name));
                } else {
                    log::debug!(
                        "{}: {addr:#x} at {set}:{way} is busy",
                        style(format!("{} LOCK", self.hierarchy.name(m))).red(),
                    );
                    self.set_error(parent, TransactionError::LockBusy { module: m, set, way })?;
                    self.retire(handle)?;
                }
                Ok(())
            }
            FindAndLockStep::Action => {
                self.release_port(handle)?;
                match self.frame(handle)?.victim {
                    Some(victim) => {
                        let evict = self.spawn(
                            Kind::Evict,
                            m,
                            m,
                            victim.tag,
                            Some((handle, FindAndLockStep::Finish.into())),
                        );
                        self.frame_mut(evict)?.victim = Some(victim);
                        self.schedule(evict, EvictStep::Start, 0);
                        Ok(())
                    }
                    None => self.find_and_lock(handle, FindAndLockStep::Finish),
                }
            }
            FindAndLockStep::Finish => {
                let frame = self.frame(handle)?;
                let (set, way, tag, hit) = (frame.set, frame.way, frame.tag, frame.hit);
                let mut state = frame.state;

                if let Some(error) = frame.error {
                    // the victim could not be evicted
                    self.unlock_line(handle)?;
                    let parent = self.frame_mut(parent)?;
                    parent.error = Some(error);
                    parent.locked = false;
                    self.retire(handle)?;
                    return Ok(());
                }

                let module = &mut self.hierarchy.modules[m];
                if !hit && module.is_main_memory() {
                    state = State::EXCLUSIVE;
                    module.cache.set_block(set, way, tag, state);
                    module.directory.clear(set, way);
                }

                let parent = self.frame_mut(parent)?;
                parent.set = set;
                parent.way = way;
                parent.tag = tag;
                parent.state = state;
                parent.hit = hit;
                parent.locked = true;
                self.retire(handle)?;
                Ok(())
            }
        }
    }

    fn release_port(&mut self, handle: Handle) -> Result<(), Error> {
        let frame = self.frame_mut(handle)?;
        let Some(port) = frame.port.take() else {
            return Ok(());
        };
        let target = frame.target;
        if let Some(next) = self.hierarchy.modules[target].ports.release(port) {
            self.frame_mut(next)?.port = Some(port);
            self.schedule(next, FindAndLockStep::Port, 0);
        }
        Ok(())
    }

    /// A woken access that goes for another lock passes its turn on.
    fn release_stale_wait(
        &mut self,
        handle: Handle,
        target: Option<(usize, usize)>,
    ) -> Result<(), Error> {
        let frame = self.frame_mut(handle)?;
        let Some((set, way)) = frame.waited_on else {
            return Ok(());
        };
        if target == Some((set, way)) {
            return Ok(());
        }
        frame.waited_on = None;
        let m = frame.target;
        if let Some(next) = self.hierarchy.modules[m].locks.wake_next(set, way) {
            self.schedule(next, FindAndLockStep::Start, 0);
        }
        Ok(())
    }
}

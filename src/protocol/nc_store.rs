use crate::{
    access::{Direction, Handle, Kind, MessageKind, Victim},
    error::Error,
    interconn::Interconnect,
    sim::Simulator,
    State,
};
use stats::AccessKind;

/// Store without coherence.
///
/// The block ends up `NON_COHERENT`. Dirty copies are written back first,
/// an exclusive copy tells the level below that it gives up ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcStoreStep {
    Start,
    Lock,
    Action,
    Writeback,
    Miss,
    Unlock,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn nc_store(&mut self, handle: Handle, step: NcStoreStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, addr, id) = (frame.module, frame.addr, frame.id);

        match step {
            NcStoreStep::Start => {
                if let Some(master) = self.start_client(handle, AccessKind::NC_STORE)? {
                    return self.coalesce(handle, master, NcStoreStep::Finish);
                }
                self.nc_store(handle, NcStoreStep::Lock)
            }
            NcStoreStep::Lock => {
                let module = &self.hierarchy.modules[m];
                let block = module.cache.block_address(addr);
                let older = module
                    .index
                    .in_flight_write(block, id)
                    .or_else(|| module.index.in_flight_address(block, id));
                if let Some(older) = older {
                    return self.wait_for(handle, older, NcStoreStep::Lock);
                }
                let lookup = Kind::FindAndLock {
                    blocking: true,
                    allocate: true,
                    downup: false,
                };
                self.call(handle, lookup, m, m, addr, NcStoreStep::Action);
                Ok(())
            }
            NcStoreStep::Action => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    return self.retry(handle, NcStoreStep::Lock);
                }
                let (set, way, tag, state) = (frame.set, frame.way, frame.tag, frame.state);
                if self.hierarchy.modules[m].is_main_memory() {
                    return self.nc_store(handle, NcStoreStep::Unlock);
                }
                match state {
                    State::MODIFIED | State::OWNED => {
                        let evict = self.call(handle, Kind::Evict, m, m, tag, NcStoreStep::Writeback);
                        self.frame_mut(evict)?.victim = Some(Victim {
                            set,
                            way,
                            tag,
                            state,
                        });
                        Ok(())
                    }
                    State::SHARED | State::NON_COHERENT => {
                        self.nc_store(handle, NcStoreStep::Unlock)
                    }
                    State::EXCLUSIVE => {
                        let low = self.hierarchy.require_low_module(m, addr)?;
                        let message = Kind::Message(MessageKind::ClearOwner);
                        self.call(handle, message, m, low, addr, NcStoreStep::Miss);
                        Ok(())
                    }
                    State::INVALID => {
                        let low = self.hierarchy.require_low_module(m, addr)?;
                        let read = Kind::ReadRequest {
                            direction: Direction::UP_DOWN,
                            nc_write: true,
                            peer: None,
                        };
                        self.call(handle, read, m, low, addr, NcStoreStep::Miss);
                        Ok(())
                    }
                }
            }
            NcStoreStep::Writeback => {
                if self.frame(handle)?.error.is_some() {
                    self.unlock_line(handle)?;
                    return self.retry(handle, NcStoreStep::Lock);
                }
                // the line is gone now, start over as a miss
                self.frame_mut(handle)?.state = State::INVALID;
                self.nc_store(handle, NcStoreStep::Action)
            }
            NcStoreStep::Miss => {
                if self.frame(handle)?.error.is_some() {
                    self.unlock_line(handle)?;
                    return self.retry(handle, NcStoreStep::Lock);
                }
                self.nc_store(handle, NcStoreStep::Unlock)
            }
            NcStoreStep::Unlock => {
                self.set_line_state(handle, State::NON_COHERENT)?;
                self.unlock_line(handle)?;
                let latency = self.hierarchy.modules[m].latency;
                self.schedule(handle, NcStoreStep::Finish, latency);
                Ok(())
            }
            NcStoreStep::Finish => self.finish_client(handle, false),
        }
    }
}

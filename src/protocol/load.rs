use crate::{
    access::{Direction, Handle, Kind},
    cache::next_state,
    error::Error,
    interconn::Interconnect,
    sim::Simulator,
};
use stats::AccessKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Start,
    Lock,
    Action,
    Miss,
    Unlock,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn load(&mut self, handle: Handle, step: LoadStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, addr, id) = (frame.module, frame.addr, frame.id);

        match step {
            LoadStep::Start => {
                if let Some(master) = self.start_client(handle, AccessKind::LOAD)? {
                    return self.coalesce(handle, master, LoadStep::Finish);
                }
                self.load(handle, LoadStep::Lock)
            }
            LoadStep::Lock => {
                let module = &self.hierarchy.modules[m];
                let block = module.cache.block_address(addr);
                let older = module
                    .index
                    .in_flight_write(block, id)
                    .or_else(|| module.index.in_flight_address(block, id));
                if let Some(older) = older {
                    return self.wait_for(handle, older, LoadStep::Lock);
                }
                let lookup = Kind::FindAndLock {
                    blocking: true,
                    allocate: true,
                    downup: false,
                };
                self.call(handle, lookup, m, m, addr, LoadStep::Action);
                Ok(())
            }
            LoadStep::Action => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    return self.retry(handle, LoadStep::Lock);
                }
                let (set, way, state) = (frame.set, frame.way, frame.state);
                if state.is_valid() {
                    let cache = &mut self.hierarchy.modules[m].cache;
                    if cache.block(set, way).prefetched {
                        cache.set_prefetched(set, way, false);
                        let name = self.name(m);
                        self.observe(|o| o.useful_prefetch(&name));
                    }
                    return self.load(handle, LoadStep::Unlock);
                }
                let low = self.hierarchy.require_low_module(m, addr)?;
                let read = Kind::ReadRequest {
                    direction: Direction::UP_DOWN,
                    nc_write: false,
                    peer: None,
                };
                self.call(handle, read, m, low, addr, LoadStep::Miss);
                Ok(())
            }
            LoadStep::Miss => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    self.unlock_line(handle)?;
                    return self.retry(handle, LoadStep::Lock);
                }
                let state = next_state(frame.shared, frame.dirty);
                self.set_line_state(handle, state)?;
                self.check_block(m, addr)?;
                self.load(handle, LoadStep::Unlock)
            }
            LoadStep::Unlock => {
                self.unlock_line(handle)?;
                let latency = self.hierarchy.modules[m].latency;
                self.schedule(handle, LoadStep::Finish, latency);
                Ok(())
            }
            LoadStep::Finish => self.finish_client(handle, false),
        }
    }
}

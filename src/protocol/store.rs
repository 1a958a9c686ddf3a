use crate::{
    access::{Direction, Handle, Kind},
    error::Error,
    interconn::Interconnect,
    sim::Simulator,
    State,
};
use stats::AccessKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStep {
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
    pub(crate) fn store(&mut self, handle: Handle, step: StoreStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, addr) = (frame.module, frame.addr);

        match step {
            StoreStep::Start => {
                if let Some(master) = self.start_client(handle, AccessKind::STORE)? {
                    return self.coalesce(handle, master, StoreStep::Finish);
                }
                self.store(handle, StoreStep::Lock)
            }
            StoreStep::Lock => {
                // stores complete in issue order
                let previous = self.hierarchy.modules[m]
                    .index
                    .previous(handle)
                    .map(|entry| entry.handle);
                if let Some(previous) = previous {
                    return self.wait_for(handle, previous, StoreStep::Lock);
                }
                let lookup = Kind::FindAndLock {
                    blocking: true,
                    allocate: true,
                    downup: false,
                };
                self.call(handle, lookup, m, m, addr, StoreStep::Action);
                Ok(())
            }
            StoreStep::Action => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    return self.retry(handle, StoreStep::Lock);
                }
                if frame.state.is_exclusive() {
                    return self.store(handle, StoreStep::Unlock);
                }
                let low = self.hierarchy.require_low_module(m, addr)?;
                let write = Kind::WriteRequest {
                    direction: Direction::UP_DOWN,
                };
                self.call(handle, write, m, low, addr, StoreStep::Miss);
                Ok(())
            }
            StoreStep::Miss => {
                if self.frame(handle)?.error.is_some() {
                    self.unlock_line(handle)?;
                    return self.retry(handle, StoreStep::Lock);
                }
                self.store(handle, StoreStep::Unlock)
            }
            StoreStep::Unlock => {
                self.set_line_state(handle, State::MODIFIED)?;
                self.check_block(m, addr)?;
                self.unlock_line(handle)?;
                let latency = self.hierarchy.modules[m].latency;
                self.schedule(handle, StoreStep::Finish, latency);
                Ok(())
            }
            StoreStep::Finish => self.finish_client(handle, false),
        }
    }
}

use crate::{
    access::{Direction, Handle, Kind},
    cache::next_state,
    error::Error,
    interconn::Interconnect,
    sim::Simulator,
};
use stats::AccessKind;

/// Bring a block in ahead of use. Prefetches never wait and never retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchStep {
    Start,
    Lock,
    Action,
    Miss,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn prefetch(&mut self, handle: Handle, step: PrefetchStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, addr, id) = (frame.module, frame.addr, frame.id);

        match step {
            PrefetchStep::Start => {
                if let Some(other) = self.start_client(handle, AccessKind::PREFETCH)? {
                    log::debug!("prefetch {id} dropped, {other} already accesses {addr:#x}");
                    return self.finish_client(handle, true);
                }
                self.prefetch(handle, PrefetchStep::Lock)
            }
            PrefetchStep::Lock => {
                let module = &self.hierarchy.modules[m];
                let block = module.cache.block_address(addr);
                if let Some(older) = module.index.in_flight_write(block, id) {
                    return self.wait_for(handle, older, PrefetchStep::Lock);
                }
                let lookup = Kind::FindAndLock {
                    blocking: false,
                    allocate: true,
                    downup: false,
                };
                self.call(handle, lookup, m, m, addr, PrefetchStep::Action);
                Ok(())
            }
            PrefetchStep::Action => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    return self.finish_client(handle, true);
                }
                if frame.state.is_valid() {
                    self.unlock_line(handle)?;
                    return self.prefetch(handle, PrefetchStep::Finish);
                }
                let low = self.hierarchy.require_low_module(m, addr)?;
                let read = Kind::ReadRequest {
                    direction: Direction::UP_DOWN,
                    nc_write: false,
                    peer: None,
                };
                self.call(handle, read, m, low, addr, PrefetchStep::Miss);
                Ok(())
            }
            PrefetchStep::Miss => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    self.unlock_line(handle)?;
                    return self.finish_client(handle, true);
                }
                let (set, way) = (frame.set, frame.way);
                let state = next_state(frame.shared, frame.dirty);
                self.set_line_state(handle, state)?;
                self.hierarchy.modules[m]
                    .cache
                    .set_prefetched(set, way, true);
                self.check_block(m, addr)?;
                self.unlock_line(handle)?;
                self.prefetch(handle, PrefetchStep::Finish)
            }
            PrefetchStep::Finish => self.finish_client(handle, false),
        }
    }
}

use crate::{
    access::{Direction, Handle, Kind},
    error::Error,
    interconn::Interconnect,
    sim::Simulator,
};

/// Remove a block from every upper level copy.
///
/// The caller holds the lock of the block and fills in `set`, `way` and
/// `tag`. Dirty data returned by the upper levels is merged into the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateStep {
    Start,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn invalidate(&mut self, handle: Handle, step: InvalidateStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, set, way, tag) = (frame.module, frame.set, frame.way, frame.tag);
        let Kind::Invalidate { except } = frame.kind else {
            return Err(Error::Protocol(format!("{frame} is not an invalidation")));
        };

        match step {
            InvalidateStep::Start => {
                let module = &self.hierarchy.modules[m];
                let targets: Vec<_> = self
                    .policy
                    .invalidation_targets(module.directory.entry(set, way), module.high.len())
                    .into_iter()
                    .map(|index| (index, module.high[index]))
                    .filter(|(_, high)| Some(*high) != except)
                    .filter(|(_, high)| {
                        matches!(self.hierarchy.low_module(*high, tag), Ok(Some(low)) if low == m)
                    })
                    .collect();

                self.frame_mut(handle)?.pending = 1 + targets.len();
                for (index, high) in targets {
                    self.hierarchy.modules[m]
                        .directory
                        .remove_sharer(set, way, index);
                    let write = Kind::WriteRequest {
                        direction: Direction::DOWN_UP,
                    };
                    self.call(handle, write, m, high, tag, InvalidateStep::Finish);
                }
                self.invalidate(handle, InvalidateStep::Finish)
            }
            InvalidateStep::Finish => {
                let frame = self.frame_mut(handle)?;
                frame.pending = frame.pending.saturating_sub(1);
                if frame.pending > 0 {
                    return Ok(());
                }
                if frame.dirty {
                    let cache = &mut self.hierarchy.modules[m].cache;
                    let state = cache.block(set, way).state;
                    if state.is_valid() {
                        cache.set_state(set, way, state.absorb_dirty());
                    }
                }
                self.retire(handle)?;
                Ok(())
            }
        }
    }
}

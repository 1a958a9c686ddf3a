use crate::{
    access::{Handle, Kind, Reply, TransactionError},
    error::Error,
    interconn::{Interconnect, HEADER_SIZE},
    sim::Simulator,
    State,
};
use console::style;

/// Write a victim block back to the level below and drop it.
///
/// `module` is the evicting module and `victim` its block. The lookup in the
/// module below fills `set`, `way`, `tag` and `state` like for any other
/// request, so the victim stays in its own field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictStep {
    Start,
    Invalid,
    Send,
    Receive,
    Action,
    Reply,
    ReplyReceive,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn evict(&mut self, handle: Handle, step: EvictStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, target) = (frame.module, frame.target);
        let Some(victim) = frame.victim else {
            return Err(Error::Protocol(format!("{frame} has no victim")));
        };

        match step {
            EvictStep::Start => {
                let invalidate = self.call(
                    handle,
                    Kind::Invalidate { except: None },
                    m,
                    m,
                    victim.tag,
                    EvictStep::Invalid,
                );
                let frame = self.frame_mut(invalidate)?;
                frame.set = victim.set;
                frame.way = victim.way;
                frame.tag = victim.tag;
                Ok(())
            }
            EvictStep::Invalid => {
                // upper levels may have written back into the victim
                let state = self.hierarchy.modules[m]
                    .cache
                    .block(victim.set, victim.way)
                    .state;
                if let Some(victim) = self.frame_mut(handle)?.victim.as_mut() {
                    victim.state = state;
                }
                if !state.is_valid() {
                    return self.evict(handle, EvictStep::Finish);
                }
                let Some(low) = self.hierarchy.low_module(m, victim.tag)? else {
                    return self.evict(handle, EvictStep::Finish);
                };
                let frame = self.frame_mut(handle)?;
                frame.target = low;
                frame.dirty = state.is_dirty();
                frame.reply = if frame.dirty { Reply::ACK_DATA } else { Reply::ACK };
                self.evict(handle, EvictStep::Send)
            }
            EvictStep::Send => {
                let frame = self.frame(handle)?;
                let size = if frame.dirty {
                    self.block_size(m) + HEADER_SIZE
                } else {
                    HEADER_SIZE
                };
                self.send(handle, m, target, size, true, EvictStep::Send, EvictStep::Receive)
            }
            EvictStep::Receive => {
                self.deliver(handle)?;
                let lookup = Kind::FindAndLock {
                    blocking: false,
                    allocate: false,
                    downup: false,
                };
                self.call(handle, lookup, target, target, victim.tag, EvictStep::Action);
                Ok(())
            }
            EvictStep::Action => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    return self.evict(handle, EvictStep::Reply);
                }
                if !frame.locked {
                    log::warn!(
                        "{}: evicted block {:#x} of {} not found",
                        self.hierarchy.name(target),
                        victim.tag,
                        self.hierarchy.name(m),
                    );
                    return self.evict(handle, EvictStep::Reply);
                }
                let (set, way, state, dirty) = (frame.set, frame.way, frame.state, frame.dirty);
                let below = &mut self.hierarchy.modules[target];
                if dirty {
                    below.cache.set_state(set, way, state.absorb_dirty());
                }
                if let Some(high) = below.high_index(m) {
                    below.directory.remove_sharer(set, way, high);
                }
                self.unlock_line(handle)?;
                self.evict(handle, EvictStep::Reply)
            }
            EvictStep::Reply => self.send(
                handle,
                target,
                m,
                HEADER_SIZE,
                false,
                EvictStep::Reply,
                EvictStep::ReplyReceive,
            ),
            EvictStep::ReplyReceive => {
                self.deliver(handle)?;
                self.evict(handle, EvictStep::Finish)
            }
            EvictStep::Finish => {
                let frame = self.frame(handle)?;
                let (error, dirty) = (frame.error, frame.dirty);
                let parent = self.parent_of(handle)?;
                if error.is_some() {
                    self.set_error(parent, TransactionError::Downstream { module: target })?;
                    self.retire(handle)?;
                    return Ok(());
                }
                if victim.state.is_valid() {
                    let module = &mut self.hierarchy.modules[m];
                    module
                        .cache
                        .set_state(victim.set, victim.way, State::INVALID);
                    module.directory.clear(victim.set, victim.way);
                    log::debug!(
                        "{}: {:#x} {} at {}:{}",
                        style(format!("{} EVICT", module.name)).magenta(),
                        victim.tag,
                        victim.state,
                        victim.set,
                        victim.way,
                    );
                    let name = self.name(m);
                    self.observe(|o| o.eviction(&name, dirty));
                }
                self.retire(handle)?;
                Ok(())
            }
        }
    }
}

use crate::{
    access::{Direction, Handle, Kind, Reply},
    error::Error,
    interconn::{Interconnect, HEADER_SIZE},
    sim::Simulator,
    State,
};

/// Gain exclusive access to a block.
///
/// Up-down requests invalidate every other upper level copy and make the
/// requester the owner. Down-up requests remove the copy of an upper level
/// holder, returning its dirty data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRequestStep {
    Start,
    Receive,
    Action,
    Exclusive,
    UpDown,
    UpDownFinish,
    DownUp,
    DownUpFinish,
    Reply,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn write_request(
        &mut self,
        handle: Handle,
        step: WriteRequestStep,
    ) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, target, addr) = (frame.module, frame.target, frame.addr);
        let Kind::WriteRequest { direction } = frame.kind else {
            return Err(Error::Protocol(format!("{frame} is not a write request")));
        };
        let downup = direction == Direction::DOWN_UP;

        match step {
            WriteRequestStep::Start => self.send(
                handle,
                m,
                target,
                HEADER_SIZE,
                true,
                WriteRequestStep::Start,
                WriteRequestStep::Receive,
            ),
            WriteRequestStep::Receive => {
                self.deliver(handle)?;
                let lookup = Kind::FindAndLock {
                    blocking: downup,
                    allocate: !downup,
                    downup,
                };
                self.call(handle, lookup, target, target, addr, WriteRequestStep::Action);
                Ok(())
            }
            WriteRequestStep::Action => {
                if frame.error.is_some() {
                    self.reply_error(handle)?;
                    return self.write_request(handle, WriteRequestStep::Reply);
                }
                if !(frame.locked && frame.state.is_valid()) {
                    return self.write_request(handle, WriteRequestStep::Exclusive);
                }
                let (set, way, tag) = (frame.set, frame.way, frame.tag);
                let except = (!downup).then_some(m);
                let invalidate = self.call(
                    handle,
                    Kind::Invalidate { except },
                    target,
                    target,
                    tag,
                    WriteRequestStep::Exclusive,
                );
                let frame = self.frame_mut(invalidate)?;
                frame.set = set;
                frame.way = way;
                frame.tag = tag;
                Ok(())
            }
            WriteRequestStep::Exclusive => {
                if frame.locked {
                    // upper levels may have written back
                    let state = self.hierarchy.modules[target]
                        .cache
                        .block(frame.set, frame.way)
                        .state;
                    self.frame_mut(handle)?.state = state;
                }
                let next = if downup {
                    WriteRequestStep::DownUp
                } else {
                    WriteRequestStep::UpDown
                };
                self.write_request(handle, next)
            }
            WriteRequestStep::UpDown => {
                if frame.state.is_exclusive() {
                    return self.write_request(handle, WriteRequestStep::UpDownFinish);
                }
                let low = self.hierarchy.require_low_module(target, addr)?;
                let write = Kind::WriteRequest {
                    direction: Direction::UP_DOWN,
                };
                self.call(handle, write, target, low, addr, WriteRequestStep::UpDownFinish);
                Ok(())
            }
            WriteRequestStep::UpDownFinish => {
                if frame.error.is_some() {
                    self.unlock_line(handle)?;
                    self.reply_error(handle)?;
                    return self.write_request(handle, WriteRequestStep::Reply);
                }
                let (set, way, state) = (frame.set, frame.way, frame.state);
                let exclusive = if matches!(
                    state,
                    State::MODIFIED | State::OWNED | State::NON_COHERENT
                ) {
                    State::MODIFIED
                } else {
                    State::EXCLUSIVE
                };
                self.set_line_state(handle, exclusive)?;

                let below = &mut self.hierarchy.modules[target];
                below.directory.clear(set, way);
                if let Some(requester) = below.high_index(m) {
                    below.directory.add_sharer(set, way, requester);
                    below.directory.set_owner(set, way, Some(requester));
                }

                // a requester upgrading its own copy needs no data
                let has_copy = self.hierarchy.state(m, addr).is_valid();
                let block_size = self.block_size(target);
                let frame = self.frame_mut(handle)?;
                if has_copy {
                    frame.reply = Reply::ACK;
                    frame.reply_size = HEADER_SIZE;
                } else {
                    frame.reply = Reply::ACK_DATA;
                    frame.reply_size = block_size + HEADER_SIZE;
                }
                self.unlock_line(handle)?;
                self.write_request(handle, WriteRequestStep::Reply)
            }
            WriteRequestStep::DownUp => {
                if !frame.locked {
                    let frame = self.frame_mut(handle)?;
                    frame.reply = Reply::ACK;
                    frame.reply_size = HEADER_SIZE;
                    return self.write_request(handle, WriteRequestStep::Reply);
                }
                let dirty = frame.state.is_dirty() || frame.dirty;
                let block_size = self.block_size(target);
                let frame = self.frame_mut(handle)?;
                if dirty {
                    frame.reply = Reply::ACK_DATA;
                    frame.reply_size = block_size + HEADER_SIZE;
                } else {
                    frame.reply = Reply::ACK;
                    frame.reply_size = HEADER_SIZE;
                }
                if dirty {
                    let parent = self.parent_of(handle)?;
                    self.frame_mut(parent)?.dirty = true;
                }
                self.write_request(handle, WriteRequestStep::DownUpFinish)
            }
            WriteRequestStep::DownUpFinish => {
                let (set, way) = (frame.set, frame.way);
                self.set_line_state(handle, State::INVALID)?;
                self.hierarchy.modules[target].directory.clear(set, way);
                self.unlock_line(handle)?;
                self.write_request(handle, WriteRequestStep::Reply)
            }
            WriteRequestStep::Reply => {
                let size = frame.reply_size;
                self.send(
                    handle,
                    target,
                    m,
                    size,
                    false,
                    WriteRequestStep::Reply,
                    WriteRequestStep::Finish,
                )
            }
            WriteRequestStep::Finish => {
                self.deliver(handle)?;
                self.retire(handle)?;
                Ok(())
            }
        }
    }
}

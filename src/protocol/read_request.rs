use crate::{
    access::{Direction, Handle, Kind, Reply, TransactionError},
    cache::next_state,
    error::Error,
    interconn::{Interconnect, HEADER_SIZE},
    module::ModuleId,
    sim::Simulator,
    State,
};

/// Read a block from another level.
///
/// Up-down requests go from `module` to the level below it and return the
/// block in a shared or exclusive state. Down-up requests go from `module` to
/// an upper level holder, which gives up exclusiveness and returns its dirty
/// data, possibly straight to a peer of the original requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRequestStep {
    Start,
    Receive,
    Action,
    UpDown,
    UpDownMiss,
    UpDownFinish,
    DownUp,
    DownUpWait,
    DownUpFinish,
    Reply,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn read_request(
        &mut self,
        handle: Handle,
        step: ReadRequestStep,
    ) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, target, addr) = (frame.module, frame.target, frame.addr);
        let Kind::ReadRequest {
            direction,
            nc_write,
            peer,
        } = frame.kind
        else {
            return Err(Error::Protocol(format!("{frame} is not a read request")));
        };
        let downup = direction == Direction::DOWN_UP;

        match step {
            ReadRequestStep::Start => self.send(
                handle,
                m,
                target,
                HEADER_SIZE,
                true,
                ReadRequestStep::Start,
                ReadRequestStep::Receive,
            ),
            ReadRequestStep::Receive => {
                self.deliver(handle)?;
                let lookup = Kind::FindAndLock {
                    blocking: downup,
                    allocate: !downup,
                    downup,
                };
                self.call(handle, lookup, target, target, addr, ReadRequestStep::Action);
                Ok(())
            }
            ReadRequestStep::Action => {
                let frame = self.frame(handle)?;
                if frame.error.is_some() {
                    self.reply_error(handle)?;
                    return self.read_request(handle, ReadRequestStep::Reply);
                }
                match direction {
                    Direction::DOWN_UP => self.read_request(handle, ReadRequestStep::DownUp),
                    Direction::UP_DOWN if frame.state.is_valid() => {
                        self.read_request(handle, ReadRequestStep::UpDown)
                    }
                    Direction::UP_DOWN => {
                        let low = self.hierarchy.require_low_module(target, addr)?;
                        let read = Kind::ReadRequest {
                            direction: Direction::UP_DOWN,
                            nc_write: false,
                            peer: None,
                        };
                        self.call(handle, read, target, low, addr, ReadRequestStep::UpDownMiss);
                        Ok(())
                    }
                }
            }
            ReadRequestStep::UpDown => {
                let (set, way, tag) = (frame.set, frame.way, frame.tag);
                let below = &self.hierarchy.modules[target];
                let entry = below.directory.entry(set, way);
                let requester = below.high_index(m);
                let owner = entry.owner;
                let others_share = self.policy.known_sharers(entry, requester);
                let holders = self.upper_holders(target, set, way, tag, requester);

                let frame = self.frame_mut(handle)?;
                frame.shared = others_share;
                frame.pending = 1 + holders.len();
                for (index, holder) in holders {
                    let peer = (self.config.peer_transfers
                        && self.policy.supports_peer_transfer()
                        && !nc_write
                        && owner == Some(index)
                        && self.hierarchy.are_peers(holder, m))
                    .then_some(m);
                    let read = Kind::ReadRequest {
                        direction: Direction::DOWN_UP,
                        nc_write: false,
                        peer,
                    };
                    self.call(handle, read, target, holder, tag, ReadRequestStep::UpDownFinish);
                }
                self.read_request(handle, ReadRequestStep::UpDownFinish)
            }
            ReadRequestStep::UpDownMiss => {
                if frame.error.is_some() {
                    self.unlock_line(handle)?;
                    self.reply_error(handle)?;
                    return self.read_request(handle, ReadRequestStep::Reply);
                }
                let (set, way) = (frame.set, frame.way);
                let state = next_state(frame.shared, frame.dirty);
                self.set_line_state(handle, state)?;
                self.hierarchy.modules[target].directory.clear(set, way);
                self.read_request(handle, ReadRequestStep::UpDownFinish)
            }
            ReadRequestStep::UpDownFinish => {
                let block_size = self.block_size(target);
                let frame = self.frame_mut(handle)?;
                if frame.pending > 0 {
                    frame.pending -= 1;
                    if frame.pending > 0 {
                        return Ok(());
                    }
                }
                let (set, way, state) = (frame.set, frame.way, frame.state);
                let shared = nc_write
                    || frame.shared
                    || matches!(
                        state,
                        State::OWNED | State::NON_COHERENT | State::SHARED
                    );
                let dirty = frame.dirty || matches!(state, State::MODIFIED | State::OWNED);
                let retain_owner = frame.retain_owner;
                let to_peer = frame.reply == Reply::ACK_DATA_SENT_TO_PEER;
                if !to_peer {
                    frame.reply = Reply::ACK_DATA;
                }
                frame.reply_size = if to_peer {
                    HEADER_SIZE
                } else {
                    block_size + HEADER_SIZE
                };

                let below = &mut self.hierarchy.modules[target];
                if shared && state != State::NON_COHERENT {
                    let state = next_state(true, dirty);
                    below.cache.set_state(set, way, state);
                    self.frame_mut(handle)?.state = state;
                }
                let below = &mut self.hierarchy.modules[target];
                if let Some(requester) = below.high_index(m) {
                    below.directory.add_sharer(set, way, requester);
                    if !shared {
                        below.directory.set_owner(set, way, Some(requester));
                    } else if !retain_owner {
                        below.directory.set_owner(set, way, None);
                    }
                }

                let parent = self.parent_of(handle)?;
                let parent = self.frame_mut(parent)?;
                parent.shared = shared;
                parent.dirty = false;
                self.unlock_line(handle)?;
                self.read_request(handle, ReadRequestStep::Reply)
            }
            ReadRequestStep::DownUp => {
                if !frame.locked {
                    // the block is already gone
                    let frame = self.frame_mut(handle)?;
                    frame.reply = Reply::ACK;
                    frame.reply_size = HEADER_SIZE;
                    return self.read_request(handle, ReadRequestStep::Reply);
                }
                let (set, way, tag) = (frame.set, frame.way, frame.tag);
                let holders = self.upper_holders(target, set, way, tag, None);
                self.frame_mut(handle)?.pending = 1 + holders.len();
                for (_, holder) in holders {
                    let read = Kind::ReadRequest {
                        direction: Direction::DOWN_UP,
                        nc_write: false,
                        peer: None,
                    };
                    self.call(handle, read, target, holder, tag, ReadRequestStep::DownUpWait);
                }
                self.read_request(handle, ReadRequestStep::DownUpWait)
            }
            ReadRequestStep::DownUpWait => {
                let frame = self.frame_mut(handle)?;
                frame.pending = frame.pending.saturating_sub(1);
                if frame.pending > 0 {
                    return Ok(());
                }
                let (state, tag) = (frame.state, frame.tag);
                match peer {
                    Some(peer)
                        if matches!(
                            state,
                            State::MODIFIED | State::OWNED | State::EXCLUSIVE
                        ) =>
                    {
                        frame.reply = Reply::ACK_DATA_SENT_TO_PEER;
                        let parent = self.parent_of(handle)?;
                        self.frame_mut(parent)?.reply = Reply::ACK_DATA_SENT_TO_PEER;
                        self.call(handle, Kind::Peer, target, peer, tag, ReadRequestStep::DownUpFinish);
                        Ok(())
                    }
                    _ => self.read_request(handle, ReadRequestStep::DownUpFinish),
                }
            }
            ReadRequestStep::DownUpFinish => {
                let (state, to_peer) = (frame.state, frame.reply == Reply::ACK_DATA_SENT_TO_PEER);
                let dirty = frame.dirty || matches!(state, State::MODIFIED | State::OWNED);
                let demoted = state.demote(dirty);
                self.set_line_state(handle, demoted)?;

                let parent = self.parent_of(handle)?;
                let parent = self.frame_mut(parent)?;
                parent.shared = true;
                parent.dirty |= dirty;
                if demoted == State::OWNED {
                    parent.retain_owner = true;
                }

                let size = if to_peer {
                    HEADER_SIZE
                } else {
                    self.block_size(target) + HEADER_SIZE
                };
                let frame = self.frame_mut(handle)?;
                frame.reply_size = size;
                if !to_peer {
                    frame.reply = Reply::ACK_DATA;
                }
                self.unlock_line(handle)?;
                self.read_request(handle, ReadRequestStep::Reply)
            }
            ReadRequestStep::Reply => {
                let size = frame.reply_size;
                self.send(
                    handle,
                    target,
                    m,
                    size,
                    false,
                    ReadRequestStep::Reply,
                    ReadRequestStep::Finish,
                )
            }
            ReadRequestStep::Finish => {
                self.deliver(handle)?;
                self.retire(handle)?;
                Ok(())
            }
        }
    }

    /// Upper neighbors of `module` that must see a request for a block,
    /// as `(directory index, module)` pairs.
    pub(crate) fn upper_holders(
        &self,
        module: ModuleId,
        set: usize,
        way: usize,
        tag: crate::address,
        except: Option<usize>,
    ) -> Vec<(usize, ModuleId)> {
        let module_ref = &self.hierarchy.modules[module];
        self.policy
            .read_targets(module_ref.directory.entry(set, way), module_ref.high.len())
            .into_iter()
            .filter(|index| Some(*index) != except)
            .map(|index| (index, module_ref.high[index]))
            .filter(|(_, high)| {
                matches!(self.hierarchy.low_module(*high, tag), Ok(Some(low)) if low == module)
            })
            .collect()
    }

    /// Answer a failed lookup with an error reply and fail the requester.
    pub(crate) fn reply_error(&mut self, handle: Handle) -> Result<(), Error> {
        let frame = self.frame_mut(handle)?;
        frame.reply = Reply::ACK_ERROR;
        frame.reply_size = HEADER_SIZE;
        let target = frame.target;
        let parent = self.parent_of(handle)?;
        self.set_error(parent, TransactionError::Downstream { module: target })
    }
}

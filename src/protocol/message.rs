use crate::{
    access::{Handle, Kind, MessageKind},
    error::Error,
    interconn::{Interconnect, HEADER_SIZE},
    sim::Simulator,
};

/// Notification to the level below that needs no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStep {
    Start,
    Receive,
    Action,
    Reply,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn message(&mut self, handle: Handle, step: MessageStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (m, target, addr) = (frame.module, frame.target, frame.addr);
        let Kind::Message(kind) = frame.kind else {
            return Err(Error::Protocol(format!("{frame} is not a message")));
        };

        match step {
            MessageStep::Start => self.send(
                handle,
                m,
                target,
                HEADER_SIZE,
                true,
                MessageStep::Start,
                MessageStep::Receive,
            ),
            MessageStep::Receive => {
                self.deliver(handle)?;
                let lookup = Kind::FindAndLock {
                    blocking: false,
                    allocate: false,
                    downup: false,
                };
                self.call(handle, lookup, target, target, addr, MessageStep::Action);
                Ok(())
            }
            MessageStep::Action => {
                if frame.error.is_some() {
                    self.reply_error(handle)?;
                    return self.message(handle, MessageStep::Reply);
                }
                if frame.locked {
                    let (set, way) = (frame.set, frame.way);
                    let below = &mut self.hierarchy.modules[target];
                    match kind {
                        MessageKind::ClearOwner => {
                            let requester = below.high_index(m);
                            if requester.is_some() && below.directory.entry(set, way).owner == requester {
                                below.directory.set_owner(set, way, None);
                            }
                        }
                    }
                    self.unlock_line(handle)?;
                } else {
                    log::warn!(
                        "{}: message for missing block {addr:#x} from {}",
                        self.hierarchy.name(target),
                        self.hierarchy.name(m),
                    );
                }
                self.message(handle, MessageStep::Reply)
            }
            MessageStep::Reply => self.send(
                handle,
                target,
                m,
                HEADER_SIZE,
                false,
                MessageStep::Reply,
                MessageStep::Finish,
            ),
            MessageStep::Finish => {
                self.deliver(handle)?;
                self.retire(handle)?;
                Ok(())
            }
        }
    }
}

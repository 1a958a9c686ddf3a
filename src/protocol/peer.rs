use crate::{
    access::Handle,
    error::Error,
    interconn::{Interconnect, HEADER_SIZE},
    sim::Simulator,
};

/// Block transfer from an upper level holder straight to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStep {
    Start,
    Receive,
    Reply,
    Finish,
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub(crate) fn peer(&mut self, handle: Handle, step: PeerStep) -> Result<(), Error> {
        let frame = self.frame(handle)?;
        let (holder, requester) = (frame.module, frame.target);

        match step {
            PeerStep::Start => {
                let size = self.block_size(holder) + HEADER_SIZE;
                self.send(
                    handle,
                    holder,
                    requester,
                    size,
                    true,
                    PeerStep::Start,
                    PeerStep::Receive,
                )
            }
            PeerStep::Receive => {
                self.deliver(handle)?;
                self.peer(handle, PeerStep::Reply)
            }
            PeerStep::Reply => self.send(
                handle,
                requester,
                holder,
                HEADER_SIZE,
                false,
                PeerStep::Reply,
                PeerStep::Finish,
            ),
            PeerStep::Finish => {
                self.deliver(handle)?;
                self.retire(handle)?;
                Ok(())
            }
        }
    }
}

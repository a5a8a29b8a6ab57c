//! Reader FSM: drains every node currently obtainable from the read buffer into the multiplexer,
//! then signals that more bytes are needed from the transport.

use crate::error::Result;
use crate::multiplexer::{ConsumeOutcome, Multiplexer};
use crate::read_buffer::ReadBuffer;

#[derive(Default)]
pub struct ReaderFsm;

impl ReaderFsm {
    pub fn new() -> Self {
        ReaderFsm
    }

    /// Feeds everything currently in `read_buf` to the multiplexer's parser, discarding consumed
    /// bytes as it goes, until the parser reports it needs more data than is available.
    pub fn drain(&mut self, mux: &mut Multiplexer, read_buf: &mut ReadBuffer) -> Result<()> {
        loop {
            let (outcome, consumed) = mux.consume_next(read_buf.filled())?;
            match outcome {
                ConsumeOutcome::NeedsMore => return Ok(()),
                ConsumeOutcome::GotResponse | ConsumeOutcome::GotPush => {
                    read_buf.consume(consumed);
                }
            }
        }
    }
}

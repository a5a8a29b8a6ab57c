//! Writer FSM: while there is staged work, emit it; otherwise wait for a notification that more
//! has arrived.

use crate::multiplexer::Multiplexer;

#[derive(Debug, PartialEq, Eq)]
pub enum WriterAction {
    /// There is `len` bytes staged in the multiplexer's write buffer; write them, then call
    /// [`WriterFsm::write_completed`].
    Write { len: usize },
    /// Nothing staged; wait for a "work available" notification before calling `resume` again.
    Wait,
    /// Terminal cancellation observed; stop the writer loop.
    Done,
}

#[derive(Default)]
pub struct WriterFsm;

impl WriterFsm {
    pub fn new() -> Self {
        WriterFsm
    }

    pub fn resume(&mut self, mux: &mut Multiplexer, cancelled: bool) -> WriterAction {
        if cancelled {
            return WriterAction::Done;
        }
        if mux.prepare_write() > 0 {
            WriterAction::Write {
                len: mux.write_buffer().len(),
            }
        } else {
            WriterAction::Wait
        }
    }

    /// Call once the bytes from a preceding `Write` action have been fully written to the
    /// transport.
    pub fn write_completed(&mut self, mux: &mut Multiplexer) {
        mux.commit_write();
    }
}

//! The growable read buffer the reader FSM fills from the transport and the multiplexer's parser
//! consumes from, bounded by a configurable maximum so a misbehaving peer cannot grow it without
//! limit.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{fail, ErrorKind, Result};

pub struct ReadBuffer {
    buf: BytesMut,
    max_read_size: usize,
    append_size: usize,
}

impl ReadBuffer {
    pub fn new(max_read_size: usize, append_size: usize) -> Self {
        ReadBuffer {
            buf: BytesMut::with_capacity(append_size),
            max_read_size,
            append_size,
        }
    }

    /// The bytes committed so far, not yet consumed by the parser.
    pub fn filled(&self) -> &[u8] {
        &self.buf
    }

    /// Drops the first `n` bytes, which the multiplexer has already parsed.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Reads at least one more byte from `transport` into the buffer. Fails with
    /// `exceeds_maximum_read_buffer_size` rather than growing past the configured bound, and with
    /// `connection_lost` on EOF.
    pub async fn fill_some<T: AsyncRead + Unpin>(&mut self, transport: &mut T) -> Result<usize> {
        if self.buf.len() + self.append_size > self.max_read_size {
            fail!((
                ErrorKind::ExceedsMaximumReadBufferSize,
                "read buffer exceeded the configured maximum"
            ));
        }
        self.buf.reserve(self.append_size);
        let n = transport.read_buf(&mut self.buf).await?;
        if n == 0 {
            fail!((ErrorKind::ConnectionLost, "transport closed by peer"));
        }
        Ok(n)
    }
}

//! The fixed-capacity input window a connection parses requests from.
//!
//! Bytes read from the transport land in one backing array that lives as
//! long as the processor. Three cursors describe it:
//!
//! - `pos`: next unread byte
//! - `last_valid`: one past the last filled byte
//! - `end`: where the header block of the current message stopped and the
//!   body starts, set once per message by [`ByteWindow::mark_end`]
//!
//! Body reads compact unread bytes down to a separate floor, `body_start`,
//! which starts at `end` and may drop to zero; `end` itself never moves until
//! the next message.
//!
//! `0 <= pos <= last_valid <= capacity` holds at all times. While headers are
//! being parsed the window never compacts, so a request line plus header block
//! that does not fit in the capacity fails with
//! [`ParseError::TooLargeHeader`] instead of growing the buffer.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::protocol::ParseError;
use crate::utils::with_timeout;

#[derive(Debug)]
pub struct ByteWindow {
    buf: Box<[u8]>,
    pos: usize,
    last_valid: usize,
    end: usize,
    body_start: usize,
    parsing_header: bool,
}

impl ByteWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            pos: 0,
            last_valid: 0,
            end: 0,
            body_start: 0,
            parsing_header: true,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn last_valid(&self) -> usize {
        self.last_valid
    }

    /// Start of the body; only meaningful once the header block is parsed.
    #[inline]
    pub fn end(&self) -> Option<usize> {
        (!self.parsing_header).then_some(self.end)
    }

    /// Bytes filled but not yet consumed.
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.pos..self.last_valid]
    }

    #[inline]
    pub fn has_unread(&self) -> bool {
        self.pos < self.last_valid
    }

    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.last_valid);
        self.pos = (self.pos + n).min(self.last_valid);
    }

    /// Records the header/body boundary at the current position.
    pub fn mark_end(&mut self) {
        self.end = self.pos;
        self.body_start = self.pos;
        self.parsing_header = false;
    }

    /// Reads more bytes from `reader` into the window.
    ///
    /// Returns `Ok(false)` when the peer closed the stream.
    pub async fn fill<R>(&mut self, reader: &mut R, timeout: Option<Duration>) -> Result<bool, ParseError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.parsing_header {
            if self.last_valid == self.capacity() {
                return Err(ParseError::too_large_header(self.capacity()));
            }
        } else {
            self.compact_body();
            if self.last_valid == self.capacity() {
                return Err(ParseError::invalid_body("request body does not fit the input window"));
            }
        }

        let n = with_timeout(timeout, reader.read(&mut self.buf[self.last_valid..])).await?;
        trace!(read = n, pos = self.pos, last_valid = self.last_valid, "fill input window");
        if n == 0 {
            return Ok(false);
        }
        self.last_valid += n;
        Ok(true)
    }

    /// Body bytes are consumed as they arrive; reuse the space after the header block.
    ///
    /// Header values are copied out once parsed, so when less than half the
    /// window is left after the header block the body starts over at zero.
    fn compact_body(&mut self) {
        if self.capacity() - self.body_start < self.capacity() / 2 {
            self.body_start = 0;
        }
        if self.pos <= self.body_start {
            return;
        }
        let unread = self.last_valid - self.pos;
        self.buf.copy_within(self.pos..self.last_valid, self.body_start);
        self.pos = self.body_start;
        self.last_valid = self.body_start + unread;
    }

    /// Prepares for the next pipelined request, keeping any bytes already
    /// received for it at the start of the window.
    pub fn next_request(&mut self) {
        if self.pos < self.last_valid {
            let unread = self.last_valid - self.pos;
            self.buf.copy_within(self.pos..self.last_valid, 0);
            self.last_valid = unread;
        } else {
            self.last_valid = 0;
        }
        self.pos = 0;
        self.end = 0;
        self.body_start = 0;
        self.parsing_header = true;
    }

    pub fn recycle(&mut self) {
        self.pos = 0;
        self.last_valid = 0;
        self.end = 0;
        self.body_start = 0;
        self.parsing_header = true;
    }
}

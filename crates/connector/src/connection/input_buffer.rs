//! The input side of a connection.
//!
//! [`InputBuffer`] drives the sans-IO parsers over its [`ByteWindow`],
//! refilling the window from the transport whenever a parser needs more
//! bytes, and reads the request body through the active input filters.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use http::Method;
use tokio::io::AsyncRead;
use tracing::{debug, trace, warn};

use crate::codec::{ByteWindow, HeaderLine, InputFilter, InputFilterChain, parse_header, parse_request_line};
use crate::protocol::{ParseError, PayloadItem, Request};
use crate::utils::ensure;

/// How the input side behaves when the bytes it needs are not buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Wait for the request line, or for more body bytes, to arrive.
    Block,
    /// Do not wait. [`InputBuffer::parse_request_line`] reports
    /// [`LineStatus::NoData`] when nothing of a next request is buffered, and
    /// [`InputBuffer::read_body`] returns an empty chunk when the socket has
    /// no body bytes ready.
    TryAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Parsed,
    NoData,
    /// The peer closed the connection before starting another request.
    Eof,
}

/// One step of body decoding over the buffered bytes.
enum Decoded {
    Chunk(Bytes),
    End,
    NeedMore,
}

#[derive(Debug)]
pub struct InputBuffer {
    window: ByteWindow,
    filters: InputFilterChain,
    scratch: BytesMut,
    /// Body chunks decoded ahead of a read by [`InputBuffer::available`].
    ready: VecDeque<Bytes>,
    body_mode: ParseMode,
    raw_eof: bool,
    body_finished: bool,
    swallow_input: bool,
    read_timeout: Option<Duration>,
}

impl InputBuffer {
    pub fn new(capacity: usize, read_timeout: Option<Duration>) -> Self {
        Self {
            window: ByteWindow::new(capacity),
            filters: InputFilterChain::new(),
            scratch: BytesMut::new(),
            ready: VecDeque::new(),
            body_mode: ParseMode::Block,
            raw_eof: false,
            body_finished: false,
            swallow_input: true,
            read_timeout,
        }
    }

    pub fn window(&self) -> &ByteWindow {
        &self.window
    }

    pub fn filters(&self) -> &InputFilterChain {
        &self.filters
    }

    pub fn add_filter(&mut self, filter: InputFilter) {
        self.filters.add_active(filter);
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn is_non_blocking(&self) -> bool {
        self.body_mode == ParseMode::TryAvailable
    }

    /// Switches body reads between waiting for bytes and returning whatever
    /// is there.
    pub fn set_non_blocking(&mut self, non_blocking: bool) {
        self.body_mode = if non_blocking { ParseMode::TryAvailable } else { ParseMode::Block };
    }

    pub fn swallow_input(&self) -> bool {
        self.swallow_input
    }

    pub fn set_swallow_input(&mut self, swallow: bool) {
        self.swallow_input = swallow;
    }

    pub fn is_body_finished(&self) -> bool {
        self.body_finished && self.ready.is_empty()
    }

    /// Parses the request line into `request`.
    pub async fn parse_request_line<R>(
        &mut self,
        reader: &mut R,
        mode: ParseMode,
        request: &mut Request,
    ) -> Result<LineStatus, ParseError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            // blank lines between requests are not the start of a request
            let blank = self.window.unread().iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
            if blank > 0 {
                self.window.advance(blank);
            }

            if self.window.has_unread() {
                if let Some((line, consumed)) = parse_request_line(self.window.unread())? {
                    let method = Method::from_bytes(line.method).map_err(|_| ParseError::InvalidMethod)?;
                    request.set_request_line(
                        method,
                        Bytes::copy_from_slice(line.target),
                        Bytes::copy_from_slice(line.path),
                        line.query.map(Bytes::copy_from_slice),
                        Bytes::copy_from_slice(line.protocol),
                    );
                    self.window.advance(consumed);
                    trace!(method = %request.method(), uri = ?request.unparsed_uri(), "parsed request line");
                    return Ok(LineStatus::Parsed);
                }
            } else if mode == ParseMode::TryAvailable {
                return Ok(LineStatus::NoData);
            }

            if !self.window.fill(reader, self.read_timeout).await? {
                return if self.window.has_unread() { Err(ParseError::UnexpectedEof) } else { Ok(LineStatus::Eof) };
            }
        }
    }

    /// Parses header fields until the blank line, appending them to `request`.
    pub async fn parse_headers<R>(&mut self, reader: &mut R, request: &mut Request) -> Result<(), ParseError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            match parse_header(self.window.unread())? {
                Some((HeaderLine::End, consumed)) => {
                    self.window.advance(consumed);
                    self.window.mark_end();
                    trace!(headers = request.headers().len(), "parsed header block");
                    return Ok(());
                }
                Some((HeaderLine::Field { name, value }, consumed)) => {
                    self.window.advance(consumed);
                    request.headers_mut().add_value(name, value);
                }
                None => {
                    ensure!(self.window.fill(reader, self.read_timeout).await?, ParseError::UnexpectedEof);
                }
            }
        }
    }

    /// Marks the header block as complete without reading one (HTTP/0.9).
    pub fn skip_headers(&mut self) {
        self.window.mark_end();
    }

    /// Waits for the first byte of another request on an idle connection.
    ///
    /// Returns `Ok(false)` when the peer closed the connection.
    pub async fn await_data<R>(&mut self, reader: &mut R, timeout: Option<Duration>) -> Result<bool, ParseError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.window.has_unread() {
            return Ok(true);
        }
        self.window.fill(reader, timeout).await
    }

    /// Reads the next chunk of the request body through the active filters.
    ///
    /// Returns `Ok(None)` once the body is complete. In non-blocking mode an
    /// empty chunk means nothing can be read right now.
    pub async fn read_body<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, ParseError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.read_body_in(reader, self.body_mode).await
    }

    pub(crate) async fn read_body_in<R>(&mut self, reader: &mut R, mode: ParseMode) -> Result<Option<Bytes>, ParseError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if let Some(bytes) = self.ready.pop_front() {
            return Ok(Some(bytes));
        }

        loop {
            match self.decode_buffered()? {
                Decoded::Chunk(bytes) => return Ok(Some(bytes)),
                Decoded::End => return Ok(None),
                Decoded::NeedMore => {
                    ensure!(!self.raw_eof, ParseError::UnexpectedEof);
                    let filled = match mode {
                        ParseMode::Block => self.window.fill(reader, self.read_timeout).await?,
                        ParseMode::TryAvailable => match self.window.fill(reader, None).now_or_never() {
                            Some(filled) => filled?,
                            None => {
                                trace!("no request body bytes ready");
                                return Ok(Some(Bytes::new()));
                            }
                        },
                    };
                    if !filled {
                        self.raw_eof = true;
                    }
                }
            }
        }
    }

    /// Counts the body bytes that can be read without touching the socket.
    ///
    /// Whatever the filters can decode from the buffered bytes is decoded now
    /// and handed out by the following reads.
    pub fn available(&mut self) -> Result<usize, ParseError> {
        loop {
            match self.decode_buffered()? {
                Decoded::Chunk(bytes) => self.ready.push_back(bytes),
                Decoded::End | Decoded::NeedMore => break,
            }
        }
        Ok(self.ready.iter().map(Bytes::len).sum())
    }

    fn decode_buffered(&mut self) -> Result<Decoded, ParseError> {
        if self.body_finished || self.filters.is_empty() {
            return Ok(Decoded::End);
        }

        loop {
            self.scratch.clear();
            self.scratch.extend_from_slice(self.window.unread());
            let available = self.scratch.len();
            let item = self.filters.pull(&mut self.scratch, self.raw_eof)?;
            self.window.advance(available - self.scratch.len());

            match item {
                Some(PayloadItem::Chunk(bytes)) if bytes.is_empty() => {}
                Some(PayloadItem::Chunk(bytes)) => return Ok(Decoded::Chunk(bytes)),
                Some(PayloadItem::Eof) => {
                    self.body_finished = true;
                    return Ok(Decoded::End);
                }
                None => return Ok(Decoded::NeedMore),
            }
        }
    }

    /// Hands `body` out again as the request body, from its first byte.
    pub fn replay(&mut self, body: Bytes) {
        self.ready.clear();
        self.filters.add_active(InputFilter::saved(body));
        self.body_finished = false;
    }

    /// Consumes whatever is left of the current body so the next request
    /// starts at the right byte.
    ///
    /// At most `limit` bytes are drained; a longer body fails with
    /// [`ParseError::BodyTooLarge`] and the connection has to be closed.
    pub async fn end_request<R>(&mut self, reader: &mut R, limit: usize) -> Result<(), ParseError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.ready.is_empty() && (self.body_finished || self.filters.is_empty()) {
            return Ok(());
        }
        if !self.swallow_input {
            debug!("request body not swallowed");
            return Ok(());
        }

        let mut swallowed = 0;
        while let Some(bytes) = self.read_body_in(reader, ParseMode::Block).await? {
            swallowed += bytes.len();
            if swallowed > limit {
                warn!(swallowed, limit, "unread request body exceeds the swallow limit");
                return Err(ParseError::body_too_large(limit));
            }
        }
        if swallowed > 0 {
            debug!(swallowed, "drained unread request body");
        }
        Ok(())
    }

    /// Resets the per-request state, keeping pipelined bytes.
    pub fn next_request(&mut self) {
        self.window.next_request();
        self.filters.recycle();
        self.scratch.clear();
        self.ready.clear();
        self.body_mode = ParseMode::Block;
        self.raw_eof = false;
        self.body_finished = false;
        self.swallow_input = true;
    }

    pub fn recycle(&mut self) {
        self.next_request();
        self.window.recycle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_parse_request() {
        let mut reader: &[u8] = b"GET /a?x=1 HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();

        let status = input.parse_request_line(&mut reader, ParseMode::Block, &mut request).await.unwrap();
        assert_eq!(status, LineStatus::Parsed);
        input.parse_headers(&mut reader, &mut request).await.unwrap();

        assert_eq!(request.method(), Method::GET);
        assert_eq!(&request.uri()[..], b"/a");
        assert_eq!(request.query().map(|q| &q[..]), Some(&b"x=1"[..]));
        assert_eq!(&request.protocol()[..], b"HTTP/1.1");
        assert_eq!(request.headers().len(), 1);
        assert_eq!(request.headers().get_str("host"), Some("h"));
    }

    #[tokio::test]
    async fn test_try_available_without_data() {
        let mut reader: &[u8] = b"";
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();

        let status = input.parse_request_line(&mut reader, ParseMode::TryAvailable, &mut request).await.unwrap();
        assert_eq!(status, LineStatus::NoData);

        let status = input.parse_request_line(&mut reader, ParseMode::Block, &mut request).await.unwrap();
        assert_eq!(status, LineStatus::Eof);
    }

    #[tokio::test]
    async fn test_line_never_terminates() {
        let long = format!("GET /{} HTTP/1.1\r\n", "a".repeat(2000));
        let mut reader = long.as_bytes();
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();

        let err = input.parse_request_line(&mut reader, ParseMode::Block, &mut request).await.unwrap_err();
        assert!(matches!(err, ParseError::TooLargeHeader { max_size: 1024 }));
    }

    #[tokio::test]
    async fn test_chunked_body_then_pipelined_request() {
        let wire = indoc! {"
            POST /upload HTTP/1.1\r
            Transfer-Encoding: chunked\r
            \r
            4\r
            test\r
            0\r
            \r
            GET /next HTTP/1.1\r
            \r
        "};
        let mut reader = wire.as_bytes();
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();

        input.parse_request_line(&mut reader, ParseMode::Block, &mut request).await.unwrap();
        input.parse_headers(&mut reader, &mut request).await.unwrap();
        input.add_filter(InputFilter::chunked());

        assert_eq!(input.read_body(&mut reader).await.unwrap(), Some(Bytes::from_static(b"test")));
        assert_eq!(input.read_body(&mut reader).await.unwrap(), None);
        input.end_request(&mut reader, 0).await.unwrap();

        input.next_request();
        request.recycle();
        let status = input.parse_request_line(&mut reader, ParseMode::TryAvailable, &mut request).await.unwrap();
        assert_eq!(status, LineStatus::Parsed);
        assert_eq!(&request.uri()[..], b"/next");
    }

    #[tokio::test]
    async fn test_swallow_limit() {
        let mut reader: &[u8] = b"POST / HTTP/1.1\r\n\r\n0123456789";
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();
        input.parse_request_line(&mut reader, ParseMode::Block, &mut request).await.unwrap();
        input.parse_headers(&mut reader, &mut request).await.unwrap();
        input.add_filter(InputFilter::identity(10));

        let err = input.end_request(&mut reader, 4).await.unwrap_err();
        assert!(matches!(err, ParseError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn test_body_cut_short() {
        let mut reader: &[u8] = b"POST / HTTP/1.1\r\n\r\nabc";
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();
        input.parse_request_line(&mut reader, ParseMode::Block, &mut request).await.unwrap();
        input.parse_headers(&mut reader, &mut request).await.unwrap();
        input.add_filter(InputFilter::identity(10));

        assert_eq!(input.read_body(&mut reader).await.unwrap(), Some(Bytes::from_static(b"abc")));
        assert!(matches!(input.read_body(&mut reader).await, Err(ParseError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_non_blocking_body_read() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"POST / HTTP/1.1\r\n\r\nabc").await.unwrap();
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();
        input.parse_request_line(&mut server, ParseMode::Block, &mut request).await.unwrap();
        input.parse_headers(&mut server, &mut request).await.unwrap();
        input.add_filter(InputFilter::identity(6));
        input.set_non_blocking(true);

        assert_eq!(input.read_body(&mut server).await.unwrap(), Some(Bytes::from_static(b"abc")));
        // the rest of the body has not been sent yet
        assert_eq!(input.read_body(&mut server).await.unwrap(), Some(Bytes::new()));

        client.write_all(b"def").await.unwrap();
        assert_eq!(input.read_body(&mut server).await.unwrap(), Some(Bytes::from_static(b"def")));
        assert_eq!(input.read_body(&mut server).await.unwrap(), None);

        input.next_request();
        assert!(!input.is_non_blocking());
    }

    #[tokio::test]
    async fn test_available_counts_decodable_bytes() {
        let mut reader: &[u8] = b"POST / HTTP/1.1\r\n\r\n3\r\nabc\r\n2\r\nde\r\n";
        let mut input = InputBuffer::new(1024, None);
        let mut request = Request::new();
        input.parse_request_line(&mut reader, ParseMode::Block, &mut request).await.unwrap();
        input.parse_headers(&mut reader, &mut request).await.unwrap();
        input.add_filter(InputFilter::chunked());

        assert_eq!(input.available().unwrap(), 5);
        assert_eq!(input.read_body(&mut reader).await.unwrap(), Some(Bytes::from_static(b"abc")));
        assert_eq!(input.available().unwrap(), 2);
        assert_eq!(input.read_body(&mut reader).await.unwrap(), Some(Bytes::from_static(b"de")));
        assert_eq!(input.available().unwrap(), 0);
        assert!(!input.is_body_finished());
    }
}

//! Serializes the status line and header block of a [`Response`].
//!
//! The block is written into the staging buffer in one go when the response
//! commits. A block larger than the configured header buffer is rejected and
//! the staging buffer is left as it was.

use crate::protocol::{Response, SendError};

use bytes::{BufMut, BytesMut};

use std::io;
use std::io::Write;
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct HeaderEncoder {
    max_size: usize,
}

impl HeaderEncoder {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Encoder<&Response> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, response: &Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        dst.reserve(INIT_HEADER_SIZE.min(self.max_size));

        let status = response.status();
        write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""))?;

        for (header_name, header_value) in response.headers() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");

        if dst.len() - start > self.max_size {
            error!(size = dst.len() - start, max_size = self.max_size, "response header block too large");
            dst.truncate(start);
            return Err(SendError::header_overflow(self.max_size));
        }
        Ok(())
    }
}

/// Fast writer implementation for writing to BytesMut.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use http::header::{CONTENT_LENGTH, HeaderValue, SERVER};
    use indoc::indoc;

    #[test]
    fn test_encode_head() {
        let mut response = Response::new();
        response.set_status(StatusCode::NOT_FOUND);
        response.insert_header(CONTENT_LENGTH, HeaderValue::from(3));
        response.insert_header(SERVER, HeaderValue::from_static("micro-connector"));

        let mut dst = BytesMut::new();
        HeaderEncoder::new(1024).encode(&response, &mut dst).unwrap();

        let expected = indoc! {"
            HTTP/1.1 404 Not Found\r
            content-length: 3\r
            server: micro-connector\r
            \r
        "};
        assert_eq!(std::str::from_utf8(&dst).unwrap(), expected);
    }

    #[test]
    fn test_overflow_leaves_buffer() {
        let mut response = Response::new();
        response.insert_header(SERVER, HeaderValue::from_static("a-rather-long-server-name"));

        let mut dst = BytesMut::from(&b"earlier"[..]);
        let err = HeaderEncoder::new(20).encode(&response, &mut dst).unwrap_err();
        assert!(matches!(err, SendError::HeaderOverflow { max_size: 20 }));
        assert_eq!(&dst[..], b"earlier");
    }
}

//! The gzip output slot.
//!
//! Compression itself is delegated to `flate2`; this stage only moves the
//! compressed bytes into the next lower stage as they become available.

use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use flate2::Compression;
use flate2::write::GzEncoder as FlateGzEncoder;
use tokio_util::codec::Encoder;
use tracing::trace;

use crate::protocol::{PayloadItem, SendError};

pub struct GzipEncoder {
    inner: FlateGzEncoder<bytes::buf::Writer<BytesMut>>,
    finished: bool,
}

impl std::fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipEncoder").field("finished", &self.finished).finish()
    }
}

impl Default for GzipEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GzipEncoder {
    pub fn new() -> Self {
        Self { inner: FlateGzEncoder::new(BytesMut::new().writer(), Compression::default()), finished: false }
    }

    /// Pushes everything compressed so far into `dst` with a sync flush.
    pub fn flush(&mut self, dst: &mut BytesMut) -> Result<(), SendError> {
        if !self.finished {
            self.inner.flush()?;
            self.take(dst);
        }
        Ok(())
    }

    fn take(&mut self, dst: &mut BytesMut) {
        let out = self.inner.get_mut().get_mut();
        if !out.is_empty() {
            trace!(len = out.len(), "emit gzip bytes");
            dst.unsplit(out.split());
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for GzipEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.finished {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(mut bytes) => {
                while bytes.has_remaining() {
                    let n = {
                        let chunk = bytes.chunk();
                        self.inner.write_all(chunk)?;
                        chunk.len()
                    };
                    bytes.advance(n);
                }
            }
            PayloadItem::Eof => {
                self.inner.try_finish()?;
                self.finished = true;
            }
        }
        self.take(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_compress_stream() {
        let mut encoder = GzipEncoder::new();
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello hello hello ")), &mut dst).unwrap();
        encoder.flush(&mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"world")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(&dst[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "hello hello hello world");
    }
}

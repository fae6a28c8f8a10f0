use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Write;

use tokio_util::codec::Encoder;

/// Frames body bytes with the chunked transfer coding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_finished(&self) -> bool {
        self.eof
    }

    pub fn recycle(&mut self) {
        self.eof = false;
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            // an empty chunk would read as the terminator
            PayloadItem::Chunk(bytes) if !bytes.has_remaining() => Ok(()),
            PayloadItem::Chunk(mut bytes) => {
                write!(helper::Writer(dst), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let n = chunk.len();
                    dst.put_slice(chunk);
                    bytes.advance(n);
                }
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::io;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl io::Write for Writer<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::body::ChunkedDecoder;
    use bytes::Bytes;
    use tokio_util::codec::Decoder;

    fn decode_all(wire: &mut BytesMut) -> Vec<u8> {
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        loop {
            match decoder.decode(wire).unwrap().unwrap() {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => return body,
            }
        }
    }

    #[test]
    fn test_framing() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"0123456789abcdef!")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        assert_eq!(&dst[..], b"11\r\n0123456789abcdef!\r\n0\r\n\r\n");

        // nothing after the terminator
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"late")), &mut dst).unwrap();
        assert_eq!(dst.len(), 28);
    }

    #[test]
    fn test_encode_then_decode() {
        let parts: [&[u8]; 3] = [b"hello", b"", b", chunked world"];
        let mut encoder = ChunkedEncoder::new();
        let mut wire = BytesMut::new();
        for part in parts {
            encoder.encode(PayloadItem::Chunk(Bytes::copy_from_slice(part)), &mut wire).unwrap();
        }
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut wire).unwrap();

        assert_eq!(decode_all(&mut wire), b"hello, chunked world");
        assert!(wire.is_empty());
    }

    #[test]
    fn test_empty_body() {
        let mut encoder = ChunkedEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut wire).unwrap();
        assert_eq!(&wire[..], b"0\r\n\r\n");
        assert!(decode_all(&mut wire).is_empty());
    }
}

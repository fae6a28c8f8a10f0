use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

/// Identity output: body bytes pass through unchanged.
///
/// With a declared length, bytes beyond it are dropped so the message stays
/// well-formed. Without one the body is close-delimited and unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    remaining: Option<u64>,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: Some(length) }
    }

    pub fn close_delimited() -> Self {
        Self { remaining: None }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let PayloadItem::Chunk(mut bytes) = item else {
            if let Some(remaining @ 1..) = self.remaining {
                warn!(remaining, "response body shorter than its content-length");
            }
            return Ok(());
        };

        let mut len = bytes.remaining();
        if let Some(remaining) = self.remaining.as_mut() {
            let allowed = usize::try_from(*remaining).unwrap_or(usize::MAX);
            if len > allowed {
                warn!(dropped = len - allowed, "response body exceeds its content-length, truncating");
                len = allowed;
            }
            *remaining -= len as u64;
        }

        dst.reserve(len);
        dst.put((&mut bytes).take(len));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_truncates_to_length() {
        let mut encoder = LengthEncoder::new(5);
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hel")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"lo world")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"hello");
        assert_eq!(encoder.remaining(), Some(0));
    }

    #[test]
    fn test_close_delimited() {
        let mut encoder = LengthEncoder::close_delimited();
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"any amount")), &mut dst).unwrap();
        assert_eq!(&dst[..], b"any amount");
        assert_eq!(encoder.remaining(), None);
    }
}

//! Decoders that hand out a body the connector already holds in memory.
//!
//! [`SavedDecoder`] replays a body that was consumed earlier (for example to
//! parse form parameters) so the application can still read it.
//! [`BufferedDecoder`] reads the whole remaining body into memory, up to a
//! limit, and releases it in one piece once the stage below reports its end.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::protocol::{ParseError, PayloadItem};
use crate::utils::ensure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDecoder {
    body: Option<Bytes>,
}

impl SavedDecoder {
    pub fn new(body: Bytes) -> Self {
        Self { body: (!body.is_empty()).then_some(body) }
    }
}

impl Decoder for SavedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, _src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(match self.body.take() {
            Some(body) => PayloadItem::Chunk(body),
            None => PayloadItem::Eof,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode(src)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedDecoder {
    limit: usize,
    buffered: BytesMut,
    released: bool,
}

impl BufferedDecoder {
    pub fn new(limit: usize) -> Self {
        Self { limit, buffered: BytesMut::new(), released: false }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }
}

impl Decoder for BufferedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.released {
            return Ok(Some(PayloadItem::Eof));
        }
        ensure!(self.buffered.len() + src.len() <= self.limit, ParseError::body_too_large(self.limit));
        self.buffered.unsplit(src.split());
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        self.released = true;
        debug!(len = self.buffered.len(), "release buffered request body");
        if self.buffered.is_empty() {
            Ok(Some(PayloadItem::Eof))
        } else {
            Ok(Some(PayloadItem::Chunk(self.buffered.split().freeze())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_replays_once() {
        let mut decoder = SavedDecoder::new(Bytes::from_static(b"a=1&b=2"));
        let mut src = BytesMut::new();
        let item = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(item.into_bytes().unwrap(), Bytes::from_static(b"a=1&b=2"));
        assert!(decoder.decode(&mut src).unwrap().unwrap().is_eof());

        let mut empty = SavedDecoder::new(Bytes::new());
        assert!(empty.decode(&mut src).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_buffered_releases_at_eof() {
        let mut decoder = BufferedDecoder::new(8);
        assert!(decoder.decode(&mut BytesMut::from(&b"abc"[..])).unwrap().is_none());
        assert!(decoder.decode(&mut BytesMut::from(&b"de"[..])).unwrap().is_none());
        assert_eq!(decoder.buffered_len(), 5);

        let item = decoder.decode_eof(&mut BytesMut::new()).unwrap().unwrap();
        assert_eq!(item.into_bytes().unwrap(), Bytes::from_static(b"abcde"));
        assert!(decoder.decode_eof(&mut BytesMut::new()).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_buffered_limit() {
        let mut decoder = BufferedDecoder::new(4);
        let err = decoder.decode(&mut BytesMut::from(&b"too long"[..])).unwrap_err();
        assert!(matches!(err, ParseError::BodyTooLarge { limit: 4 }));
    }
}

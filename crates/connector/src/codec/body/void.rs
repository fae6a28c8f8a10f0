use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem, SendError};

/// A message without a body.
///
/// As a decoder it reports the end of the body without consuming anything;
/// as an encoder it swallows whatever the application writes (HEAD, 204, 304).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Void;

impl Decoder for Void {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, _src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(PayloadItem::Eof))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode(src)
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for Void {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, _dst: &mut BytesMut) -> Result<(), Self::Error> {
        if let PayloadItem::Chunk(bytes) = item {
            trace!(dropped = bytes.remaining(), "discard body bytes of a bodiless response");
        }
        Ok(())
    }
}

//! Input and output filter chains.
//!
//! The filter library is a pair of role enums, [`InputFilterKind`] and
//! [`OutputFilterKind`], from which concrete [`InputFilter`] and
//! [`OutputFilter`] stages are built. Negotiation addresses a filter by its
//! role (or by transfer-coding name for `Transfer-Encoding`), never by a
//! position in some table.
//!
//! A chain keeps its active stages bottom first: the first input stage reads
//! raw bytes from the connection and each later stage decodes what the stage
//! below produced. Output runs the other way: the top stage encodes first and
//! the bottom stage, always the delimiter, writes into the staging buffer.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::codec::body::{
    BufferedDecoder, ChunkedDecoder, ChunkedEncoder, GzipEncoder, LengthDecoder, LengthEncoder, SavedDecoder, Void,
};
use crate::protocol::{ParseError, PayloadItem, SendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFilterKind {
    Identity,
    Chunked,
    Void,
    Saved,
    Buffered,
}

impl InputFilterKind {
    pub const fn encoding_name(self) -> &'static str {
        match self {
            InputFilterKind::Identity => "identity",
            InputFilterKind::Chunked => "chunked",
            InputFilterKind::Void => "void",
            InputFilterKind::Saved => "saved",
            InputFilterKind::Buffered => "buffered",
        }
    }

    /// Looks up a transfer coding named in a `Transfer-Encoding` header.
    ///
    /// Only codings that delimit a body on their own are accepted here.
    pub fn from_transfer_coding(name: &str) -> Option<Self> {
        name.eq_ignore_ascii_case(InputFilterKind::Chunked.encoding_name()).then_some(InputFilterKind::Chunked)
    }

    /// Whether the filter decides where the body ends on the wire.
    pub const fn is_delimiter(self) -> bool {
        matches!(self, InputFilterKind::Identity | InputFilterKind::Chunked | InputFilterKind::Void)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFilterKind {
    Identity,
    Chunked,
    Void,
    Gzip,
}

impl OutputFilterKind {
    pub const fn encoding_name(self) -> &'static str {
        match self {
            OutputFilterKind::Identity => "identity",
            OutputFilterKind::Chunked => "chunked",
            OutputFilterKind::Void => "void",
            OutputFilterKind::Gzip => "gzip",
        }
    }
}

#[derive(Debug)]
pub enum InputFilter {
    Identity(LengthDecoder),
    Chunked(ChunkedDecoder),
    Void(Void),
    Saved(SavedDecoder),
    Buffered(BufferedDecoder),
}

impl InputFilter {
    pub fn identity(length: u64) -> Self {
        InputFilter::Identity(LengthDecoder::new(length))
    }

    pub fn chunked() -> Self {
        InputFilter::Chunked(ChunkedDecoder::new())
    }

    pub fn void() -> Self {
        InputFilter::Void(Void)
    }

    pub fn saved(body: Bytes) -> Self {
        InputFilter::Saved(SavedDecoder::new(body))
    }

    pub fn buffered(limit: usize) -> Self {
        InputFilter::Buffered(BufferedDecoder::new(limit))
    }

    pub fn kind(&self) -> InputFilterKind {
        match self {
            InputFilter::Identity(_) => InputFilterKind::Identity,
            InputFilter::Chunked(_) => InputFilterKind::Chunked,
            InputFilter::Void(_) => InputFilterKind::Void,
            InputFilter::Saved(_) => InputFilterKind::Saved,
            InputFilter::Buffered(_) => InputFilterKind::Buffered,
        }
    }
}

impl Decoder for InputFilter {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            InputFilter::Identity(decoder) => decoder.decode(src),
            InputFilter::Chunked(decoder) => decoder.decode(src),
            InputFilter::Void(decoder) => decoder.decode(src),
            InputFilter::Saved(decoder) => decoder.decode(src),
            InputFilter::Buffered(decoder) => decoder.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            InputFilter::Identity(decoder) => decoder.decode_eof(src),
            InputFilter::Chunked(decoder) => decoder.decode_eof(src),
            InputFilter::Void(decoder) => decoder.decode_eof(src),
            InputFilter::Saved(decoder) => decoder.decode_eof(src),
            InputFilter::Buffered(decoder) => decoder.decode_eof(src),
        }
    }
}

#[derive(Debug)]
struct InputStage {
    filter: InputFilter,
    /// Output of the stage below, not yet decoded by this one.
    pending: BytesMut,
    below_finished: bool,
}

/// The active input filters of the current request.
#[derive(Debug, Default)]
pub struct InputFilterChain {
    stages: Vec<InputStage>,
}

impl InputFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stacks `filter` on top of the chain.
    ///
    /// A role that is already active is not added twice. The one exception is
    /// a saved body: a newer one replaces the body still waiting to be replayed.
    pub fn add_active(&mut self, filter: InputFilter) {
        let kind = filter.kind();
        if let Some(stage) = self.stages.iter_mut().find(|stage| stage.filter.kind() == kind) {
            if kind == InputFilterKind::Saved {
                debug!("replace saved request body");
                *stage = InputStage { filter, pending: BytesMut::new(), below_finished: false };
            } else {
                debug!(filter = kind.encoding_name(), "input filter already active");
            }
            return;
        }
        trace!(filter = kind.encoding_name(), position = self.stages.len(), "activate input filter");
        self.stages.push(InputStage { filter, pending: BytesMut::new(), below_finished: false });
    }

    pub fn contains(&self, kind: InputFilterKind) -> bool {
        self.stages.iter().any(|stage| stage.filter.kind() == kind)
    }

    pub fn has_delimiter(&self) -> bool {
        self.stages.iter().any(|stage| stage.filter.kind().is_delimiter())
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = InputFilterKind> + '_ {
        self.stages.iter().map(|stage| stage.filter.kind())
    }

    /// Pulls the next decoded item through every stage.
    ///
    /// `raw` holds bytes from the connection; the first stage consumes from
    /// it. `Ok(None)` means the chain needs more raw bytes. With `raw_eof` set
    /// the peer closed the connection and stages must finish or fail.
    pub fn pull(&mut self, raw: &mut BytesMut, raw_eof: bool) -> Result<Option<PayloadItem>, ParseError> {
        if self.stages.is_empty() {
            return Ok(Some(PayloadItem::Eof));
        }
        pull_stage(&mut self.stages, raw, raw_eof)
    }

    pub fn recycle(&mut self) {
        self.stages.clear();
    }
}

fn pull_stage(stages: &mut [InputStage], raw: &mut BytesMut, raw_eof: bool) -> Result<Option<PayloadItem>, ParseError> {
    let Some((top, below)) = stages.split_last_mut() else {
        return Ok(Some(PayloadItem::Eof));
    };

    if below.is_empty() {
        return if raw_eof {
            Ok(Some(top.filter.decode_eof(raw)?.unwrap_or(PayloadItem::Eof)))
        } else {
            top.filter.decode(raw)
        };
    }

    loop {
        if top.below_finished {
            return Ok(Some(top.filter.decode_eof(&mut top.pending)?.unwrap_or(PayloadItem::Eof)));
        }
        if let Some(item) = top.filter.decode(&mut top.pending)? {
            return Ok(Some(item));
        }
        match pull_stage(below, raw, raw_eof)? {
            None => return Ok(None),
            Some(PayloadItem::Chunk(bytes)) => top.pending.extend_from_slice(&bytes),
            Some(PayloadItem::Eof) => top.below_finished = true,
        }
    }
}

#[derive(Debug)]
pub enum OutputFilter {
    Identity(LengthEncoder),
    Chunked(ChunkedEncoder),
    Void(Void),
    Gzip(GzipEncoder),
}

impl OutputFilter {
    pub fn identity(length: u64) -> Self {
        OutputFilter::Identity(LengthEncoder::new(length))
    }

    pub fn close_delimited() -> Self {
        OutputFilter::Identity(LengthEncoder::close_delimited())
    }

    pub fn chunked() -> Self {
        OutputFilter::Chunked(ChunkedEncoder::new())
    }

    pub fn void() -> Self {
        OutputFilter::Void(Void)
    }

    pub fn gzip() -> Self {
        OutputFilter::Gzip(GzipEncoder::new())
    }

    pub fn kind(&self) -> OutputFilterKind {
        match self {
            OutputFilter::Identity(_) => OutputFilterKind::Identity,
            OutputFilter::Chunked(_) => OutputFilterKind::Chunked,
            OutputFilter::Void(_) => OutputFilterKind::Void,
            OutputFilter::Gzip(_) => OutputFilterKind::Gzip,
        }
    }

    fn flush(&mut self, dst: &mut BytesMut) -> Result<(), SendError> {
        match self {
            OutputFilter::Gzip(encoder) => encoder.flush(dst),
            _ => Ok(()),
        }
    }
}

impl Encoder<PayloadItem> for OutputFilter {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            OutputFilter::Identity(encoder) => encoder.encode(item, dst),
            OutputFilter::Chunked(encoder) => encoder.encode(item, dst),
            OutputFilter::Void(encoder) => encoder.encode(item, dst),
            OutputFilter::Gzip(encoder) => encoder.encode(item, dst),
        }
    }
}

/// The active output filters of the current response, delimiter first.
#[derive(Debug, Default)]
pub struct OutputFilterChain {
    stages: Vec<OutputFilter>,
}

impl OutputFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_active(&mut self, filter: OutputFilter) {
        let kind = filter.kind();
        if self.stages.iter().any(|stage| stage.kind() == kind) {
            debug!(filter = kind.encoding_name(), "output filter already active");
            return;
        }
        trace!(filter = kind.encoding_name(), position = self.stages.len(), "activate output filter");
        self.stages.push(filter);
    }

    pub fn contains(&self, kind: OutputFilterKind) -> bool {
        self.stages.iter().any(|stage| stage.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Encodes `item` through every stage, top first, into `dst`.
    pub fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), SendError> {
        let Some((bottom, upper)) = self.stages.split_first_mut() else {
            if let PayloadItem::Chunk(bytes) = item {
                dst.extend_from_slice(&bytes);
            }
            return Ok(());
        };

        let mut items = vec![item];
        for stage in upper.iter_mut().rev() {
            let mut next = Vec::with_capacity(items.len() + 1);
            for item in items {
                let eof = item.is_eof();
                let mut scratch = BytesMut::new();
                stage.encode(item, &mut scratch)?;
                if !scratch.is_empty() {
                    next.push(PayloadItem::Chunk(scratch.freeze()));
                }
                if eof {
                    next.push(PayloadItem::Eof);
                }
            }
            items = next;
        }

        for item in items {
            bottom.encode(item, dst)?;
        }
        Ok(())
    }

    /// Forces stages that hold data back (compression) to release it.
    pub fn flush(&mut self, dst: &mut BytesMut) -> Result<(), SendError> {
        let Some((bottom, upper)) = self.stages.split_first_mut() else {
            return Ok(());
        };

        let mut carried = BytesMut::new();
        for stage in upper.iter_mut().rev() {
            let mut scratch = BytesMut::new();
            if !carried.is_empty() {
                stage.encode(PayloadItem::Chunk(carried.split().freeze()), &mut scratch)?;
            }
            stage.flush(&mut scratch)?;
            carried = scratch;
        }

        if !carried.is_empty() {
            bottom.encode(PayloadItem::Chunk(carried.freeze()), dst)?;
        }
        Ok(())
    }

    pub fn recycle(&mut self) {
        self.stages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn drain(chain: &mut InputFilterChain, raw: &mut BytesMut) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            match chain.pull(raw, false).unwrap().unwrap() {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => return body,
            }
        }
    }

    #[test]
    fn test_library_lookup() {
        assert_eq!(InputFilterKind::from_transfer_coding("Chunked"), Some(InputFilterKind::Chunked));
        assert_eq!(InputFilterKind::from_transfer_coding("gzip"), None);
        assert!(InputFilterKind::Void.is_delimiter());
        assert!(!InputFilterKind::Saved.is_delimiter());
        assert_eq!(OutputFilterKind::Gzip.encoding_name(), "gzip");
    }

    #[test]
    fn test_identity_stops_at_length() {
        let mut chain = InputFilterChain::new();
        chain.add_active(InputFilter::identity(4));
        let mut raw = BytesMut::from(&b"testGET / HTTP/1.1\r\n"[..]);

        assert_eq!(drain(&mut chain, &mut raw), b"test");
        assert_eq!(&raw[..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn test_duplicate_role_is_ignored() {
        let mut chain = InputFilterChain::new();
        chain.add_active(InputFilter::chunked());
        chain.add_active(InputFilter::chunked());
        assert_eq!(chain.kinds().count(), 1);
        assert!(chain.has_delimiter());

        chain.recycle();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_buffered_above_chunked() {
        let mut chain = InputFilterChain::new();
        chain.add_active(InputFilter::chunked());
        chain.add_active(InputFilter::buffered(64));

        let mut raw = BytesMut::from(&b"3\r\nabc"[..]);
        assert!(chain.pull(&mut raw, false).unwrap().is_none());

        raw.extend_from_slice(b"\r\n2\r\nde\r\n0\r\n\r\n");
        let item = chain.pull(&mut raw, false).unwrap().unwrap();
        assert_eq!(item.into_bytes().unwrap(), Bytes::from_static(b"abcde"));
        assert!(chain.pull(&mut raw, false).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_saved_replay_does_not_touch_raw() {
        let mut chain = InputFilterChain::new();
        chain.add_active(InputFilter::identity(3));
        chain.add_active(InputFilter::saved(Bytes::from_static(b"a=1")));

        let mut raw = BytesMut::from(&b"next request"[..]);
        assert_eq!(drain(&mut chain, &mut raw), b"a=1");
        assert_eq!(&raw[..], b"next request");
    }

    #[test]
    fn test_second_saved_body_replaces_first() {
        let mut chain = InputFilterChain::new();
        chain.add_active(InputFilter::identity(3));
        chain.add_active(InputFilter::saved(Bytes::from_static(b"a=1")));
        chain.add_active(InputFilter::saved(Bytes::from_static(b"b=2")));
        assert_eq!(chain.kinds().collect::<Vec<_>>(), vec![InputFilterKind::Identity, InputFilterKind::Saved]);

        let mut raw = BytesMut::new();
        assert_eq!(drain(&mut chain, &mut raw), b"b=2");
    }

    #[test]
    fn test_raw_eof_inside_body() {
        let mut chain = InputFilterChain::new();
        chain.add_active(InputFilter::identity(10));
        let mut raw = BytesMut::from(&b"abc"[..]);

        assert!(chain.pull(&mut raw, false).unwrap().unwrap().is_chunk());
        assert!(chain.pull(&mut raw, false).unwrap().is_none());
        assert!(matches!(chain.pull(&mut raw, true), Err(ParseError::UnexpectedEof)));
    }

    #[test]
    fn test_gzip_over_chunked() {
        let mut chain = OutputFilterChain::new();
        chain.add_active(OutputFilter::chunked());
        chain.add_active(OutputFilter::gzip());

        let mut wire = BytesMut::new();
        chain.encode(PayloadItem::Chunk(Bytes::from_static(b"compressed body")), &mut wire).unwrap();
        chain.encode(PayloadItem::Eof, &mut wire).unwrap();
        assert!(wire.ends_with(b"0\r\n\r\n"));

        let mut decoder = ChunkedDecoder::new();
        let mut gz = Vec::new();
        while let PayloadItem::Chunk(bytes) = decoder.decode(&mut wire).unwrap().unwrap() {
            gz.extend_from_slice(&bytes);
        }

        let mut body = String::new();
        GzDecoder::new(&gz[..]).read_to_string(&mut body).unwrap();
        assert_eq!(body, "compressed body");
    }
}

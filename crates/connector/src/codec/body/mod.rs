//! Body codecs, one per filter in the filter library.
//!
//! ## Decoders
//! - [`LengthDecoder`]: Content-Length delimited bodies
//! - [`ChunkedDecoder`]: chunked transfer coding
//! - [`Void`]: no body at all
//! - [`SavedDecoder`]: replays a body read earlier
//! - [`BufferedDecoder`]: holds the whole body in memory up to a limit
//!
//! ## Encoders
//! - [`LengthEncoder`]: identity output, bounded by the declared length or close-delimited
//! - [`ChunkedEncoder`]: chunked transfer coding
//! - [`Void`]: drops the body
//! - [`GzipEncoder`]: gzip content coding stacked above a delimiter

mod chunked_decoder;
mod chunked_encoder;
mod gzip_encoder;
mod length_decoder;
mod length_encoder;
mod replay_decoder;
mod void;

pub use chunked_decoder::ChunkedDecoder;
pub use chunked_encoder::ChunkedEncoder;
pub use gzip_encoder::GzipEncoder;
pub use length_decoder::LengthDecoder;
pub use length_encoder::LengthEncoder;
pub use replay_decoder::{BufferedDecoder, SavedDecoder};
pub use void::Void;

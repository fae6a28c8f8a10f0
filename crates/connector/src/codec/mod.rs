//! Byte-level codecs of the message engine.
//!
//! Everything here is sans-IO: the connection layer owns the sockets and the
//! async waiting, the codecs only look at bytes.
//!
//! - [`ByteWindow`]: the fixed-capacity input window with its cursors
//! - [`parse_request_line`] and [`parse_header`]: request-line and header-field parsers
//! - [`InputFilterChain`] and [`OutputFilterChain`]: the body decode and encode stages
//! - [`HeaderEncoder`]: status line and header block serialization
//!
//! # Example
//!
//! ```
//! use micro_connector::codec::{parse_header, parse_request_line, HeaderLine};
//!
//! let buf = b"GET /a?x=1 HTTP/1.1\r\nHost: h\r\n\r\n";
//! let (line, mut consumed) = parse_request_line(buf).unwrap().unwrap();
//! assert_eq!(line.path, b"/a");
//!
//! let (field, n) = parse_header(&buf[consumed..]).unwrap().unwrap();
//! consumed += n;
//! assert!(matches!(field, HeaderLine::Field { .. }));
//! assert_eq!(parse_header(&buf[consumed..]).unwrap().unwrap().0, HeaderLine::End);
//! ```

pub mod body;
mod filter;
mod header_encoder;
mod header_parser;
mod request_line;
mod window;

pub use filter::{InputFilter, InputFilterChain, InputFilterKind, OutputFilter, OutputFilterChain, OutputFilterKind};
pub use header_encoder::HeaderEncoder;
pub use header_parser::{HeaderLine, parse_header};
pub use request_line::{RequestLine, parse_request_line};
pub use window::ByteWindow;

//! Core HTTP protocol types shared by the codecs and the connection layer.
//!
//! # Architecture
//!
//! - **Message Handling** ([`PayloadItem`], [`PayloadSize`]): body chunks, end
//!   of body, and how a response body is delimited
//! - **Request** ([`Request`], [`MimeHeaders`], [`Parameters`]): the parsed
//!   request, recycled between pipelined requests
//! - **Response** ([`Response`]): status, headers and the committed flag
//! - **Error Handling**:
//!   - [`HttpError`]: Top-level error type
//!   - [`ParseError`]: Request parsing errors
//!   - [`SendError`]: Response sending errors
//!   - [`PrepareError`]: Request validation errors, each with its status code

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod headers;
pub use headers::HeaderField;
pub use headers::MimeHeaders;

mod parameters;
pub use parameters::Parameters;

mod request;
pub use request::Request;

mod response;
pub use response::status_drops_connection;
pub use response::Response;

mod error;
pub use error::BoxError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::PrepareError;
pub use error::SendError;

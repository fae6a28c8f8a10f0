//! The seam between the connector and the application.
//!
//! After a request has been parsed and prepared, the processor hands an
//! [`Exchange`] to the adapter. The adapter reads the body, sets status and
//! headers on the response and writes the response body; everything that
//! touches the wire (framing, acknowledgements, keep-alive) stays with the
//! connector.
//!
//! # Example
//!
//! ```
//! use http::StatusCode;
//! use micro_connector::adapter::Adapter;
//! use micro_connector::connection::Exchange;
//! use micro_connector::protocol::BoxError;
//!
//! struct NotFound;
//!
//! impl Adapter for NotFound {
//!     async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
//!         exchange.response_mut().set_status(StatusCode::NOT_FOUND);
//!         exchange.response_mut().set_content_length(0);
//!         Ok(())
//!     }
//! }
//! ```

use crate::connection::Exchange;
use crate::protocol::BoxError;

/// Services one request per call.
///
/// An error leaves the response to the processor: an uncommitted response
/// is replaced by a `500`, a committed one tears the connection down.
#[trait_variant::make(Adapter: Send)]
pub trait LocalAdapter {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError>;
}

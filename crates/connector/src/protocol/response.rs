//! The per-connection response object.
//!
//! The adapter sets status and headers on a [`Response`]; once the response
//! commits, the status line and header block are on their way to the client
//! and `committed` never goes back to false until the response is recycled.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    content_length: i64,
    committed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), content_length: -1, committed: false }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// The body length the adapter declared, or -1 when unknown.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn set_content_length(&mut self, content_length: u64) {
        self.content_length = i64::try_from(content_length).unwrap_or(i64::MAX);
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub(crate) fn set_committed(&mut self) {
        self.committed = true;
    }

    /// Clears status, headers and body length so an error response can be
    /// written in place of whatever the adapter had prepared.
    pub(crate) fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.content_length = -1;
    }

    pub fn recycle(&mut self) {
        self.reset();
        self.committed = false;
    }
}

/// Whether a response status requires the connection to close afterwards.
pub fn status_drops_connection(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::LENGTH_REQUIRED
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::URI_TOO_LONG
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::NOT_IMPLEMENTED
            | StatusCode::SERVICE_UNAVAILABLE
    )
}

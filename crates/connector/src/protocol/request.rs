//! The per-connection request object.
//!
//! A [`Request`] is filled in by the request-line and header parsers, then
//! completed during the prepare phase (version, content length, server name).
//! It is created once per processor and recycled between requests rather
//! than reallocated.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use http::{Method, Version};

use crate::protocol::{MimeHeaders, Parameters};
use crate::utils::percent_decode;

#[derive(Debug)]
pub struct Request {
    method: Method,
    unparsed_uri: Bytes,
    uri: Bytes,
    query: Option<Bytes>,
    protocol: Bytes,
    version: Version,
    headers: MimeHeaders,
    content_length: i64,
    character_encoding: Option<String>,
    scheme: &'static str,
    server_name: Option<String>,
    server_port: u16,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    parameters: Parameters,
    available: usize,
    start_time: Option<Instant>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            unparsed_uri: Bytes::new(),
            uri: Bytes::new(),
            query: None,
            protocol: Bytes::new(),
            version: Version::HTTP_11,
            headers: MimeHeaders::new(),
            content_length: -1,
            character_encoding: None,
            scheme: "http",
            server_name: None,
            server_port: 0,
            remote_addr: None,
            local_addr: None,
            parameters: Parameters::default(),
            available: 0,
            start_time: None,
        }
    }
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as received, query string included.
    pub fn unparsed_uri(&self) -> &Bytes {
        &self.unparsed_uri
    }

    /// The path part of the request target.
    pub fn uri(&self) -> &Bytes {
        &self.uri
    }

    /// The path with `%XX` escapes decoded.
    pub fn decoded_uri(&self) -> Cow<'_, str> {
        if self.uri.contains(&b'%') {
            Cow::Owned(String::from_utf8_lossy(&percent_decode(&self.uri)).into_owned())
        } else {
            String::from_utf8_lossy(&self.uri)
        }
    }

    pub fn query(&self) -> Option<&Bytes> {
        self.query.as_ref()
    }

    /// The raw protocol token; empty for an HTTP/0.9 request.
    pub fn protocol(&self) -> &Bytes {
        &self.protocol
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &MimeHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut MimeHeaders {
        &mut self.headers
    }

    /// The declared body length, or -1 when it is not known up front.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn character_encoding(&self) -> Option<&str> {
        self.character_encoding.as_deref()
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Parameters parsed so far; see [`Exchange::parameters`](crate::connection::Exchange::parameters).
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Body bytes readable without waiting, as of the last
    /// [`Action::Available`](crate::connection::Action::Available).
    pub fn available(&self) -> usize {
        self.available
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    /// Determines if this request requires a body based on its HTTP method.
    pub fn need_body(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::CONNECT)
    }

    pub(crate) fn set_request_line(&mut self, method: Method, unparsed_uri: Bytes, uri: Bytes, query: Option<Bytes>, protocol: Bytes) {
        self.method = method;
        self.unparsed_uri = unparsed_uri;
        self.uri = uri;
        self.query = query;
        self.protocol = protocol;
        self.start_time = Some(Instant::now());
    }

    pub(crate) fn set_uri(&mut self, uri: Bytes) {
        self.uri = uri;
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn set_content_length(&mut self, content_length: i64) {
        self.content_length = content_length;
    }

    pub(crate) fn set_character_encoding(&mut self, encoding: Option<String>) {
        self.character_encoding = encoding;
    }

    pub(crate) fn set_scheme(&mut self, scheme: &'static str) {
        self.scheme = scheme;
    }

    pub(crate) fn set_server(&mut self, name: Option<String>, port: u16) {
        self.server_name = name;
        self.server_port = port;
    }

    pub(crate) fn set_addrs(&mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) {
        self.remote_addr = remote;
        self.local_addr = local;
    }

    pub(crate) fn set_available(&mut self, available: usize) {
        self.available = available;
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    /// Resets the per-message fields for the next pipelined request.
    ///
    /// Connection-scoped data (addresses, scheme) survives; use
    /// [`Request::recycle_connection`] when the connection itself ends.
    pub fn recycle(&mut self) {
        self.method = Method::GET;
        self.unparsed_uri = Bytes::new();
        self.uri = Bytes::new();
        self.query = None;
        self.protocol = Bytes::new();
        self.version = Version::HTTP_11;
        self.headers.recycle();
        self.content_length = -1;
        self.character_encoding = None;
        self.server_name = None;
        self.server_port = 0;
        self.parameters.recycle();
        self.available = 0;
        self.start_time = None;
    }

    pub fn recycle_connection(&mut self) {
        self.recycle();
        self.scheme = "http";
        self.remote_addr = None;
        self.local_addr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recycle_resets_message_fields() {
        let mut request = Request::new();
        request.set_request_line(
            Method::POST,
            Bytes::from_static(b"/a%20b?x=1"),
            Bytes::from_static(b"/a%20b"),
            Some(Bytes::from_static(b"x=1")),
            Bytes::from_static(b"HTTP/1.1"),
        );
        request.headers_mut().add_value("host", "h");
        request.set_content_length(4);

        assert_eq!(request.decoded_uri(), "/a b");
        assert!(request.need_body());

        request.recycle();
        assert_eq!(request.method(), Method::GET);
        assert!(request.headers().is_empty());
        assert_eq!(request.content_length(), -1);
        assert!(request.query().is_none());
    }
}

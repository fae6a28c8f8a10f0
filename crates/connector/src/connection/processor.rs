//! The HTTP/1.1 processor.
//!
//! One [`Http11Processor`] serves one connection at a time and walks each
//! request through the same states:
//!
//! ```text
//! PARSE_LINE -> PARSE_HEADERS -> PREPARE -> SERVICE -> LOOP | END
//! ```
//!
//! - **Parse**: the request line and header block are parsed out of the input
//!   window. The first request on a connection waits for its line; a later
//!   one only proceeds if bytes of it are already there.
//! - **Prepare**: the protocol, `Connection`, `Expect`, `Transfer-Encoding`,
//!   `Content-Length` and `Host` headers are validated and the input filters
//!   are chosen.
//! - **Service**: the adapter gets an [`Exchange`].
//! - **Loop / End**: the body is drained, the response finished, and the
//!   processor either resets for the next pipelined request or closes.
//!
//! Failures never escape [`Http11Processor::process`]: they are recorded in
//! the processor flags, turned into an error response when nothing was
//! committed yet, and end the keep-alive loop.

use std::net::SocketAddr;
use std::task::Poll;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue, SERVER, TRANSFER_ENCODING, VARY};
use futures::future::poll_fn;
use http::{Method, StatusCode, Version};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, trace, warn};
use triomphe::Arc;

use crate::adapter::Adapter;
use crate::codec::{InputFilter, InputFilterKind, OutputFilter};
use crate::config::ConnectorConfig;
use crate::connection::exchange::Exchange;
use crate::connection::input_buffer::{InputBuffer, LineStatus, ParseMode};
use crate::connection::output_buffer::{OutputBuffer, WritePump};
use crate::connection::transport::{SharedTransport, Transport};
use crate::protocol::{
    HttpError, MimeHeaders, ParseError, PayloadSize, PrepareError, Request, Response, SendError,
    status_drops_connection,
};
use crate::utils::ensure;

/// What the caller should do with the socket after [`Http11Processor::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Keep the connection and call `process` again once bytes arrive.
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ProcessorFlags {
    pub(crate) keep_alive: bool,
    pub(crate) http11: bool,
    pub(crate) http09: bool,
    /// A `100 Continue` is owed to the client.
    pub(crate) expectation: bool,
    /// The request body has a delimiting input filter.
    pub(crate) content_delimitation: bool,
    pub(crate) error: bool,
    /// Nothing more may be written to the connection.
    pub(crate) abort: bool,
    pub(crate) error_status: Option<StatusCode>,
}

impl ProcessorFlags {
    pub(crate) fn record(&mut self, e: &HttpError) {
        self.error = true;
        self.keep_alive = false;
        if e.is_io() {
            self.abort = true;
        }
        if self.error_status.is_none() {
            self.error_status = Some(e.status_code());
        }
    }
}

#[derive(Debug)]
pub struct Http11Processor {
    config: Arc<ConnectorConfig>,
    request: Request,
    response: Response,
    input: InputBuffer,
    output: OutputBuffer,
    flags: ProcessorFlags,
    keep_alive_left: Option<usize>,
    served: usize,
}

impl Http11Processor {
    pub fn new(config: Arc<ConnectorConfig>) -> Self {
        let input = InputBuffer::new(config.header_buffer_size(), config.read_timeout());
        let output = OutputBuffer::new(config.output_buffer_size(), config.header_buffer_size(), config.write_timeout());
        Self {
            keep_alive_left: config.max_keep_alive_requests(),
            config,
            request: Request::new(),
            response: Response::new(),
            input,
            output,
            flags: ProcessorFlags::default(),
            served: 0,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Requests started on the current connection.
    pub fn served(&self) -> usize {
        self.served
    }

    /// Attaches the processor to a new connection.
    pub fn bind(&mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) {
        self.request.set_addrs(remote, local);
        self.request.set_scheme(if self.config.secure() { "https" } else { "http" });
        self.keep_alive_left = self.config.max_keep_alive_requests();
        self.served = 0;
    }

    /// Serves `stream` until the connection closes, then recycles the processor.
    ///
    /// Between requests the connection may idle for the keep-alive timeout.
    pub async fn run<S, A>(&mut self, stream: &mut S, adapter: &A)
    where
        S: Transport,
        A: Adapter,
    {
        self.bind(stream.peer_addr(), stream.local_addr());
        debug!(remote = ?self.request.remote_addr(), "start processing connection");

        loop {
            if self.process(stream, adapter).await == SocketState::Closed {
                break;
            }
            match self.input.await_data(stream, self.config.keep_alive_timeout()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("peer closed the idle connection");
                    break;
                }
                Err(e) => {
                    debug!(cause = %e, "idle connection ended");
                    break;
                }
            }
        }

        if let Err(e) = stream.shutdown().await {
            trace!(cause = %e, "failed to shut the connection down");
        }
        debug!(served = self.served, "finished process, connection shutdown");
        self.recycle();
    }

    /// Runs one request through the state machine.
    pub async fn process<S, A>(&mut self, stream: &mut S, adapter: &A) -> SocketState
    where
        S: Transport,
        A: Adapter,
    {
        let mode = if self.served == 0 { ParseMode::Block } else { ParseMode::TryAvailable };
        match self.read_request(stream, mode).await {
            Ok(LineStatus::Parsed) => {}
            Ok(LineStatus::NoData) => return SocketState::Open,
            Ok(LineStatus::Eof) => {
                debug!("peer closed the connection");
                return SocketState::Closed;
            }
            Err(e) => {
                if e.is_io() {
                    debug!(cause = %e, "failed to read request");
                } else {
                    warn!(cause = %e, "failed to parse request");
                }
                self.flags.record(&e.into());
            }
        }
        self.served += 1;

        if !self.flags.error
            && let Err(e) = self.prepare_request()
        {
            warn!(cause = %e, status = e.status_code().as_u16(), "rejecting request");
            self.flags.record(&e.into());
        }

        if !self.flags.error {
            self.consume_keep_alive_budget();
            self.service(stream, adapter).await;
        }

        self.end_request(stream).await;

        if self.flags.keep_alive && !self.flags.error {
            trace!(served = self.served, "keep connection alive");
            self.next_request();
            SocketState::Open
        } else {
            SocketState::Closed
        }
    }

    async fn read_request<S: Transport>(&mut self, stream: &mut S, mode: ParseMode) -> Result<LineStatus, ParseError> {
        let status = self.input.parse_request_line(stream, mode, &mut self.request).await?;
        if status == LineStatus::Parsed {
            if self.request.protocol().is_empty() {
                self.input.skip_headers();
            } else {
                self.input.parse_headers(stream, &mut self.request).await?;
            }
        }
        Ok(status)
    }

    fn prepare_request(&mut self) -> Result<(), PrepareError> {
        let protocol = self.request.protocol().clone();
        self.flags.keep_alive = true;
        match &protocol[..] {
            b"HTTP/1.1" => {
                self.flags.http11 = true;
                self.request.set_version(Version::HTTP_11);
            }
            b"HTTP/1.0" => {
                self.flags.keep_alive = false;
                self.request.set_version(Version::HTTP_10);
            }
            b"" => {
                self.flags.http09 = true;
                self.flags.keep_alive = false;
                self.request.set_version(Version::HTTP_09);
            }
            other => {
                self.flags.keep_alive = false;
                return Err(PrepareError::unsupported_version(String::from_utf8_lossy(other)));
            }
        }
        self.output.set_http09(self.flags.http09);

        let headers = self.request.headers();
        if headers.get_all("connection").any(|value| has_token(value, b"close")) {
            self.flags.keep_alive = false;
        } else if !self.flags.http11
            && !self.flags.http09
            && headers.get_all("connection").any(|value| has_token(value, b"keep-alive"))
        {
            self.flags.keep_alive = true;
        }

        if self.flags.http11
            && headers.get("expect").is_some_and(|value| value.trim_ascii().eq_ignore_ascii_case(b"100-continue"))
        {
            self.flags.expectation = true;
            self.input.set_swallow_input(false);
        }

        if (self.flags.http11 || self.flags.keep_alive)
            && let Some(agent) = headers.get_str("user-agent")
            && self.config.is_restricted_user_agent(agent)
        {
            debug!(agent, "restricted user agent, downgrade to HTTP/1.0");
            self.flags.http11 = false;
            self.flags.keep_alive = false;
            self.request.set_version(Version::HTTP_10);
        }

        self.rewrite_absolute_uri();
        self.select_input_filters()?;

        let host = self.request.headers().get("host").cloned();
        ensure!(!self.flags.http11 || host.is_some(), PrepareError::MissingHost);
        self.bind_server_name(host.as_deref())?;

        let charset = self
            .request
            .headers()
            .get_str("content-type")
            .and_then(|value| value.parse::<mime::Mime>().ok())
            .and_then(|mime| mime.get_param(mime::CHARSET).map(|charset| charset.as_str().to_owned()));
        self.request.set_character_encoding(charset);

        trace!(
            method = %self.request.method(),
            uri = %self.request.decoded_uri(),
            keep_alive = self.flags.keep_alive,
            filters = ?self.input.filters().kinds().collect::<Vec<_>>(),
            "prepared request"
        );
        Ok(())
    }

    /// Turns `scheme://authority/path` into `/path`, moving the authority
    /// into the `Host` header.
    fn rewrite_absolute_uri(&mut self) {
        let uri = self.request.uri().clone();
        let Some(prefix) = [&b"http://"[..], b"https://"]
            .into_iter()
            .find(|prefix| uri.len() >= prefix.len() && uri[..prefix.len()].eq_ignore_ascii_case(prefix))
        else {
            return;
        };

        let start = prefix.len();
        let end = uri[start..].iter().position(|b| *b == b'/').map_or(uri.len(), |p| start + p);
        let mut authority = uri.slice(start..end);
        if let Some(at) = authority.iter().rposition(|b| *b == b'@') {
            authority = authority.slice(at + 1..);
        }
        let path = if end == uri.len() { Bytes::from_static(b"/") } else { uri.slice(end..) };

        trace!(authority = ?authority, path = ?path, "rewrite absolute request target");
        self.request.set_uri(path);
        if !authority.is_empty() {
            self.request.headers_mut().set_value("host", authority);
        }
    }

    fn select_input_filters(&mut self) -> Result<(), PrepareError> {
        let mut chunked = false;
        if self.flags.http11 {
            for value in self.request.headers().get_all("transfer-encoding") {
                for coding in value.split(|b| *b == b',').map(<[u8]>::trim_ascii).filter(|c| !c.is_empty()) {
                    if coding.eq_ignore_ascii_case(b"identity") {
                        continue;
                    }
                    let name = String::from_utf8_lossy(coding);
                    match InputFilterKind::from_transfer_coding(&name) {
                        Some(InputFilterKind::Chunked) => chunked = true,
                        _ => return Err(PrepareError::unsupported_transfer_coding(name)),
                    }
                }
            }
        }

        if chunked {
            // a length next to the chunked coding is ignored
            self.request.headers_mut().remove(b"content-length");
            self.input.add_filter(InputFilter::chunked());
            self.flags.content_delimitation = true;
        } else if let Some(length) = content_length(self.request.headers())? {
            self.request.set_content_length(i64::try_from(length).map_err(PrepareError::invalid_content_length)?);
            self.input.add_filter(InputFilter::identity(length));
            self.flags.content_delimitation = true;
        }

        if !self.flags.content_delimitation {
            self.input.add_filter(InputFilter::void());
        }
        Ok(())
    }

    fn bind_server_name(&mut self, host: Option<&[u8]>) -> Result<(), PrepareError> {
        match host {
            Some(host) => {
                let (name, port) = parse_host(host)?;
                let default_port = if self.config.secure() { 443 } else { 80 };
                self.request.set_server(Some(name), port.unwrap_or(default_port));
            }
            None => {
                let local = self.request.local_addr();
                let port = local.map_or(self.config.port(), |addr| addr.port());
                self.request.set_server(local.map(|addr| addr.ip().to_string()), port);
            }
        }
        Ok(())
    }

    fn consume_keep_alive_budget(&mut self) {
        if let Some(left) = self.keep_alive_left.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 && self.flags.keep_alive {
                debug!(served = self.served, "keep-alive budget exhausted");
                self.flags.keep_alive = false;
            }
        }
    }

    async fn service<S, A>(&mut self, stream: &mut S, adapter: &A)
    where
        S: Transport,
        A: Adapter,
    {
        let pump = self.output.pump().clone();
        let result = {
            let io = SharedTransport::new(stream);
            let mut exchange = Exchange::new(
                &mut self.request,
                &mut self.response,
                &mut self.input,
                &mut self.output,
                &io,
                &mut self.flags,
                &self.config,
            );
            serve_with_pump(adapter.service(&mut exchange), &pump, &io).await
        };

        let Err(e) = result else {
            return;
        };
        let e = match e.downcast::<HttpError>() {
            Ok(e) => *e,
            Err(e) => HttpError::application(e),
        };
        self.flags.record(&e);
        if self.response.is_committed() {
            error!(cause = %e, "service failed after the response was committed");
            self.flags.abort = true;
        } else {
            error!(cause = %e, "service failed");
        }
    }

    async fn end_request<S: Transport>(&mut self, stream: &mut S) {
        if self.output.has_failed() {
            self.flags.abort = true;
        }
        if self.flags.abort {
            debug!("connection aborted");
            self.flags.keep_alive = false;
            return;
        }

        if let Some(status) = self.flags.error_status
            && !self.response.is_committed()
        {
            self.response.reset();
            self.response.set_status(status);
            self.response.set_content_length(0);
        }
        if let Err(e) =
            commit_response(&self.request, &mut self.response, &mut self.output, &mut self.flags, &self.config)
        {
            error!(cause = %e, "failed to commit response");
            self.flags.keep_alive = false;
            return;
        }

        if self.flags.expectation {
            debug!("body was never acknowledged, close instead of reading it");
            self.flags.keep_alive = false;
        } else if let Err(e) = self.input.end_request(stream, self.config.max_swallow_size()).await {
            warn!(cause = %e, "failed to drain request body");
            self.flags.keep_alive = false;
        }

        if let Err(e) = self.output.end_request(stream).await {
            debug!(cause = %e, "failed to finish response");
            self.flags.keep_alive = false;
        }
    }

    fn next_request(&mut self) {
        self.request.recycle();
        self.response.recycle();
        self.input.next_request();
        self.output.next_request();
        self.flags = ProcessorFlags::default();
    }

    /// Resets all connection state so the processor can serve another connection.
    pub fn recycle(&mut self) {
        self.next_request();
        self.request.recycle_connection();
        self.input.recycle();
        self.output.recycle();
        self.input.set_read_timeout(self.config.read_timeout());
        self.output.set_write_timeout(self.config.write_timeout());
        self.keep_alive_left = self.config.max_keep_alive_requests();
        self.served = 0;
    }
}

/// Polls the write pump ahead of the adapter on every wakeup, so pumped
/// bytes reach the socket while the adapter is suspended.
async fn serve_with_pump<F>(service: F, pump: &WritePump, io: &SharedTransport<'_>) -> F::Output
where
    F: Future,
{
    let mut service = std::pin::pin!(service);
    poll_fn(|cx| {
        if let Poll::Ready(Err(e)) = pump.poll_progress(cx, &mut io.handle()) {
            debug!(cause = %e, "background write failed");
        }
        service.as_mut().poll(cx)
    })
    .await
}

/// Chooses the response framing and stages the status line and headers.
pub(crate) fn commit_response(
    request: &Request,
    response: &mut Response,
    output: &mut OutputBuffer,
    flags: &mut ProcessorFlags,
    config: &ConnectorConfig,
) -> Result<(), SendError> {
    if response.is_committed() {
        return Ok(());
    }
    prepare_response(request, response, output, flags, config);
    output.commit(response)
}

fn prepare_response(
    request: &Request,
    response: &mut Response,
    output: &mut OutputBuffer,
    flags: &mut ProcessorFlags,
    config: &ConnectorConfig,
) {
    output.reset_filters();

    let status = response.status();
    if flags.error || status_drops_connection(status) {
        flags.keep_alive = false;
    }
    if response.headers().get_all(CONNECTION).iter().any(|value| has_token(value.as_bytes(), b"close")) {
        flags.keep_alive = false;
    }

    if flags.http09 {
        output.add_filter(OutputFilter::close_delimited());
        return;
    }

    let head = *request.method() == Method::HEAD;
    let bodiless = head || matches!(status.as_u16(), 204 | 205 | 304);
    let gzip = config.compression()
        && !bodiless
        && !response.headers().contains_key(CONTENT_ENCODING)
        && accepts_gzip(request);
    let declared = u64::try_from(response.content_length()).ok();

    let size = match declared {
        _ if bodiless => PayloadSize::Empty,
        Some(length) if !gzip => PayloadSize::Length(length),
        _ if flags.http11 => PayloadSize::Chunked,
        _ => PayloadSize::CloseDelimited,
    };

    let headers = response.headers_mut();
    match size {
        PayloadSize::Empty => {
            if let (true, Some(length)) = (head, declared) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
            output.add_filter(OutputFilter::void());
        }
        PayloadSize::Length(length) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            output.add_filter(OutputFilter::identity(length));
        }
        PayloadSize::Chunked => {
            headers.remove(CONTENT_LENGTH);
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            output.add_filter(OutputFilter::chunked());
        }
        PayloadSize::CloseDelimited => {
            headers.remove(CONTENT_LENGTH);
            flags.keep_alive = false;
            output.add_filter(OutputFilter::close_delimited());
        }
    }

    if gzip {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.append(VARY, HeaderValue::from_static("accept-encoding"));
        output.add_filter(OutputFilter::gzip());
    }

    if !flags.keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    } else if !flags.http11 {
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    if let Some(server) = config.server_header()
        && !headers.contains_key(SERVER)
        && let Ok(value) = HeaderValue::from_str(server)
    {
        headers.insert(SERVER, value);
    }

    trace!(status = status.as_u16(), size = ?size, keep_alive = flags.keep_alive, "prepared response");
}

fn content_length(headers: &MimeHeaders) -> Result<Option<u64>, PrepareError> {
    let mut length = None;
    for value in headers.get_all("content-length") {
        let parsed = std::str::from_utf8(value)
            .ok()
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| PrepareError::invalid_content_length(String::from_utf8_lossy(value)))?;
        ensure!(length.is_none_or(|l| l == parsed), PrepareError::invalid_content_length("conflicting values"));
        length = Some(parsed);
    }
    Ok(length)
}

/// Splits a `Host` value into server name and port.
///
/// IPv6 literals keep their brackets: `[::1]:8080` gives `("[::1]", Some(8080))`.
pub(crate) fn parse_host(host: &[u8]) -> Result<(String, Option<u16>), PrepareError> {
    let (name, rest) = if host.first() == Some(&b'[') {
        let close = host
            .iter()
            .position(|b| *b == b']')
            .ok_or_else(|| PrepareError::invalid_host("unterminated IPv6 literal"))?;
        host.split_at(close + 1)
    } else {
        match host.iter().position(|b| *b == b':') {
            Some(colon) => host.split_at(colon),
            None => (host, &b""[..]),
        }
    };

    let port = match rest {
        [] | [b':'] => None,
        [b':', digits @ ..] => Some(
            std::str::from_utf8(digits)
                .ok()
                .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|d| d.parse::<u16>().ok())
                .ok_or_else(|| PrepareError::invalid_host("invalid port"))?,
        ),
        _ => return Err(PrepareError::invalid_host("unexpected bytes after IPv6 literal")),
    };

    ensure!(name.iter().all(|b| is_host_byte(*b)), PrepareError::invalid_host(String::from_utf8_lossy(name)));
    Ok((String::from_utf8_lossy(name).into_owned(), port))
}

fn is_host_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-._~!$&'()*+,;=%[]:".contains(&b)
}

/// Whether a comma separated header value lists `token`.
fn has_token(value: &[u8], token: &[u8]) -> bool {
    value.split(|b| *b == b',').any(|t| t.trim_ascii().eq_ignore_ascii_case(token))
}

fn accepts_gzip(request: &Request) -> bool {
    request.headers().get_all("accept-encoding").flat_map(|value| value.split(|b| *b == b',')).any(|coding| {
        let mut parts = coding.split(|b| *b == b';');
        let name = parts.next().unwrap_or_default().trim_ascii();
        let refused = parts.any(|param| {
            param
                .trim_ascii()
                .strip_prefix(b"q=")
                .and_then(|q| std::str::from_utf8(q).ok())
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        });
        (name.eq_ignore_ascii_case(b"gzip") || name == b"*") && !refused
    })
}

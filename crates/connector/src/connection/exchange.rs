use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::Method;
use tracing::{debug, warn};

use crate::codec::{InputFilter, InputFilterKind};
use crate::config::ConnectorConfig;
use crate::connection::input_buffer::{InputBuffer, ParseMode};
use crate::connection::output_buffer::{ExecContext, OutputBuffer, WriteState};
use crate::connection::processor::{ProcessorFlags, commit_response};
use crate::connection::transport::SharedTransport;
use crate::protocol::{HttpError, Parameters, ParseError, Request, Response, SendError};

/// Requests an adapter can make of the connector besides reading and writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Writes the status line and headers into the output buffer.
    Commit,
    /// Sends `100 Continue` if the client asked for it.
    Ack,
    /// Pushes buffered response bytes to the socket.
    ClientFlush,
    /// Finishes the response body.
    Close,
    /// Hands `body` to the adapter again as if it were the request body.
    SetBodyReplay(Bytes),
    /// Reads the remaining request body into memory before releasing it.
    BufferBody,
    /// Switches reads and writes between blocking and non-blocking mode.
    ///
    /// A non-blocking read returns an empty chunk instead of waiting for the
    /// socket.
    SetNonBlocking(bool),
    /// Counts the body bytes that can be read without waiting, and records
    /// them on the request.
    Available,
    SetTimeout { read: Option<Duration>, write: Option<Duration> },
    /// Moves parked response bytes onto the non-blocking write path.
    FlushLeftover,
}

/// One request/response exchange, as seen by an adapter.
///
/// The exchange borrows the processor's state for the duration of
/// [`Adapter::service`](crate::adapter::Adapter::service). Reads go through
/// the active input filters and writes through the output filters, so the
/// adapter only ever sees body bytes.
///
/// Failures are recorded on the processor before they are returned: an
/// adapter that swallows an error still gets the connection closed.
pub struct Exchange<'a> {
    request: &'a mut Request,
    response: &'a mut Response,
    input: &'a mut InputBuffer,
    output: &'a mut OutputBuffer,
    io: &'a SharedTransport<'a>,
    flags: &'a mut ProcessorFlags,
    config: &'a ConnectorConfig,
}

impl std::fmt::Debug for Exchange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl<'a> Exchange<'a> {
    pub(crate) fn new(
        request: &'a mut Request,
        response: &'a mut Response,
        input: &'a mut InputBuffer,
        output: &'a mut OutputBuffer,
        io: &'a SharedTransport<'a>,
        flags: &'a mut ProcessorFlags,
        config: &'a ConnectorConfig,
    ) -> Self {
        Self { request, response, input, output, io, flags, config }
    }

    pub fn request(&self) -> &Request {
        &*self.request
    }

    pub fn response(&self) -> &Response {
        &*self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut *self.response
    }

    pub fn config(&self) -> &ConnectorConfig {
        self.config
    }

    /// Whether the connection stays open after this exchange, as far as
    /// the connector knows right now.
    pub fn keep_alive(&self) -> bool {
        self.flags.keep_alive
    }

    /// Reads the next piece of the request body.
    ///
    /// A pending `Expect: 100-continue` is acknowledged before the first
    /// read. Returns `Ok(None)` at the end of the body. In non-blocking mode
    /// an empty chunk means nothing is readable yet.
    pub async fn read(&mut self) -> Result<Option<Bytes>, HttpError> {
        let mode = if self.input.is_non_blocking() { ParseMode::TryAvailable } else { ParseMode::Block };
        self.read_in(mode).await
    }

    async fn read_in(&mut self, mode: ParseMode) -> Result<Option<Bytes>, HttpError> {
        if self.flags.expectation {
            self.send_ack().await?;
        }
        match self.input.read_body_in(&mut self.io.handle(), mode).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(self.record(e.into())),
        }
    }

    /// Body bytes that can be read without waiting on the socket.
    pub fn available(&mut self) -> Result<usize, HttpError> {
        match self.input.available() {
            Ok(n) => {
                self.request.set_available(n);
                Ok(n)
            }
            Err(e) => Err(self.record(e.into())),
        }
    }

    /// Reads the rest of the request body into one buffer, waiting on the
    /// socket even in non-blocking mode.
    pub async fn read_to_end(&mut self) -> Result<Bytes, HttpError> {
        let mut body = BytesMut::new();
        while let Some(bytes) = self.read_in(ParseMode::Block).await? {
            body.extend_from_slice(&bytes);
        }
        Ok(body.freeze())
    }

    /// Writes response body bytes from the request-processing path.
    ///
    /// The response commits on the first write.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<(), HttpError> {
        self.write_in(ExecContext::Container, data.into()).await
    }

    pub async fn write_in(&mut self, ctx: ExecContext, data: Bytes) -> Result<(), HttpError> {
        self.commit()?;
        let result = self.output.write_body(&mut self.io.handle(), ctx, data).await;
        self.check_send(result)
    }

    pub async fn flush(&mut self) -> Result<(), HttpError> {
        self.flush_in(ExecContext::Container).await
    }

    pub async fn flush_in(&mut self, ctx: ExecContext) -> Result<(), HttpError> {
        self.commit()?;
        let result = self.output.client_flush(&mut self.io.handle(), ctx).await;
        self.check_send(result)
    }

    /// Picks the response body framing and stages the header block.
    ///
    /// Does nothing once the response is committed.
    pub fn commit(&mut self) -> Result<(), HttpError> {
        let result = commit_response(self.request, self.response, self.output, self.flags, self.config);
        self.check_send(result)
    }

    /// Sends `100 Continue` if the client is waiting for it.
    pub async fn send_ack(&mut self) -> Result<(), HttpError> {
        if !self.flags.expectation {
            return Ok(());
        }
        self.flags.expectation = false;
        self.input.set_swallow_input(true);
        let result = self.output.send_ack(&mut self.io.handle(), self.response).await;
        self.check_send(result)
    }

    /// The request parameters, from the query string and, for a form post,
    /// from the body.
    ///
    /// Parsed on first use. A form body read here is replayed to later
    /// [`read`](Self::read) calls.
    pub async fn parameters(&mut self) -> Result<&Parameters, HttpError> {
        if !self.request.parameters().is_parsed() {
            self.request.parameters_mut().mark_parsed();
            if let Some(query) = self.request.query().cloned() {
                self.request.parameters_mut().process(&query);
            }
            if self.is_form_post()
                && let Some(body) = self.read_form_body().await?
            {
                self.request.parameters_mut().process(&body);
                self.input.replay(body);
            }
        }
        Ok(self.request.parameters())
    }

    fn is_form_post(&self) -> bool {
        if *self.request.method() != Method::POST {
            return false;
        }
        self.request
            .headers()
            .get_str("content-type")
            .and_then(|value| value.parse::<mime::Mime>().ok())
            .is_some_and(|mime| mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str())
    }

    async fn read_form_body(&mut self) -> Result<Option<Bytes>, HttpError> {
        let limit = self.config.max_post_size();
        if usize::try_from(self.request.content_length()).is_ok_and(|len| len > limit) {
            warn!(content_length = self.request.content_length(), limit, "form body too large, parameters skipped");
            return Ok(None);
        }

        let mut body = BytesMut::new();
        while let Some(bytes) = self.read_in(ParseMode::Block).await? {
            body.extend_from_slice(&bytes);
            if body.len() > limit {
                return Err(self.record(ParseError::body_too_large(limit).into()));
            }
        }
        debug!(len = body.len(), "read form body");
        Ok(Some(body.freeze()))
    }

    pub fn write_state(&self) -> WriteState {
        self.output.state()
    }

    /// Makes one more attempt at a non-blocking write without waiting.
    ///
    /// The connection task keeps the write moving on its own while the
    /// adapter is suspended; this only helps an adapter that is busy.
    pub async fn write_progress(&mut self) -> Result<WriteState, HttpError> {
        let result = self.output.progress(&mut self.io.handle()).await;
        self.check_send(result)
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.io.peer_addr()
    }

    pub async fn action(&mut self, action: Action) -> Result<(), HttpError> {
        match action {
            Action::Commit => self.commit(),
            Action::Ack => self.send_ack().await,
            Action::ClientFlush => self.flush().await,
            Action::Close => {
                self.commit()?;
                let result = self.output.end_request(&mut self.io.handle()).await;
                self.check_send(result)
            }
            Action::SetBodyReplay(body) => {
                self.input.replay(body);
                Ok(())
            }
            Action::BufferBody => {
                if self.input.filters().has_delimiter() && !self.input.filters().contains(InputFilterKind::Buffered) {
                    self.input.add_filter(InputFilter::buffered(self.config.max_save_post_size()));
                }
                Ok(())
            }
            Action::SetNonBlocking(non_blocking) => {
                self.input.set_non_blocking(non_blocking);
                self.output.set_non_blocking(non_blocking);
                Ok(())
            }
            Action::Available => self.available().map(|_| ()),
            Action::SetTimeout { read, write } => {
                self.input.set_read_timeout(read);
                self.output.set_write_timeout(write);
                Ok(())
            }
            Action::FlushLeftover => {
                let result = self.output.flush_leftover(&mut self.io.handle()).await;
                self.check_send(result).map(|_| ())
            }
        }
    }

    fn check_send<T>(&mut self, result: Result<T, SendError>) -> Result<T, HttpError> {
        match result {
            Ok(value) => Ok(value),
            // the caller retries from the request-processing path
            Err(SendError::Backlog) => Err(SendError::Backlog.into()),
            Err(e) => Err(self.record(e.into())),
        }
    }

    fn record(&mut self, e: HttpError) -> HttpError {
        self.flags.record(&e);
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::connection::Http11Processor;
    use crate::protocol::BoxError;
    use http::StatusCode;
    use indoc::indoc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use triomphe::Arc;

    struct FormEcho;

    impl Adapter for FormEcho {
        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
            let name = exchange.parameters().await?.get("name").unwrap_or_default().to_string();
            let body = exchange.read_to_end().await?;
            let reply = format!("{name}|{}", String::from_utf8_lossy(&body));
            exchange.response_mut().set_content_length(reply.len() as u64);
            exchange.write(reply).await?;
            Ok(())
        }
    }

    struct Buffered;

    impl Adapter for Buffered {
        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
            exchange.action(Action::BufferBody).await?;
            let first = exchange.read().await?;
            let second = exchange.read().await?;
            assert_eq!(first, Some(Bytes::from_static(b"abcdef")));
            assert_eq!(second, None);
            exchange.response_mut().set_status(StatusCode::NO_CONTENT);
            Ok(())
        }
    }

    /// Reports buffered body bytes, then reads them without blocking.
    struct NonBlockingRead;

    impl Adapter for NonBlockingRead {
        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
            exchange.action(Action::Available).await?;
            let available = exchange.request().available();
            exchange.action(Action::SetNonBlocking(true)).await?;
            let first = exchange.read().await?.unwrap_or_default();
            let rest = exchange.read().await?;
            let reply = format!("{available}|{}|{}", String::from_utf8_lossy(&first), rest.is_none());
            exchange.action(Action::SetNonBlocking(false)).await?;
            exchange.response_mut().set_content_length(reply.len() as u64);
            exchange.write(reply).await?;
            Ok(())
        }
    }

    async fn exchange_once<A: Adapter + Sync>(adapter: A, wire: &str) -> String {
        let (mut client, mut server) = duplex(64 * 1024);
        client.write_all(wire.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let mut processor = Http11Processor::new(Arc::new(ConnectorConfig::default()));
        processor.run(&mut server, &adapter).await;

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_form_parameters_are_replayed() {
        let wire = indoc! {"
            POST /form?name=query HTTP/1.1\r
            Host: h\r
            Content-Type: application/x-www-form-urlencoded; charset=utf-8\r
            Content-Length: 11\r
            Connection: close\r
            \r
            name=posted"};
        let out = exchange_once(FormEcho, wire).await;

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("\r\n\r\nquery|name=posted"));
    }

    #[tokio::test]
    async fn test_buffer_body_releases_once() {
        let wire = indoc! {"
            POST / HTTP/1.1\r
            Host: h\r
            Transfer-Encoding: chunked\r
            Connection: close\r
            \r
            3\r
            abc\r
            3\r
            def\r
            0\r
            \r
        "};
        let out = exchange_once(Buffered, wire).await;
        assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"));
    }

    #[tokio::test]
    async fn test_available_then_non_blocking_read() {
        let wire = indoc! {"
            POST / HTTP/1.1\r
            Host: h\r
            Content-Length: 5\r
            Connection: close\r
            \r
            hello"};
        let out = exchange_once(NonBlockingRead, wire).await;

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("\r\n\r\n5|hello|true"));
    }
}

//! The output side of a connection.
//!
//! Response bytes flow through three places before they reach the socket:
//!
//! - the staging buffer, which receives the header block at commit and body
//!   bytes from the output filters
//! - the [`WritePump`], which owns the buffer being written and the buffers
//!   queued behind it
//! - the leftover buffer, holding bytes that could not be handed to the pump
//!   because it still owned earlier bytes
//!
//! Bytes always leave in that reverse order (pumped first, then leftover,
//! then staging), which keeps the wire ordered no matter how blocking and
//! non-blocking flushes interleave.
//!
//! The pipeline is in one of three [`WriteState`]s. While it is
//! [`WriteState::Backlogged`], only the [`ExecContext::Container`] path may
//! write or flush; everybody else gets [`SendError::Backlog`] and the buffers
//! stay untouched.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::poll_fn;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;
use tracing::{debug, trace, warn};
use triomphe::Arc;

use crate::codec::{HeaderEncoder, OutputFilter, OutputFilterChain};
use crate::protocol::{PayloadItem, Response, SendError};
use crate::utils::{ensure, with_timeout};

/// The interim response sent for `Expect: 100-continue`.
pub const ACK_BYTES: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Who is driving a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    /// The in-line request-processing path of the connection's own task.
    Container,
    /// An asynchronous event path, such as a write-readiness callback.
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    /// The pump owns bytes that are not on the wire yet.
    Writing,
    /// Bytes are waiting in the leftover buffer behind an unfinished write.
    Backlogged,
}

#[derive(Debug)]
struct InFlight {
    data: Bytes,
    written: usize,
}

impl InFlight {
    fn new(data: Bytes) -> Self {
        Self { data, written: 0 }
    }

    fn remaining(&self) -> &[u8] {
        &self.data[self.written..]
    }
}

#[derive(Debug, Default)]
struct PumpState {
    in_flight: Option<InFlight>,
    queue: VecDeque<Bytes>,
    failed: bool,
    bytes_written: u64,
    last_write: usize,
}

impl PumpState {
    fn fail(&mut self, e: io::Error) -> SendError {
        self.failed = true;
        self.in_flight = None;
        self.queue.clear();
        e.into()
    }
}

/// The write-completion side of the output pipeline.
///
/// The pump owns the buffer currently being written and the buffers queued
/// behind it. [`WritePump::poll_progress`] continues the write whenever the
/// socket accepts more bytes: a partially written buffer is re-issued from
/// where it stopped, and a finished one is replaced by the next queued
/// buffer. It is polled from the connection task with the task's own waker,
/// so writes keep moving while the adapter is suspended on something else.
///
/// Handles are cheap clones of the same state.
#[derive(Debug, Clone, Default)]
pub struct WritePump {
    state: Arc<Mutex<PumpState>>,
}

impl WritePump {
    fn lock(&self) -> MutexGuard<'_, PumpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.in_flight.is_none() && state.queue.is_empty()
    }

    /// Whether a write failed; the connection must close.
    pub fn has_failed(&self) -> bool {
        self.lock().failed
    }

    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes_written
    }

    /// Byte count of the most recent socket write.
    pub fn last_write(&self) -> usize {
        self.lock().last_write
    }

    fn push(&self, data: Bytes) {
        if !data.is_empty() {
            self.lock().queue.push_back(data);
        }
    }

    /// Writes as much as the socket accepts right now.
    ///
    /// Returns `Ready(Ok(()))` once the pump owns nothing, and `Pending` with
    /// the waker in `cx` registered on the socket while bytes remain. A
    /// failed write drops everything the pump owns.
    pub fn poll_progress<W>(&self, cx: &mut Context<'_>, writer: &mut W) -> Poll<Result<(), SendError>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut guard = self.lock();
        let state = &mut *guard;
        loop {
            let Some(mut flight) = state.in_flight.take().or_else(|| state.queue.pop_front().map(InFlight::new)) else {
                return Poll::Ready(Ok(()));
            };
            if flight.remaining().is_empty() {
                continue;
            }

            match Pin::new(&mut *writer).poll_write(cx, flight.remaining()) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(state.fail(io::Error::from(io::ErrorKind::WriteZero))));
                }
                Poll::Ready(Ok(n)) => {
                    flight.written += n;
                    state.bytes_written += n as u64;
                    state.last_write = n;
                    state.in_flight = Some(flight);
                }
                Poll::Ready(Err(e)) => {
                    warn!(cause = %e, "socket write failed");
                    return Poll::Ready(Err(state.fail(e)));
                }
                Poll::Pending => {
                    state.in_flight = Some(flight);
                    return Poll::Pending;
                }
            }
        }
    }

    /// Makes one write attempt without waiting.
    async fn attempt<W>(&self, writer: &mut W) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        poll_fn(|cx| match self.poll_progress(cx, writer) {
            Poll::Ready(result) => Poll::Ready(result),
            Poll::Pending => Poll::Ready(Ok(())),
        })
        .await
    }

    /// Waits until everything the pump owns is on the wire.
    async fn drain<W>(&self, writer: &mut W, timeout: Option<Duration>) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let drain = poll_fn(|cx| self.poll_progress(cx, writer));
        let Some(timeout) = timeout else {
            return drain.await;
        };
        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => result,
            Err(elapsed) => Err(self.lock().fail(io::Error::new(io::ErrorKind::TimedOut, elapsed))),
        }
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.in_flight = None;
        state.queue.clear();
    }

    fn reset(&self) {
        *self.lock() = PumpState::default();
    }
}

#[derive(Debug)]
pub struct OutputBuffer {
    staging: BytesMut,
    filters: OutputFilterChain,
    header_encoder: HeaderEncoder,
    buffer_size: usize,
    leftover: BytesMut,
    pump: WritePump,
    non_blocking: bool,
    write_timeout: Option<Duration>,
    http09: bool,
    finished: bool,
}

impl OutputBuffer {
    pub fn new(buffer_size: usize, max_header_size: usize, write_timeout: Option<Duration>) -> Self {
        Self {
            staging: BytesMut::with_capacity(buffer_size),
            filters: OutputFilterChain::new(),
            header_encoder: HeaderEncoder::new(max_header_size),
            buffer_size,
            leftover: BytesMut::new(),
            pump: WritePump::default(),
            non_blocking: false,
            write_timeout,
            http09: false,
            finished: false,
        }
    }

    pub fn state(&self) -> WriteState {
        if !self.leftover.is_empty() {
            WriteState::Backlogged
        } else if !self.pump.is_idle() {
            WriteState::Writing
        } else {
            WriteState::Idle
        }
    }

    pub fn pump(&self) -> &WritePump {
        &self.pump
    }

    pub fn filters(&self) -> &OutputFilterChain {
        &self.filters
    }

    pub fn add_filter(&mut self, filter: OutputFilter) {
        self.filters.add_active(filter);
    }

    /// Drops the filters chosen for a response that never committed.
    pub(crate) fn reset_filters(&mut self) {
        self.filters.recycle();
    }

    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    pub fn set_non_blocking(&mut self, non_blocking: bool) {
        self.non_blocking = non_blocking;
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// HTTP/0.9 responses carry no status line or headers.
    pub fn set_http09(&mut self, http09: bool) {
        self.http09 = http09;
    }

    /// Whether a socket write failed; the connection must close.
    pub fn has_failed(&self) -> bool {
        self.pump.has_failed()
    }

    pub fn bytes_written(&self) -> u64 {
        self.pump.bytes_written()
    }

    pub fn last_write(&self) -> usize {
        self.pump.last_write()
    }

    pub fn leftover_len(&self) -> usize {
        self.leftover.len()
    }

    /// Writes the status line and header block into the staging buffer.
    ///
    /// Does nothing once the response is committed.
    pub fn commit(&mut self, response: &mut Response) -> Result<(), SendError> {
        if response.is_committed() {
            return Ok(());
        }
        if !self.http09 {
            self.header_encoder.encode(&*response, &mut self.staging)?;
        }
        response.set_committed();
        trace!(status = response.status().as_u16(), staged = self.staging.len(), "committed response");
        Ok(())
    }

    /// Encodes body bytes through the output filters.
    ///
    /// The staging buffer is flushed once it reaches the configured size.
    pub async fn write_body<W>(&mut self, writer: &mut W, ctx: ExecContext, data: Bytes) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        ensure!(self.state() != WriteState::Backlogged || ctx == ExecContext::Container, SendError::Backlog);
        ensure!(!self.finished, SendError::invalid_body("response already finished"));

        self.filters.encode(PayloadItem::Chunk(data), &mut self.staging)?;
        if self.staging.len() >= self.buffer_size {
            self.flush_buffer(writer, ctx).await?;
        }
        Ok(())
    }

    /// Pushes whatever the filters hold back into staging, then flushes it.
    pub async fn client_flush<W>(&mut self, writer: &mut W, ctx: ExecContext) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        ensure!(self.state() != WriteState::Backlogged || ctx == ExecContext::Container, SendError::Backlog);
        if !self.finished {
            self.filters.flush(&mut self.staging)?;
        }
        self.flush_buffer(writer, ctx).await
    }

    /// Hands the staging buffer to the socket.
    ///
    /// Blocking mode writes everything pending before returning. Non-blocking
    /// mode gives the bytes to the pump and makes one write attempt when the
    /// pump is idle, or parks them in the leftover buffer behind the write in
    /// progress.
    pub async fn flush_buffer<W>(&mut self, writer: &mut W, ctx: ExecContext) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        ensure!(!self.pump.has_failed(), SendError::io(io::Error::from(io::ErrorKind::BrokenPipe)));
        self.pump.attempt(writer).await?;

        if !self.leftover.is_empty() {
            ensure!(ctx == ExecContext::Container, SendError::Backlog);
            return self.write_pending(writer).await;
        }

        if self.non_blocking {
            if self.staging.is_empty() {
                return Ok(());
            }
            let data = self.staging.split().freeze();
            if self.pump.is_idle() {
                self.pump.push(data);
                self.pump.attempt(writer).await?;
            } else {
                trace!(len = data.len(), "park bytes behind the write in progress");
                self.leftover.extend_from_slice(&data);
            }
            Ok(())
        } else {
            self.write_pending(writer).await
        }
    }

    /// Writes pumped, leftover and staged bytes, in that order, and waits
    /// until they are all on the wire.
    async fn write_pending<W>(&mut self, writer: &mut W) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if !self.leftover.is_empty() {
            debug!(len = self.leftover.len(), "write leftover bytes");
            self.pump.push(self.leftover.split().freeze());
        }
        if !self.staging.is_empty() {
            self.pump.push(self.staging.split().freeze());
        }
        self.pump.drain(writer, self.write_timeout).await
    }

    /// Waits until the pump has written everything it owns.
    pub async fn drain<W>(&mut self, writer: &mut W) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.pump.drain(writer, self.write_timeout).await
    }

    /// Moves the leftover buffer onto the pump in buffer-sized pieces and
    /// starts writing it.
    pub async fn flush_leftover<W>(&mut self, writer: &mut W) -> Result<WriteState, SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while !self.leftover.is_empty() {
            let n = self.leftover.len().min(self.buffer_size);
            self.pump.push(self.leftover.split_to(n).freeze());
        }
        self.progress(writer).await
    }

    /// Continues the non-blocking path with one write attempt.
    pub async fn progress<W>(&mut self, writer: &mut W) -> Result<WriteState, SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.pump.attempt(writer).await?;
        Ok(self.state())
    }

    /// Writes the `100 Continue` interim response straight to the socket.
    ///
    /// Skipped once the response is committed.
    pub async fn send_ack<W>(&mut self, writer: &mut W, response: &Response) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if response.is_committed() {
            return Ok(());
        }
        debug!("send 100 continue");
        self.pump.push(Bytes::from_static(ACK_BYTES));
        self.pump.drain(writer, self.write_timeout).await?;
        with_timeout(self.write_timeout, writer.flush()).await.map_err(SendError::from)
    }

    /// Terminates the body and writes every pending byte.
    pub async fn end_request<W>(&mut self, writer: &mut W) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if !self.finished {
            self.finished = true;
            self.filters.encode(PayloadItem::Eof, &mut self.staging)?;
        }
        self.write_pending(writer).await?;
        with_timeout(self.write_timeout, writer.flush()).await.map_err(SendError::from)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn next_request(&mut self) {
        self.staging.clear();
        self.filters.recycle();
        self.leftover.clear();
        self.pump.clear();
        self.non_blocking = false;
        self.http09 = false;
        self.finished = false;
    }

    pub fn recycle(&mut self) {
        self.next_request();
        self.pump.reset();
    }
}

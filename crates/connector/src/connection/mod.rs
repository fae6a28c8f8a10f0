//! Connection handling.
//!
//! A connection is served by one [`Http11Processor`] at a time. The processor
//! owns the per-connection state and drives it through its state machine:
//!
//! - [`InputBuffer`]: the input window, the parsers and the input filters
//! - [`OutputBuffer`]: staging, the output filters and the write paths, with
//!   the [`ExecContext`] and [`WriteState`] rules for non-blocking writes
//! - [`Exchange`]: what the adapter sees of one request
//! - [`ProcessorPool`]: idle processors kept for the next connection
//!
//! Anything that is [`Transport`] can be served, which is how the tests run
//! whole exchanges over in-memory duplex streams.

mod exchange;
mod input_buffer;
mod output_buffer;
mod pool;
mod processor;
mod transport;

pub use exchange::{Action, Exchange};
pub use input_buffer::{InputBuffer, LineStatus, ParseMode};
pub use output_buffer::{ACK_BYTES, ExecContext, OutputBuffer, WritePump, WriteState};
pub use pool::ProcessorPool;
pub use processor::{Http11Processor, SocketState};
pub use transport::{SharedTransport, Transport, TransportHandle};

//! An HTTP/1.1 front-end connector
//!
//! This crate is the message engine that sits between a socket and an
//! application: it parses requests out of a fixed-size input window, frames
//! request and response bodies through filter chains, writes responses with
//! blocking or non-blocking writes, and runs the per-connection keep-alive
//! state machine. What the application does with a request is up to an
//! [`adapter::Adapter`].
//!
//! # Features
//!
//! - HTTP/1.1, HTTP/1.0 and HTTP/0.9 requests
//! - Folded header lines and duplicate header names
//! - Chunked, length delimited and close delimited bodies
//! - Optional gzip compression of response bodies
//! - Expect-continue, acknowledged on demand or on the first body read
//! - Keep-alive with a per-connection request budget, and pipelining
//! - Non-blocking writes with an explicit backlog state
//!
//! # Example
//!
//! ```no_run
//! use micro_connector::adapter::Adapter;
//! use micro_connector::config::ConnectorConfig;
//! use micro_connector::connection::Exchange;
//! use micro_connector::protocol::BoxError;
//! use micro_connector::server::Connector;
//! use tracing::{error, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! struct HelloWorld;
//!
//! impl Adapter for HelloWorld {
//!     async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
//!         let body = exchange.read_to_end().await?;
//!         tracing::info!(uri = %exchange.request().decoded_uri(), body_len = body.len(), "receiving request");
//!
//!         let response_body = "Hello World!\r\n";
//!         exchange.response_mut().set_content_length(response_body.len() as u64);
//!         exchange.write(response_body).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let config = ConnectorConfig::default().with_server_header("micro-connector");
//!     let connector = match Connector::bind("127.0.0.1:8080", config, HelloWorld).await {
//!         Ok(connector) => connector,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!     if let Err(e) = connector.serve().await {
//!         error!(cause = %e, "server stopped");
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`codec`]: sans-IO parsers, the input window and the body filters
//! - [`protocol`]: request, response, headers, parameters and errors
//! - [`connection`]: input and output buffers, the exchange and the processor
//! - [`adapter`]: the trait an application implements
//! - [`server`]: a TCP accept loop with a processor pool
//! - [`config`]: connector settings
//!
//! # Error Handling
//!
//! - [`protocol::ParseError`]: malformed requests, answered with `400` (or `413`)
//! - [`protocol::PrepareError`]: requests rejected before service, each with its status
//! - [`protocol::SendError`]: failures while writing the response
//! - [`protocol::HttpError`]: the top-level error an adapter sees
//!
//! Transport failures and timeouts close the connection without writing
//! anything further.
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - No TLS; `secure` only changes the scheme and default port
//! - The request line and header block must fit the header buffer

pub mod adapter;
pub mod codec;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;

mod utils;

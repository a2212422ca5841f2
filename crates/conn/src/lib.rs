//! An event-driven HTTP/1.1 connection engine
//!
//! This crate provides the protocol core of an HTTP/1.1 client and server: a
//! send side state machine, an incremental wire parser, client request
//! pipelining with bounded queues and a connection pool, and server dispatch to
//! path-addressed resources. The engine never touches sockets itself. It reacts
//! to transport events and writes into a [`connection::Transport`], so the same
//! code runs over tokio I/O through [`connection::IoDriver`] or over an
//! in-memory transport in tests.
//!
//! # Features
//!
//! - Pull-based body streams: memory, file, chunked, multipart and chained
//! - Client pipelining of GET/HEAD requests with strict FIFO response matching
//! - Retry of idempotent requests after a connection loss
//! - Challenge/response authentication with a Basic adapter
//! - Server resources with body parsers selected by media type
//! - Automatic `ETag` and conditional `304 Not Modified` answers
//! - Expect-continue, keep-alive and WebSocket upgrade handshakes
//!
//! # Example
//!
//! ```no_run
//! use micro_conn::config::ConnectionConfig;
//! use micro_conn::connection::IoDriver;
//! use micro_conn::server::{Exchange, ResourceRegistry, Router, ServerConnection, resource_fn};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tracing::{Level, error, info, warn};
//! use tracing_subscriber::FmtSubscriber;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize logging
//!     let subscriber = FmtSubscriber::builder()
//!         .with_max_level(Level::INFO)
//!         .finish();
//!     tracing::subscriber::set_global_default(subscriber)
//!         .expect("setting default subscriber failed");
//!
//!     let router = Router::new()
//!         .route(
//!             "/hello/{name}",
//!             resource_fn(|exchange: &mut Exchange| {
//!                 let name = exchange.route_param("name").unwrap_or("World").to_owned();
//!                 exchange.response_mut().set_body(format!("Hello {name}!\r\n"));
//!             }),
//!         )
//!         .expect("route is valid");
//!     let registry: Arc<dyn ResourceRegistry> = Arc::new(router);
//!
//!     info!(port = 8080, "start listening");
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let registry = Arc::clone(&registry);
//!
//!         tokio::spawn(async move {
//!             let config = ConnectionConfig::new();
//!             let (reader, writer) = tcp_stream.into_split();
//!             let mut driver = IoDriver::new(reader, writer, &config);
//!             let mut connection = ServerConnection::new(config, registry);
//!             match driver.run(&mut connection).await {
//!                 Ok(exit) => {
//!                     info!(?exit, "finished process, connection shutdown");
//!                 }
//!                 Err(e) => {
//!                     error!("service has error, cause {}, connection shutdown", e);
//!                 }
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`stream`]: the pull-based byte stream contract and its implementations
//! - [`protocol`]: requests, responses, headers, errors and the WebSocket handshake
//! - [`codec`]: head encoding, body framing and the incremental [`codec::WireParser`]
//! - [`connection`]: the send state machine, the transport seam and the tokio driver
//! - [`client`]: pipelining queues, authentication and the connection pool
//! - [`server`]: resources, the router, body parsers and server dispatch
//! - [`config`]: limits and policies of a connection
//!
//! # Error Handling
//!
//! The crate uses custom error types that implement `std::error::Error`:
//!
//! - [`protocol::HttpError`]: Top-level error of a connection
//! - [`protocol::ParseError`]: Malformed incoming messages
//! - [`protocol::SendError`]: Failures while writing a message
//! - [`protocol::ExchangeError`]: The outcome handed to a request's completion callback
//!
//! # Limitations
//!
//! - HTTP/1.1 and HTTP/1.0 only
//! - TLS is left to the transport; the pool only carries the TLS settings
//! - Maximum number of headers: 64

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod stream;

mod utils;
pub(crate) use utils::ensure;

//! The client role: request queues, pipelining, authentication retries and the
//! connection pool.
//!
//! # Components
//!
//! - [`ClientConnection`]: Waiting and Executing queues over one connection,
//!   pipelining GET/HEAD requests and matching responses in FIFO order
//! - [`BoundedQueue`]: the fail-closed queue both are built on
//! - [`ConnectionPool`]: one connection per [`Destination`], transports opened
//!   through a [`Connector`], per-destination [`TlsSettings`]
//! - [`AuthAdapter`], [`BasicAuth`], [`Challenge`]: challenge/response retries

mod auth;
mod connection;
mod pool;
mod queue;

pub use auth::{AuthAdapter, BasicAuth, Challenge};
pub use connection::ClientConnection;
pub use pool::{ConnectionPool, Connector, Destination, TlsSettings};
pub use queue::BoundedQueue;

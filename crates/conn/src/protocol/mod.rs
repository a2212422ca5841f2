//! Protocol value types shared by the codec, the connection and both roles.
//!
//! # Components
//!
//! - **Headers** ([`HeaderTable`]): ordered, case-insensitive storage with O(1)
//!   access for [`KnownHeader`]s and interned custom names
//! - **Messages** ([`Request`], [`Response`]): builder-style value objects; the
//!   request also carries the callbacks observing its exchange ([`Completion`])
//! - **Payload framing** ([`PayloadItem`], [`PayloadSize`])
//! - **Upgrade handshake** ([`websocket`])
//! - **Errors** ([`HttpError`], [`ParseError`], [`SendError`], [`StreamError`],
//!   [`QueueError`], [`PoolError`], [`ExchangeError`])

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod header;
pub use header::{HeaderKey, HeaderNameRef, HeaderTable, KnownHeader, MULTI_VALUE_SEPARATOR};

mod request;
pub use request::{BodyHook, Completion, CompletionHook, HeadersHook, MAX_TRANSPORT_ATTEMPTS, Request, TlsHook};

mod response;
pub use response::Response;

mod error;
pub use error::ExchangeError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::PoolError;
pub use error::QueueError;
pub use error::SendError;
pub use error::StreamError;

pub mod websocket;

//! HTTP/1.1 wire codec.
//!
//! The codec turns bytes into parser callbacks and message heads into bytes. It
//! follows the `tokio_util::codec` split between decoders and encoders:
//!
//! - Incoming messages:
//!   - [`WireParser`]: incremental parser reporting through [`ParserEvents`]
//!   - head parsing via the [`header`] module
//!   - body decoding via [`PayloadDecoder`] (length, chunked, until close)
//!
//! - Outgoing messages:
//!   - [`HeaderEncoder`]: start line and headers, with framing headers fixed up
//!   - [`ChunkedEncoder`]: chunk framing used by chunked body streams
//!
//! # Example
//!
//! ```
//! use micro_conn::codec::{HeadersVerdict, ParserEvents, StartLine, WireParser};
//! use micro_conn::protocol::ParseError;
//!
//! #[derive(Default)]
//! struct Count(usize);
//!
//! impl ParserEvents for Count {
//!     fn on_message_begin(&mut self, _start: &StartLine<'_>) -> Result<(), ParseError> { Ok(()) }
//!     fn on_header_field(&mut self, _name: &[u8]) -> Result<(), ParseError> { Ok(()) }
//!     fn on_header_value(&mut self, _value: &[u8]) -> Result<(), ParseError> { Ok(()) }
//!     fn on_headers_complete(&mut self) -> HeadersVerdict { HeadersVerdict::Continue }
//!     fn on_body(&mut self, _chunk: &[u8]) {}
//!     fn on_message_complete(&mut self) { self.0 += 1; }
//!     fn on_error(&mut self, _error: &ParseError) {}
//! }
//!
//! let mut parser = WireParser::requests(8 * 1024, 64);
//! let mut count = Count::default();
//! parser.feed(b"GET / HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n", &mut count).unwrap();
//! assert_eq!(count.0, 2);
//! ```

mod body;
pub mod header;
mod parser;

pub use body::{ChunkedEncoder, PayloadDecoder};
pub use header::{HeadLine, HeaderEncoder, MessageKind};
pub use parser::{HeadersVerdict, ParserEvents, StartLine, WireParser};

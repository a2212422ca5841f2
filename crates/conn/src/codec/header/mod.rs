//! Message head codec: start line plus header section.
//!
//! - [`HeaderDecoder`] parses incoming heads with `httparse`
//! - [`HeaderEncoder`] writes outgoing heads from a [`HeaderTable`](crate::protocol::HeaderTable)

mod header_decoder;
mod header_encoder;

pub use header_decoder::{DecodedHead, HeaderDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM, MessageKind};
pub use header_encoder::{HeadLine, HeaderEncoder};

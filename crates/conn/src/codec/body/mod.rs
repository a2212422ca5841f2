//! Body framing: payload decoders for incoming messages and the chunk framer for
//! outgoing ones.
//!
//! - [`PayloadDecoder`] picks between `Content-Length`, chunked and until-close
//!   decoding for one message
//! - [`ChunkedEncoder`] frames outgoing data as `Transfer-Encoding: chunked`

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod payload_decoder;

pub use chunked_encoder::ChunkedEncoder;
pub use payload_decoder::PayloadDecoder;

//! Decoder for `Transfer-Encoding: chunked` bodies
//! ([RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1)).
//!
//! Chunk extensions and trailer fields are accepted and discarded. Chunk data is
//! handed out as soon as it arrives, so one wire chunk may surface as several
//! [`PayloadItem::Chunk`]s.

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;
use ChunkedState::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    chunk_size: u64,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, chunk_size: 0 }
    }

    pub fn is_finished(&self) -> bool {
        self.state == End
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// hex digits of the chunk size
    Size,
    /// whitespace after the size
    SizeLws,
    /// `;name=value` after the size, ignored
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    /// a trailer field line, ignored
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

fn invalid(reason: &str) -> ParseError {
    ParseError::invalid_body(format!("invalid chunked body: {reason}"))
}

fn hex_value(byte: u8) -> Option<u64> {
    match byte {
        b'0'..=b'9' => Some(u64::from(byte - b'0')),
        b'a'..=b'f' => Some(u64::from(byte - b'a' + 10)),
        b'A'..=b'F' => Some(u64::from(byte - b'A' + 10)),
        _ => None,
    }
}

impl ChunkedDecoder {
    /// Consumes one framing byte and returns the next state.
    fn step_byte(&mut self, byte: u8) -> Result<ChunkedState, ParseError> {
        let next = match (self.state, byte) {
            (Size, b) if hex_value(b).is_some() => {
                let digit = hex_value(b).unwrap_or_default();
                self.chunk_size = self
                    .chunk_size
                    .checked_mul(16)
                    .and_then(|size| size.checked_add(digit))
                    .ok_or_else(|| invalid("chunk size overflow"))?;
                Size
            }
            (Size | SizeLws, b'\t' | b' ') => SizeLws,
            (Size | SizeLws, b';') => Extension,
            (Size | SizeLws | Extension, b'\r') => SizeLf,
            (Size, _) => return Err(invalid("bad chunk size")),
            (SizeLws, _) => return Err(invalid("bad whitespace after chunk size")),
            (Extension, b'\n') => return Err(invalid("bare LF in chunk extension")),
            (Extension, _) => Extension,
            (SizeLf, b'\n') if self.chunk_size == 0 => EndCr,
            (SizeLf, b'\n') => Body,
            (SizeLf, _) => return Err(invalid("expected LF after chunk size")),
            (BodyCr, b'\r') => BodyLf,
            (BodyCr, _) => return Err(invalid("expected CR after chunk data")),
            (BodyLf, b'\n') => Size,
            (BodyLf, _) => return Err(invalid("expected LF after chunk data")),
            (Trailer, b'\r') => TrailerLf,
            (Trailer, _) => Trailer,
            (TrailerLf, b'\n') => EndCr,
            (TrailerLf, _) => return Err(invalid("expected LF after trailer")),
            (EndCr, b'\r') => EndLf,
            (EndCr, _) => Trailer,
            (EndLf, b'\n') => End,
            (EndLf, _) => return Err(invalid("expected final LF")),
            (Body | End, _) => self.state,
        };
        Ok(next)
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
                _ if src.is_empty() => return Ok(None),
                Body => {
                    let read_size = usize::try_from(self.chunk_size).map_or(src.len(), |size| size.min(src.len()));
                    let bytes = src.split_to(read_size).freeze();
                    self.chunk_size -= read_size as u64;
                    if self.chunk_size == 0 {
                        self.state = BodyCr;
                    }
                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                _ => {
                    let byte = src.get_u8();
                    self.state = self.step_byte(byte)?;
                }
            }
        }
    }
}

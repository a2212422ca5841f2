//! Body decoder chosen from the message framing.

use super::chunked_decoder::ChunkedDecoder;
use super::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Decodes one message body, whatever its framing.
///
/// Besides the `Content-Length` and chunked framings a response may be delimited by
/// the peer closing the connection; such a body only ends through
/// [`decode_eof`](Decoder::decode_eof).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    UntilClose { finished: bool },
    NoBody,
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    pub fn until_close() -> Self {
        Self { kind: Kind::UntilClose { finished: false } }
    }

    pub fn from_size(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Length(0) | PayloadSize::Empty => Self::empty(),
            PayloadSize::Length(n) => Self::fix_length(n),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::UntilClose => Self::until_close(),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    pub fn is_until_close(&self) -> bool {
        matches!(self.kind, Kind::UntilClose { .. })
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
            Kind::UntilClose { finished: true } | Kind::NoBody => Ok(Some(PayloadItem::Eof)),
            Kind::UntilClose { finished: false } if src.is_empty() => Ok(None),
            Kind::UntilClose { finished: false } => Ok(Some(PayloadItem::Chunk(src.split().freeze()))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::UntilClose { finished } => {
                if src.is_empty() {
                    *finished = true;
                    Ok(Some(PayloadItem::Eof))
                } else {
                    Ok(Some(PayloadItem::Chunk(src.split().freeze())))
                }
            }
            _ => match self.decode(src)? {
                Some(item) => Ok(Some(item)),
                None => Err(ParseError::Incomplete),
            },
        }
    }
}

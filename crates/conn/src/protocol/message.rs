use bytes::{Buf, Bytes};

/// One step of a body on the wire.
///
/// The payload decoders yield these while a message body is parsed, and
/// [`ChunkedStream`](crate::stream::ChunkedStream) feeds them to the chunk
/// framer when a body of unknown length is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    Chunk(Data),
    /// End of body. For chunked framing this is the zero-size chunk.
    Eof,
}

/// How a body is framed.
///
/// On the receive side it comes from `Content-Length` / `Transfer-Encoding`,
/// on the send side from the body stream's known length. When parsing, a
/// response delimited by the peer closing the connection gets
/// [`PayloadDecoder::until_close`](crate::codec::PayloadDecoder::until_close)
/// straight from the parser.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// `Content-Length: n`, body bytes pass through untouched
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// No body bytes follow the head
    Empty,
    /// No framing header; the sender closes the connection after the body
    UntilClose,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }

    /// The number of body bytes still to send or read, when framing says so.
    #[inline]
    pub fn length(&self) -> Option<u64> {
        match self {
            PayloadSize::Length(n) => Some(*n),
            PayloadSize::Chunked | PayloadSize::Empty | PayloadSize::UntilClose => None,
        }
    }
}

impl<D: Buf> PayloadItem<D> {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}

impl PayloadItem {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

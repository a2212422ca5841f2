//! Pull-based byte streams used as message bodies.
//!
//! Every body that travels through a connection is a [`BodyStream`]: a closed set of
//! stream variants dispatched through the [`ByteStream`] capability trait. A stream is
//! a cursor over bytes whose total length may be unknown up front. Reading never
//! blocks: when nothing is available right now [`ByteStream::read_into`] returns `0`
//! and [`ByteStream::is_finished`] stays `false` until the source is really exhausted.
//!
//! # Variants
//!
//! - [`MemoryStream`]: growable in-memory bytes, seekable both ways
//! - [`BufferStream`]: bounded FIFO fed by writers, partial writes when full
//! - [`FileStream`]: a file on disk, seekable both ways, carries an identity tag
//! - [`ChunkedStream`]: wraps another stream in `Transfer-Encoding: chunked` framing
//! - [`MultipartStream`]: boundary delimited parts produced on demand
//! - [`StreamChain`]: several streams read back to back
//!
//! Generated streams (chunked, multipart, chain) only seek forward.
//!
//! Streams are uniquely owned. Wrapping a stream (for example in
//! [`BodyStream::chunked`]) consumes it, so the wrapped source is dropped exactly once,
//! together with its wrapper.

mod chain;
mod chunked;
mod file;
mod memory;
mod multipart;

pub use chain::StreamChain;
pub use chunked::ChunkedStream;
pub use file::FileStream;
pub use memory::{BufferStream, MemoryStream};
pub use multipart::{MultipartStream, Part};

use crate::protocol::StreamError;
use bytes::{Bytes, BytesMut};

/// How many bytes a stream can still deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Available {
    /// Exactly this many bytes can be read without waiting.
    Known(usize),
    /// The stream cannot tell in advance.
    Unknown,
}

impl Available {
    #[inline]
    pub fn known(self) -> Option<usize> {
        match self {
            Available::Known(n) => Some(n),
            Available::Unknown => None,
        }
    }
}

/// The read side of the stream contract.
pub trait ByteStream {
    /// Copies up to `buf.len()` bytes into `buf` and returns how many were copied.
    ///
    /// Returns `Ok(0)` when nothing is available right now; that is not end of
    /// stream unless [`is_finished`](Self::is_finished) also reports `true`.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Returns the next byte without consuming it, `None` when no byte is available.
    fn peek(&mut self) -> Result<Option<u8>, StreamError>;

    /// Moves the cursor by `offset` bytes.
    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError>;

    fn available(&self) -> Available;

    /// Once `true`, stays `true`.
    fn is_finished(&self) -> bool;
}

/// The write side of the stream contract.
///
/// Backpressure is expressed by accepting fewer bytes than offered.
pub trait WriteStream {
    fn write(&mut self, data: &[u8]) -> usize;
}

impl WriteStream for BytesMut {
    fn write(&mut self, data: &[u8]) -> usize {
        self.extend_from_slice(data);
        data.len()
    }
}

/// Closed set of body streams.
#[derive(Debug)]
pub enum BodyStream {
    Memory(MemoryStream),
    Buffer(BufferStream),
    File(FileStream),
    Chunked(Box<ChunkedStream>),
    Multipart(Box<MultipartStream>),
    Chain(StreamChain),
}

macro_rules! dispatch {
    ($self:expr, $stream:ident => $body:expr) => {
        match $self {
            BodyStream::Memory($stream) => $body,
            BodyStream::Buffer($stream) => $body,
            BodyStream::File($stream) => $body,
            BodyStream::Chunked($stream) => $body,
            BodyStream::Multipart($stream) => $body,
            BodyStream::Chain($stream) => $body,
        }
    };
}

impl BodyStream {
    /// Wraps this stream in chunked transfer framing.
    pub fn chunked(self) -> Self {
        BodyStream::Chunked(Box::new(ChunkedStream::new(self)))
    }

    /// The number of bytes left, when the stream has a fixed size.
    ///
    /// Such a body can be announced with `Content-Length`; the others go chunked.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            BodyStream::Memory(s) => Some(s.remaining().len() as u64),
            BodyStream::File(s) => Some(s.remaining_len()),
            BodyStream::Chain(s) => s.content_length(),
            BodyStream::Buffer(_) | BodyStream::Chunked(_) | BodyStream::Multipart(_) => None,
        }
    }

    /// Identity tag of the content, used for `ETag` and conditional requests.
    pub fn identity_tag(&self) -> Option<&str> {
        match self {
            BodyStream::Memory(s) => s.identity_tag(),
            BodyStream::File(s) => s.identity_tag(),
            BodyStream::Buffer(_) | BodyStream::Chunked(_) | BodyStream::Multipart(_) | BodyStream::Chain(_) => None,
        }
    }

    /// A fresh copy of the full content, only for in-memory bodies.
    pub fn replay(&self) -> Option<BodyStream> {
        match self {
            BodyStream::Memory(s) => Some(BodyStream::Memory(s.replay())),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BodyStream::Memory(_) => "memory",
            BodyStream::Buffer(_) => "buffer",
            BodyStream::File(_) => "file",
            BodyStream::Chunked(_) => "chunked",
            BodyStream::Multipart(_) => "multipart",
            BodyStream::Chain(_) => "chain",
        }
    }
}

impl ByteStream for BodyStream {
    #[inline]
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        dispatch!(self, s => s.read_into(buf))
    }

    #[inline]
    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        dispatch!(self, s => s.peek())
    }

    #[inline]
    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        dispatch!(self, s => s.seek_relative(offset))
    }

    #[inline]
    fn available(&self) -> Available {
        dispatch!(self, s => s.available())
    }

    #[inline]
    fn is_finished(&self) -> bool {
        dispatch!(self, s => s.is_finished())
    }
}

impl From<MemoryStream> for BodyStream {
    fn from(stream: MemoryStream) -> Self {
        BodyStream::Memory(stream)
    }
}

impl From<BufferStream> for BodyStream {
    fn from(stream: BufferStream) -> Self {
        BodyStream::Buffer(stream)
    }
}

impl From<FileStream> for BodyStream {
    fn from(stream: FileStream) -> Self {
        BodyStream::File(stream)
    }
}

impl From<MultipartStream> for BodyStream {
    fn from(stream: MultipartStream) -> Self {
        BodyStream::Multipart(Box::new(stream))
    }
}

impl From<StreamChain> for BodyStream {
    fn from(stream: StreamChain) -> Self {
        BodyStream::Chain(stream)
    }
}

impl From<&'static str> for BodyStream {
    fn from(value: &'static str) -> Self {
        BodyStream::Memory(MemoryStream::from(value.as_bytes()))
    }
}

impl From<String> for BodyStream {
    fn from(value: String) -> Self {
        BodyStream::Memory(MemoryStream::from(value.into_bytes()))
    }
}

impl From<Vec<u8>> for BodyStream {
    fn from(value: Vec<u8>) -> Self {
        BodyStream::Memory(MemoryStream::from(value))
    }
}

impl From<Bytes> for BodyStream {
    fn from(value: Bytes) -> Self {
        BodyStream::Memory(MemoryStream::from(&value[..]))
    }
}

/// Forward seek for streams that generate their output: read and discard.
pub(crate) fn skip_forward<S: ByteStream + ?Sized>(stream: &mut S, offset: i64) -> Result<(), StreamError> {
    let Ok(mut remaining) = u64::try_from(offset) else {
        return Err(StreamError::ForwardOnly { offset });
    };

    let mut sink = [0u8; 512];
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(sink.len(), |r| r.min(sink.len()));
        let n = stream.read_into(&mut sink[..want])?;
        if n == 0 {
            return Err(StreamError::OutOfRange { offset });
        }
        remaining -= n as u64;
    }
    Ok(())
}

/// Reads a stream until it stops producing, for tests and small bodies.
pub fn read_to_end<S: ByteStream + ?Sized>(stream: &mut S, buf_size: usize) -> Result<Vec<u8>, StreamError> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; buf_size.max(1)];
    loop {
        let n = stream.read_into(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
        if n == 0 {
            return Ok(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_only_for_fixed_size_streams() {
        assert_eq!(BodyStream::from("hello").content_length(), Some(5));
        assert_eq!(BodyStream::from(BufferStream::with_capacity(8)).content_length(), None);
        assert_eq!(BodyStream::from("hello").chunked().content_length(), None);
    }

    #[test]
    fn skip_forward_rejects_negative_offsets() {
        let mut stream = BodyStream::from("abc").chunked();
        assert!(matches!(stream.seek_relative(-1), Err(StreamError::ForwardOnly { offset: -1 })));
    }

    #[test]
    fn replay_only_for_memory() {
        let stream = BodyStream::from("abc");
        let mut copy = stream.replay().unwrap();
        assert_eq!(read_to_end(&mut copy, 2).unwrap(), b"abc");
        assert!(BodyStream::from(BufferStream::with_capacity(4)).replay().is_none());
    }
}

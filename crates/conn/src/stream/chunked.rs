use super::{Available, BodyStream, ByteStream, skip_forward};
use crate::codec::ChunkedEncoder;
use crate::protocol::{PayloadItem, StreamError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

/// Hex size digits plus the two CRLF of a chunk.
const CHUNK_OVERHEAD: usize = 20;
const MAX_CHUNK_SIZE: usize = 16 * 1024;

/// Wraps a source stream in chunked transfer framing.
///
/// Every call to [`read_into`](ByteStream::read_into) frames at most one chunk of
/// the source. Once the source finishes the terminal `0\r\n\r\n` is emitted. Framed
/// bytes that do not fit the caller's buffer are staged and handed out first on the
/// next read.
#[derive(Debug)]
pub struct ChunkedStream {
    source: BodyStream,
    encoder: ChunkedEncoder,
    pending: BytesMut,
    scratch: Vec<u8>,
}

impl ChunkedStream {
    pub fn new(source: BodyStream) -> Self {
        Self { source, encoder: ChunkedEncoder::new(), pending: BytesMut::new(), scratch: Vec::new() }
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        n
    }

    /// Frames the next chunk of the source into `pending`.
    fn produce(&mut self, room: usize) -> Result<(), StreamError> {
        if self.encoder.is_finish() {
            return Ok(());
        }

        let want = room.saturating_sub(CHUNK_OVERHEAD).clamp(1, MAX_CHUNK_SIZE);
        self.scratch.resize(want, 0);
        let n = self.source.read_into(&mut self.scratch[..want])?;

        // the chunked encoder only fails when formatting into memory fails
        let framed = if n > 0 {
            self.encoder.encode(PayloadItem::Chunk(&self.scratch[..n]), &mut self.pending)
        } else if self.source.is_finished() {
            self.encoder.encode(PayloadItem::<&[u8]>::Eof, &mut self.pending)
        } else {
            Ok(())
        };
        framed.map_err(|e| StreamError::Io { source: std::io::Error::other(e) })
    }
}

impl ByteStream for ChunkedStream {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut written = self.drain_pending(buf);
        if written == buf.len() || !self.pending.is_empty() {
            return Ok(written);
        }

        self.produce(buf.len() - written)?;
        written += self.drain_pending(&mut buf[written..]);
        Ok(written)
    }

    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        if self.pending.is_empty() {
            self.produce(MAX_CHUNK_SIZE)?;
        }
        Ok(self.pending.first().copied())
    }

    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        skip_forward(self, offset)
    }

    fn available(&self) -> Available {
        if self.encoder.is_finish() { Available::Known(self.pending.len()) } else { Available::Unknown }
    }

    fn is_finished(&self) -> bool {
        self.encoder.is_finish() && self.pending.is_empty()
    }
}

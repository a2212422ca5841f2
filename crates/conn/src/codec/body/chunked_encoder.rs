use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BytesMut};
use std::io::Write;

use tokio_util::codec::Encoder;

/// Frames payload items as `Transfer-Encoding: chunked`.
///
/// Each chunk is written as `{size:X}\r\n{data}\r\n`; the terminal item writes
/// `0\r\n\r\n` and any later item is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    eof: bool,
    send_size: usize,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false, send_size: 0 }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }

    /// Payload bytes framed so far, excluding chunk headers.
    pub fn send_size(&self) -> usize {
        self.send_size
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(mut bytes) => {
                let size = bytes.remaining();
                if size == 0 {
                    // a zero sized chunk would terminate the body
                    return Ok(());
                }
                write!(helper::Writer(dst), "{size:X}\r\n")?;
                dst.reserve(size + 2);
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let len = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(len);
                }
                dst.extend_from_slice(b"\r\n");
                self.send_size += size;
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::io;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl io::Write for Writer<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_chunks_with_hex_size() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(&b"hello world, hello world"[..]), &mut dst).unwrap();
        assert_eq!(&dst[..], b"18\r\nhello world, hello world\r\n");
        assert_eq!(encoder.send_size(), 24);
    }

    #[test]
    fn eof_is_terminal() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::<&[u8]>::Eof, &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(&b"late"[..]), &mut dst).unwrap();
        assert!(encoder.is_finish());
        assert_eq!(&dst[..], b"0\r\n\r\n");
    }

    #[test]
    fn skips_empty_chunks() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(&b""[..]), &mut dst).unwrap();
        assert!(dst.is_empty());
        assert!(!encoder.is_finish());
    }
}

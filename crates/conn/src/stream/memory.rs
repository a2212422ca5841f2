use super::{Available, ByteStream, WriteStream};
use crate::protocol::StreamError;
use bytes::{Buf, BytesMut};

/// Growable in-memory bytes with a cursor that moves both ways.
#[derive(Debug, Default)]
pub struct MemoryStream {
    data: BytesMut,
    pos: usize,
    tag: Option<String>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an explicit identity tag, emitted as the `ETag` of a response.
    pub fn with_identity_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn identity_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The whole content, independent of the cursor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The bytes after the cursor.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn replay(&self) -> Self {
        Self { data: self.data.clone(), pos: 0, tag: self.tag.clone() }
    }
}

impl From<&[u8]> for MemoryStream {
    fn from(value: &[u8]) -> Self {
        Self { data: BytesMut::from(value), pos: 0, tag: None }
    }
}

impl From<Vec<u8>> for MemoryStream {
    fn from(value: Vec<u8>) -> Self {
        Self { data: BytesMut::from(&value[..]), pos: 0, tag: None }
    }
}

impl ByteStream for MemoryStream {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let remaining = self.remaining();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        Ok(self.data.get(self.pos).copied())
    }

    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        let target = i64::try_from(self.pos).ok().and_then(|pos| pos.checked_add(offset));
        match target.and_then(|t| usize::try_from(t).ok()) {
            Some(t) if t <= self.data.len() => {
                self.pos = t;
                Ok(())
            }
            _ => Err(StreamError::OutOfRange { offset }),
        }
    }

    fn available(&self) -> Available {
        Available::Known(self.data.len() - self.pos)
    }

    fn is_finished(&self) -> bool {
        self.pos >= self.data.len()
    }
}

impl WriteStream for MemoryStream {
    fn write(&mut self, data: &[u8]) -> usize {
        self.data.extend_from_slice(data);
        data.len()
    }
}

/// A bounded FIFO: writers push, the connection pulls.
///
/// A write accepts only what fits. The stream finishes once it has been closed
/// and drained.
#[derive(Debug)]
pub struct BufferStream {
    data: BytesMut,
    capacity: usize,
    closed: bool,
}

impl BufferStream {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: BytesMut::with_capacity(capacity), capacity, closed: false }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free room for the next write.
    pub fn space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// No more writes will come.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ByteStream for BufferStream {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let n = self.data.len().min(buf.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        Ok(n)
    }

    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        Ok(self.data.first().copied())
    }

    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        let Ok(skip) = usize::try_from(offset) else {
            return Err(StreamError::ForwardOnly { offset });
        };
        if skip > self.data.len() {
            return Err(StreamError::OutOfRange { offset });
        }
        self.data.advance(skip);
        Ok(())
    }

    fn available(&self) -> Available {
        Available::Known(self.data.len())
    }

    fn is_finished(&self) -> bool {
        self.closed && self.data.is_empty()
    }
}

impl WriteStream for BufferStream {
    fn write(&mut self, data: &[u8]) -> usize {
        if self.closed {
            return 0;
        }
        let n = self.space().min(data.len());
        self.data.extend_from_slice(&data[..n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_read_and_seek_back() {
        let mut stream = MemoryStream::from(&b"hello world"[..]);
        let mut buf = [0u8; 5];

        assert_eq!(stream.read_into(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(stream.available(), Available::Known(6));

        stream.seek_relative(-5).unwrap();
        assert_eq!(stream.peek().unwrap(), Some(b'h'));

        assert!(matches!(stream.seek_relative(100), Err(StreamError::OutOfRange { offset: 100 })));
        assert!(matches!(stream.seek_relative(-1), Err(StreamError::OutOfRange { .. })));
    }

    #[test]
    fn memory_finishes_at_end() {
        let mut stream = MemoryStream::from(&b"ab"[..]);
        let mut buf = [0u8; 8];
        assert!(!stream.is_finished());
        assert_eq!(stream.read_into(&mut buf).unwrap(), 2);
        assert!(stream.is_finished());
        assert_eq!(stream.read_into(&mut buf).unwrap(), 0);
        assert_eq!(stream.peek().unwrap(), None);
    }

    #[test]
    fn memory_grows_on_write() {
        let mut stream = MemoryStream::new();
        assert_eq!(stream.write(b"abc"), 3);
        assert_eq!(stream.write(b"def"), 3);
        assert_eq!(stream.as_bytes(), b"abcdef");
    }

    #[test]
    fn buffer_accepts_partial_writes() {
        let mut stream = BufferStream::with_capacity(4);
        assert_eq!(stream.write(b"abcdef"), 4);
        assert_eq!(stream.write(b"x"), 0);

        let mut buf = [0u8; 2];
        assert_eq!(stream.read_into(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(stream.write(b"xyz"), 2);
        assert_eq!(stream.available(), Available::Known(4));
    }

    #[test]
    fn buffer_finishes_only_after_close_and_drain() {
        let mut stream = BufferStream::with_capacity(4);
        stream.write(b"ab");
        let mut buf = [0u8; 4];
        assert_eq!(stream.read_into(&mut buf).unwrap(), 2);
        assert!(!stream.is_finished());

        stream.close();
        assert!(stream.is_finished());
        assert_eq!(stream.write(b"late"), 0);
    }

    #[test]
    fn buffer_seeks_forward_only() {
        let mut stream = BufferStream::with_capacity(8);
        stream.write(b"abcdef");
        stream.seek_relative(2).unwrap();
        assert_eq!(stream.peek().unwrap(), Some(b'c'));
        assert!(matches!(stream.seek_relative(-1), Err(StreamError::ForwardOnly { .. })));
        assert!(matches!(stream.seek_relative(10), Err(StreamError::OutOfRange { .. })));
    }
}

use super::{Available, BodyStream, ByteStream, skip_forward};
use crate::protocol::StreamError;
use std::collections::VecDeque;
use tracing::trace;

/// Several streams read back to back. A drained stream is dropped right away.
#[derive(Debug, Default)]
pub struct StreamChain {
    streams: VecDeque<BodyStream>,
}

impl StreamChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stream: impl Into<BodyStream>) -> &mut Self {
        self.streams.push_back(stream.into());
        self
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub(crate) fn content_length(&self) -> Option<u64> {
        self.streams.iter().map(BodyStream::content_length).sum()
    }

    fn drop_finished(&mut self) {
        while self.streams.front().is_some_and(ByteStream::is_finished) {
            if let Some(stream) = self.streams.pop_front() {
                trace!(kind = stream.kind(), "chained stream drained");
            }
        }
    }
}

impl ByteStream for StreamChain {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut written = 0;
        loop {
            self.drop_finished();
            let Some(front) = self.streams.front_mut() else {
                return Ok(written);
            };
            if written == buf.len() {
                return Ok(written);
            }

            let n = front.read_into(&mut buf[written..])?;
            written += n;
            if n == 0 && !front.is_finished() {
                return Ok(written);
            }
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        self.drop_finished();
        match self.streams.front_mut() {
            Some(front) => front.peek(),
            None => Ok(None),
        }
    }

    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        skip_forward(self, offset)
    }

    fn available(&self) -> Available {
        self.streams
            .iter()
            .map(|s| s.available().known())
            .sum::<Option<usize>>()
            .map_or(Available::Unknown, Available::Known)
    }

    fn is_finished(&self) -> bool {
        self.streams.iter().all(ByteStream::is_finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BufferStream, WriteStream, read_to_end};

    #[test]
    fn reads_streams_in_order() {
        let mut chain = StreamChain::new();
        chain.push("hello ").push("chained ").push("world");
        assert_eq!(chain.content_length(), Some(19));
        assert_eq!(chain.available(), Available::Known(19));

        let out = read_to_end(&mut chain, 4).unwrap();
        assert_eq!(out, b"hello chained world");
        assert!(chain.is_finished());
        assert!(chain.is_empty());
    }

    #[test]
    fn stops_at_open_buffer() {
        let mut buffer = BufferStream::with_capacity(8);
        buffer.write(b"mid");
        let mut chain = StreamChain::new();
        chain.push("a").push(buffer).push("z");
        assert_eq!(chain.content_length(), None);

        let mut buf = [0u8; 16];
        let n = chain.read_into(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"amid");
        assert!(!chain.is_finished());
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn seeks_forward_across_streams() {
        let mut chain = StreamChain::new();
        chain.push("ab").push("cd");
        chain.seek_relative(3).unwrap();
        assert_eq!(chain.peek().unwrap(), Some(b'd'));
        assert!(matches!(chain.seek_relative(-1), Err(StreamError::ForwardOnly { .. })));
    }
}

use super::{Available, BodyStream, ByteStream, skip_forward};
use crate::protocol::{HeaderNameRef, HeaderTable, KnownHeader, StreamError};
use bytes::{Buf, BytesMut};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fmt;
use tracing::trace;

const BOUNDARY_LEN: usize = 32;

/// One part of a multipart body: its own headers and a body stream.
#[derive(Debug)]
pub struct Part {
    headers: HeaderTable,
    body: BodyStream,
}

impl Part {
    pub fn new(body: impl Into<BodyStream>) -> Self {
        Self { headers: HeaderTable::new(), body: body.into() }
    }

    /// A plain form field.
    pub fn field(name: &str, value: impl Into<BodyStream>) -> Self {
        Self::new(value).header(KnownHeader::ContentDisposition, format!("form-data; name=\"{name}\""))
    }

    /// An uploaded file.
    pub fn file(name: &str, filename: &str, content_type: &mime::Mime, body: impl Into<BodyStream>) -> Self {
        Self::new(body)
            .header(KnownHeader::ContentDisposition, format!("form-data; name=\"{name}\"; filename=\"{filename}\""))
            .header(KnownHeader::ContentType, content_type.as_ref())
    }

    pub fn header<N: HeaderNameRef>(mut self, name: N, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NextPart,
    Body,
    Closed,
}

type PartProducer = Box<dyn FnMut() -> Option<Part> + Send>;

/// A multipart body whose parts are pulled from a producer as the body is read.
///
/// Each part is written as `--{boundary}\r\n`, its headers, a blank line, its body
/// and a trailing `\r\n`. After the producer runs dry the closing delimiter
/// `--{boundary}--\r\n` ends the stream. A part's body stream is dropped as soon as
/// it has been fully read.
pub struct MultipartStream {
    producer: PartProducer,
    subtype: String,
    boundary: Option<String>,
    current: Option<BodyStream>,
    pending: BytesMut,
    state: State,
}

impl MultipartStream {
    pub fn new<F>(producer: F) -> Self
    where
        F: FnMut() -> Option<Part> + Send + 'static,
    {
        Self {
            producer: Box::new(producer),
            subtype: "form-data".to_owned(),
            boundary: None,
            current: None,
            pending: BytesMut::new(),
            state: State::NextPart,
        }
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        let mut parts = parts.into_iter();
        Self::new(move || parts.next())
    }

    /// Replaces the `form-data` subtype, for example with `mixed`.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = subtype.into();
        self
    }

    /// Uses a fixed boundary instead of a random one.
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// The boundary, generated on first use.
    pub fn boundary(&mut self) -> &str {
        self.boundary.get_or_insert_with(|| {
            rand::thread_rng().sample_iter(&Alphanumeric).take(BOUNDARY_LEN).map(char::from).collect()
        })
    }

    /// The `Content-Type` value announcing this body.
    pub fn content_type(&mut self) -> String {
        let subtype = self.subtype.clone();
        format!("multipart/{subtype}; boundary={}", self.boundary())
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        n
    }

    /// Moves past part boundaries, staging delimiters and part headers.
    fn step(&mut self) {
        match self.state {
            State::NextPart => {
                let boundary = self.boundary().to_owned();
                match (self.producer)() {
                    Some(part) => {
                        self.pending.extend_from_slice(b"--");
                        self.pending.extend_from_slice(boundary.as_bytes());
                        self.pending.extend_from_slice(b"\r\n");
                        for (name, value) in part.headers.lines() {
                            self.pending.extend_from_slice(name.as_bytes());
                            self.pending.extend_from_slice(b": ");
                            self.pending.extend_from_slice(value.as_bytes());
                            self.pending.extend_from_slice(b"\r\n");
                        }
                        self.pending.extend_from_slice(b"\r\n");
                        self.current = Some(part.body);
                        self.state = State::Body;
                    }
                    None => {
                        self.pending.extend_from_slice(b"--");
                        self.pending.extend_from_slice(boundary.as_bytes());
                        self.pending.extend_from_slice(b"--\r\n");
                        self.state = State::Closed;
                        trace!(boundary, "multipart body closed");
                    }
                }
            }
            State::Body => {
                if self.current.as_ref().is_none_or(ByteStream::is_finished) {
                    self.current = None;
                    self.pending.extend_from_slice(b"\r\n");
                    self.state = State::NextPart;
                }
            }
            State::Closed => {}
        }
    }
}

impl ByteStream for MultipartStream {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut written = 0;
        loop {
            written += self.drain_pending(&mut buf[written..]);
            if written == buf.len() {
                return Ok(written);
            }

            match self.state {
                State::Closed => return Ok(written),
                State::NextPart => self.step(),
                State::Body => {
                    let Some(body) = self.current.as_mut() else {
                        self.step();
                        continue;
                    };
                    let n = body.read_into(&mut buf[written..])?;
                    written += n;
                    if body.is_finished() {
                        self.step();
                    } else if n == 0 {
                        return Ok(written);
                    }
                }
            }
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        loop {
            if let Some(byte) = self.pending.first() {
                return Ok(Some(*byte));
            }
            match self.state {
                State::Closed => return Ok(None),
                State::NextPart => self.step(),
                State::Body => match self.current.as_mut() {
                    Some(body) if !body.is_finished() => return body.peek(),
                    _ => self.step(),
                },
            }
        }
    }

    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        skip_forward(self, offset)
    }

    fn available(&self) -> Available {
        match self.state {
            State::Closed => Available::Known(self.pending.len()),
            State::NextPart | State::Body => Available::Unknown,
        }
    }

    fn is_finished(&self) -> bool {
        self.state == State::Closed && self.pending.is_empty()
    }
}

impl fmt::Debug for MultipartStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartStream")
            .field("subtype", &self.subtype)
            .field("boundary", &self.boundary)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;
    use indoc::indoc;

    #[test]
    fn writes_parts_between_boundaries() {
        let mut stream = MultipartStream::from_parts(vec![Part::field("a", "1"), Part::field("b", "two")])
            .with_boundary("XyZ");

        assert_eq!(stream.content_type(), "multipart/form-data; boundary=XyZ");

        let out = read_to_end(&mut stream, 7).unwrap();
        let expected = indoc! {r#"
            --XyZ
            Content-Disposition: form-data; name="a"

            1
            --XyZ
            Content-Disposition: form-data; name="b"

            two
            --XyZ--
            "#}
        .replace('\n', "\r\n");
        assert_eq!(String::from_utf8(out).unwrap(), expected);
        assert!(stream.is_finished());
    }

    #[test]
    fn empty_producer_only_closes() {
        let mut stream = MultipartStream::new(|| None).with_boundary("b");
        assert_eq!(read_to_end(&mut stream, 64).unwrap(), b"--b--\r\n");
    }

    #[test]
    fn generated_boundary_is_stable() {
        let mut stream = MultipartStream::new(|| None).with_subtype("mixed");
        let first = stream.boundary().to_owned();
        assert_eq!(first.len(), BOUNDARY_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(stream.boundary(), first);
        assert!(stream.content_type().starts_with("multipart/mixed; boundary="));
    }

    #[test]
    fn peek_sees_delimiter_first() {
        let mut stream = MultipartStream::from_parts(vec![Part::field("a", "1")]).with_boundary("q");
        assert_eq!(stream.peek().unwrap(), Some(b'-'));
        assert!(read_to_end(&mut stream, 64).unwrap().starts_with(b"--q\r\n"));
    }
}

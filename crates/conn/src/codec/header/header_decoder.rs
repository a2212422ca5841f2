//! Start line and header section decoding on top of `httparse`.
//!
//! The decoder does not build a message value. It reports the start line and every
//! header through [`ParserEvents`] and returns what the caller needs to frame the
//! body that follows: the head length and the [`PayloadSize`] announced by
//! `Content-Length` / `Transfer-Encoding`.
//!
//! # Limits
//!
//! - at most [`MAX_HEADER_NUM`] headers, lowered further by the configured limit
//! - at most the configured number of head bytes, [`MAX_HEADER_BYTES`] by default
//! - only HTTP/1.0 and HTTP/1.1

use bytes::BytesMut;
use http::{StatusCode, Version};
use httparse::{Error, Status};
use tracing::trace;

use crate::codec::{ParserEvents, StartLine};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize};

/// Maximum number of headers a message may carry.
pub const MAX_HEADER_NUM: usize = 64;

/// Default upper bound for the whole head section.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Which side of the exchange the bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// What the caller learns from a complete head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHead {
    /// Bytes taken by the start line, headers and the blank line.
    pub len: usize,
    /// Framing announced by the headers. `None` for a response that runs until close.
    pub payload: Option<PayloadSize>,
}

#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    kind: MessageKind,
    max_header_bytes: usize,
    max_headers: usize,
}

impl HeaderDecoder {
    pub fn new(kind: MessageKind, max_header_bytes: usize, max_headers: usize) -> Self {
        Self { kind, max_header_bytes, max_headers: max_headers.min(MAX_HEADER_NUM) }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Decodes a head from the start of `src` without consuming it.
    ///
    /// Returns `Ok(None)` when the head is not complete yet.
    pub fn decode<E: ParserEvents + ?Sized>(&self, src: &BytesMut, events: &mut E) -> Result<Option<DecodedHead>, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];

        match self.kind {
            MessageKind::Request => {
                let mut req = httparse::Request::new(&mut headers);
                let status = req.parse(src).map_err(|e| self.map_error(e))?;
                let Status::Complete(len) = status else {
                    return self.partial(src);
                };
                self.check_size(len, req.headers.len())?;

                let version = parse_version(req.version)?;
                let method = req.method.ok_or(ParseError::InvalidMethod)?;
                let path = req.path.ok_or(ParseError::InvalidUri)?;

                events.on_message_begin(&StartLine::Request { method, version })?;
                events.on_path(path.as_bytes())?;
                let framing = report_headers(req.headers, events)?;

                let payload = framing.request_payload()?;
                trace!(len, ?payload, "decoded request head");
                Ok(Some(DecodedHead { len, payload: Some(payload) }))
            }
            MessageKind::Response => {
                let mut res = httparse::Response::new(&mut headers);
                let status = res.parse(src).map_err(|e| self.map_error(e))?;
                let Status::Complete(len) = status else {
                    return self.partial(src);
                };
                self.check_size(len, res.headers.len())?;

                let version = parse_version(res.version)?;
                let code = res.code.ok_or(ParseError::InvalidStatus(None))?;
                let status = StatusCode::from_u16(code).map_err(|_| ParseError::InvalidStatus(Some(code)))?;

                events.on_message_begin(&StartLine::Response { status, reason: res.reason.unwrap_or_default(), version })?;
                let framing = report_headers(res.headers, events)?;

                let payload = if status.is_informational()
                    || status == StatusCode::NO_CONTENT
                    || status == StatusCode::NOT_MODIFIED
                {
                    Some(PayloadSize::Empty)
                } else {
                    framing.response_payload()?
                };
                trace!(len, status = code, ?payload, "decoded response head");
                Ok(Some(DecodedHead { len, payload }))
            }
        }
    }

    fn map_error(&self, e: Error) -> ParseError {
        match e {
            Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            Error::Version => ParseError::InvalidVersion(None),
            Error::Status => ParseError::InvalidStatus(None),
            Error::Token => ParseError::InvalidMethod,
            e => ParseError::invalid_header(e.to_string()),
        }
    }

    fn partial(&self, src: &BytesMut) -> Result<Option<DecodedHead>, ParseError> {
        ensure!(src.len() <= self.max_header_bytes, ParseError::too_large_header(src.len(), self.max_header_bytes));
        Ok(None)
    }

    fn check_size(&self, len: usize, header_count: usize) -> Result<(), ParseError> {
        ensure!(len <= self.max_header_bytes, ParseError::too_large_header(len, self.max_header_bytes));
        ensure!(header_count <= self.max_headers, ParseError::too_many_headers(self.max_headers));
        Ok(())
    }
}

fn parse_version(version: Option<u8>) -> Result<Version, ParseError> {
    match version {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        // HTTP/2 and HTTP/3 are not spoken here
        _ => Err(ParseError::InvalidVersion(version)),
    }
}

/// Framing headers seen while reporting the header section.
#[derive(Debug, Default)]
struct Framing {
    content_length: Option<u64>,
    transfer_encoding: Option<bool>,
}

impl Framing {
    fn request_payload(&self) -> Result<PayloadSize, ParseError> {
        // refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length
        match (self.transfer_encoding, self.content_length) {
            (Some(_), Some(_)) => {
                Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
            }
            (Some(true), None) => Ok(PayloadSize::Chunked),
            (Some(false), None) => Err(ParseError::invalid_body("transfer-encoding without chunked as final coding")),
            (None, Some(0) | None) => Ok(PayloadSize::Empty),
            (None, Some(n)) => Ok(PayloadSize::Length(n)),
        }
    }

    fn response_payload(&self) -> Result<Option<PayloadSize>, ParseError> {
        match (self.transfer_encoding, self.content_length) {
            (Some(_), Some(_)) => {
                Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
            }
            (Some(true), None) => Ok(Some(PayloadSize::Chunked)),
            (Some(false), None) | (None, None) => Ok(None),
            (None, Some(0)) => Ok(Some(PayloadSize::Empty)),
            (None, Some(n)) => Ok(Some(PayloadSize::Length(n))),
        }
    }
}

fn report_headers<E: ParserEvents + ?Sized>(headers: &[httparse::Header<'_>], events: &mut E) -> Result<Framing, ParseError> {
    let mut framing = Framing::default();

    for header in headers {
        if header.name.eq_ignore_ascii_case("content-length") {
            let length = parse_content_length(header.value)?;
            if framing.content_length.is_some_and(|existing| existing != length) {
                return Err(ParseError::invalid_content_length("conflicting content-length values"));
            }
            framing.content_length = Some(length);
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            framing.transfer_encoding = Some(is_chunked(header.value));
        }

        events.on_header_field(header.name.as_bytes())?;
        events.on_header_value(header.value)?;
    }
    Ok(framing)
}

fn parse_content_length(value: &[u8]) -> Result<u64, ParseError> {
    let text = std::str::from_utf8(value).map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
    text.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {text} is not u64")))
}

/// Chunked must be the final coding of `Transfer-Encoding`.
fn is_chunked(value: &[u8]) -> bool {
    value.rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HeadersVerdict;
    use indoc::indoc;

    #[derive(Default)]
    struct Recorder {
        start: Option<String>,
        path: Option<String>,
        headers: Vec<(String, String)>,
        field: Option<String>,
    }

    impl ParserEvents for Recorder {
        fn on_message_begin(&mut self, start: &StartLine<'_>) -> Result<(), ParseError> {
            self.start = Some(format!("{start:?}"));
            Ok(())
        }

        fn on_path(&mut self, path: &[u8]) -> Result<(), ParseError> {
            self.path = Some(String::from_utf8_lossy(path).into_owned());
            Ok(())
        }

        fn on_header_field(&mut self, name: &[u8]) -> Result<(), ParseError> {
            self.field = Some(String::from_utf8_lossy(name).into_owned());
            Ok(())
        }

        fn on_header_value(&mut self, value: &[u8]) -> Result<(), ParseError> {
            let name = self.field.take().unwrap_or_default();
            self.headers.push((name, String::from_utf8_lossy(value).into_owned()));
            Ok(())
        }

        fn on_headers_complete(&mut self) -> HeadersVerdict {
            HeadersVerdict::Continue
        }

        fn on_body(&mut self, _chunk: &[u8]) {}

        fn on_message_complete(&mut self) {}

        fn on_error(&mut self, _error: &ParseError) {}
    }

    fn request_decoder() -> HeaderDecoder {
        HeaderDecoder::new(MessageKind::Request, MAX_HEADER_BYTES, MAX_HEADER_NUM)
    }

    #[test]
    fn check_is_chunked() {
        assert!(is_chunked(b"gzip, chunked"));
        assert!(is_chunked(b"Chunked"));
        assert!(!is_chunked(b"chunked, gzip"));
        assert!(!is_chunked(b"gzip"));
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let buf = BytesMut::from(str);
        let mut recorder = Recorder::default();
        let head = request_decoder().decode(&buf, &mut recorder).unwrap().unwrap();

        assert_eq!(head.len, str.len() - 3);
        assert_eq!(head.payload, Some(PayloadSize::Empty));
        assert_eq!(recorder.path.as_deref(), Some("/index.html"));
        assert!(recorder.start.unwrap().contains("GET"));
        assert_eq!(recorder.headers.len(), 3);
        assert_eq!(recorder.headers[1], ("User-Agent".to_owned(), "curl/7.79.1".to_owned()));
    }

    #[test]
    fn partial_head_needs_more() {
        let buf = BytesMut::from("GET / HTTP/1.1\r\nHost: a\r\n");
        assert!(request_decoder().decode(&buf, &mut Recorder::default()).unwrap().is_none());
    }

    #[test]
    fn oversized_head_is_rejected() {
        let decoder = HeaderDecoder::new(MessageKind::Request, 32, MAX_HEADER_NUM);
        let buf = BytesMut::from("GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        assert!(matches!(decoder.decode(&buf, &mut Recorder::default()), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn too_many_headers_is_rejected() {
        let decoder = HeaderDecoder::new(MessageKind::Request, MAX_HEADER_BYTES, 2);
        let buf = BytesMut::from("GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n");
        assert!(matches!(decoder.decode(&buf, &mut Recorder::default()), Err(ParseError::TooManyHeaders { max_num: 2 })));
    }

    #[test]
    fn request_framing() {
        let chunked = BytesMut::from("POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n");
        let head = request_decoder().decode(&chunked, &mut Recorder::default()).unwrap().unwrap();
        assert_eq!(head.payload, Some(PayloadSize::Chunked));

        let both = BytesMut::from("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n");
        assert!(matches!(
            request_decoder().decode(&both, &mut Recorder::default()),
            Err(ParseError::InvalidContentLength { .. })
        ));

        let bad = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n");
        assert!(request_decoder().decode(&bad, &mut Recorder::default()).is_err());
    }

    #[test]
    fn response_framing() {
        let decoder = HeaderDecoder::new(MessageKind::Response, MAX_HEADER_BYTES, MAX_HEADER_NUM);

        let close_delimited = BytesMut::from("HTTP/1.1 200 OK\r\nServer: x\r\n\r\n");
        let head = decoder.decode(&close_delimited, &mut Recorder::default()).unwrap().unwrap();
        assert_eq!(head.payload, None);

        let not_modified = BytesMut::from("HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n");
        let head = decoder.decode(&not_modified, &mut Recorder::default()).unwrap().unwrap();
        assert_eq!(head.payload, Some(PayloadSize::Empty));

        let sized = BytesMut::from("HTTP/1.0 200 OK\r\nContent-Length: 10\r\n\r\n");
        let mut recorder = Recorder::default();
        let head = decoder.decode(&sized, &mut recorder).unwrap().unwrap();
        assert_eq!(head.payload, Some(PayloadSize::Length(10)));
        assert!(recorder.start.unwrap().contains("HTTP/1.0"));
    }
}

//! Incremental HTTP/1.1 parser driving [`ParserEvents`] callbacks.
//!
//! [`WireParser`] buffers whatever the transport delivers and turns it into a
//! sequence of callbacks per message:
//!
//! ```text
//! on_message_begin -> on_path (requests) -> (on_header_field, on_header_value)*
//!   -> on_headers_complete -> on_body* -> on_message_complete
//! ```
//!
//! Several pipelined messages in one buffer produce several callback sequences in
//! order. The handler steers the parser through the [`HeadersVerdict`] it returns
//! and through [`ParserEvents::is_paused`], which is checked before every step; a
//! paused parser keeps its bytes until [`WireParser::parse`] is called again.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderDecoder, MessageKind};
use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use http::{StatusCode, Version};
use tokio_util::codec::Decoder;
use tracing::{error, trace};

/// The start line of an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartLine<'a> {
    Request { method: &'a str, version: Version },
    Response { status: StatusCode, reason: &'a str, version: Version },
}

impl StartLine<'_> {
    pub fn version(&self) -> Version {
        match self {
            StartLine::Request { version, .. } | StartLine::Response { version, .. } => *version,
        }
    }
}

/// How the parser continues after a message head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersVerdict {
    /// Read the body as framed by the headers.
    Continue,
    /// The message has no body whatever the headers say.
    NoBody,
    /// No body, and no further HTTP message follows on this connection.
    NoBodyNoMore,
}

/// Callbacks of the parser contract.
pub trait ParserEvents {
    fn on_message_begin(&mut self, start: &StartLine<'_>) -> Result<(), ParseError>;

    /// The request target, only called for requests.
    fn on_path(&mut self, _path: &[u8]) -> Result<(), ParseError> {
        Ok(())
    }

    fn on_header_field(&mut self, name: &[u8]) -> Result<(), ParseError>;

    fn on_header_value(&mut self, value: &[u8]) -> Result<(), ParseError>;

    fn on_headers_complete(&mut self) -> HeadersVerdict;

    fn on_body(&mut self, chunk: &[u8]);

    fn on_message_complete(&mut self);

    fn on_error(&mut self, error: &ParseError);

    fn is_paused(&self) -> bool {
        false
    }
}

#[derive(Debug)]
enum State {
    Head,
    Body { decoder: PayloadDecoder, last: bool },
    /// No more HTTP messages; remaining bytes belong to whoever takes them.
    Stopped,
    Failed,
}

/// Incremental parser for one direction of a connection.
#[derive(Debug)]
pub struct WireParser {
    head: HeaderDecoder,
    buf: BytesMut,
    state: State,
}

impl WireParser {
    pub fn new(kind: MessageKind, max_header_bytes: usize, max_headers: usize) -> Self {
        Self { head: HeaderDecoder::new(kind, max_header_bytes, max_headers), buf: BytesMut::new(), state: State::Head }
    }

    pub fn requests(max_header_bytes: usize, max_headers: usize) -> Self {
        Self::new(MessageKind::Request, max_header_bytes, max_headers)
    }

    pub fn responses(max_header_bytes: usize, max_headers: usize) -> Self {
        Self::new(MessageKind::Response, max_header_bytes, max_headers)
    }

    /// Buffers bytes without parsing them.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffers `data` and parses as far as possible.
    pub fn feed<E: ParserEvents + ?Sized>(&mut self, data: &[u8], events: &mut E) -> Result<(), ParseError> {
        self.push(data);
        self.parse(events)
    }

    /// Parses the buffered bytes until more input is needed, the handler pauses, or
    /// the parser stops.
    pub fn parse<E: ParserEvents + ?Sized>(&mut self, events: &mut E) -> Result<(), ParseError> {
        loop {
            if events.is_paused() {
                return Ok(());
            }

            match &mut self.state {
                State::Stopped | State::Failed => return Ok(()),
                State::Head => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let head = match self.head.decode(&self.buf, events) {
                        Ok(Some(head)) => head,
                        Ok(None) => return Ok(()),
                        Err(e) => return Err(self.fail(events, e)),
                    };
                    self.buf.advance(head.len);

                    let (decoder, last) = match events.on_headers_complete() {
                        HeadersVerdict::Continue => {
                            let decoder = head.payload.map_or_else(PayloadDecoder::until_close, PayloadDecoder::from_size);
                            (decoder, false)
                        }
                        HeadersVerdict::NoBody => (PayloadDecoder::empty(), false),
                        HeadersVerdict::NoBodyNoMore => (PayloadDecoder::empty(), true),
                    };
                    trace!(?decoder, last, "start message body");
                    self.state = State::Body { decoder, last };
                }
                State::Body { decoder, last } => match decoder.decode(&mut self.buf) {
                    Ok(Some(PayloadItem::Chunk(bytes))) => events.on_body(&bytes),
                    Ok(Some(PayloadItem::Eof)) => {
                        self.state = if *last { State::Stopped } else { State::Head };
                        events.on_message_complete();
                    }
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(self.fail(events, e)),
                },
            }
        }
    }

    /// The peer closed its side: completes a body running until close, or reports
    /// a message cut short.
    pub fn finish<E: ParserEvents + ?Sized>(&mut self, events: &mut E) -> Result<(), ParseError> {
        loop {
            match &mut self.state {
                State::Stopped | State::Failed => return Ok(()),
                State::Head if self.buf.is_empty() => {
                    self.state = State::Stopped;
                    return Ok(());
                }
                State::Head => {
                    // a complete head may still be waiting behind a pause
                    let before = self.buf.len();
                    self.parse(events)?;
                    if events.is_paused() {
                        return Ok(());
                    }
                    if matches!(self.state, State::Head) && self.buf.len() == before {
                        return Err(self.fail(events, ParseError::Incomplete));
                    }
                }
                State::Body { decoder, last } => match decoder.decode_eof(&mut self.buf) {
                    Ok(Some(PayloadItem::Chunk(bytes))) => events.on_body(&bytes),
                    Ok(Some(PayloadItem::Eof)) => {
                        self.state = if *last { State::Stopped } else { State::Head };
                        events.on_message_complete();
                    }
                    Ok(None) => return Err(self.fail(events, ParseError::Incomplete)),
                    Err(e) => return Err(self.fail(events, e)),
                },
            }
        }
    }

    fn fail<E: ParserEvents + ?Sized>(&mut self, events: &mut E, e: ParseError) -> ParseError {
        error!(cause = %e, "parse message error");
        self.state = State::Failed;
        events.on_error(&e);
        e
    }

    /// Hands over every buffered byte, typically after an upgrade.
    pub fn take_remaining(&mut self) -> BytesMut {
        self.buf.split()
    }

    /// Ready for a fresh connection.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::Head;
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Between two messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Head) && self.buf.is_empty()
    }

    /// In the middle of a message.
    pub fn in_message(&self) -> bool {
        matches!(self.state, State::Body { .. }) || (matches!(self.state, State::Head) && !self.buf.is_empty())
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, State::Stopped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }
}

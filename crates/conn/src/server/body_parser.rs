//! Body parsers selected by the media type of a request.
//!
//! A parser sees a start event, every body chunk, and an end event. Lookup in
//! [`BodyParsers`] tries the exact `type/subtype`, then `type/*`, then `*`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mime::Mime;
use tracing::{debug, warn};

use crate::protocol::{KnownHeader, ParseError, Request};
use crate::stream::BodyStream;

/// One step of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEvent<'a> {
    Start,
    Data(&'a [u8]),
    End,
}

pub trait BodyParser: Send {
    /// An error marks a content error and the exchange is answered with `400`.
    fn on_event(&mut self, event: BodyEvent<'_>, request: &mut Request) -> Result<(), ParseError>;
}

type ParserFactory = Arc<dyn Fn() -> Box<dyn BodyParser> + Send + Sync>;

#[derive(Clone, Default)]
pub struct BodyParsers {
    parsers: HashMap<String, ParserFactory>,
}

impl BodyParsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Form bodies merged into the request parameters, everything else buffered
    /// into the request body, both up to `limit` bytes.
    pub fn standard(limit: usize) -> Self {
        let mut parsers = Self::new();
        parsers
            .register(mime::APPLICATION_WWW_FORM_URLENCODED.essence_str(), move || Box::new(FormParser::new(limit)))
            .register("*", move || Box::new(BufferParser::new(limit)));
        parsers
    }

    /// Registers a parser factory for `type/subtype`, `type/*` or `*`.
    pub fn register<F>(&mut self, media_range: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn BodyParser> + Send + Sync + 'static,
    {
        self.parsers.insert(media_range.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    /// A fresh parser for a request with the given `Content-Type`.
    pub fn select(&self, content_type: Option<&str>) -> Option<Box<dyn BodyParser>> {
        let mime = content_type.and_then(|value| match value.parse::<Mime>() {
            Ok(mime) => Some(mime),
            Err(e) => {
                debug!(content_type = value, cause = %e, "unparsable content type");
                None
            }
        });

        let factory = match &mime {
            Some(mime) => {
                let essence = mime.essence_str().to_ascii_lowercase();
                let range = format!("{}/*", mime.type_().as_str().to_ascii_lowercase());
                self.parsers.get(&essence).or_else(|| self.parsers.get(&range)).or_else(|| self.parsers.get("*"))
            }
            None => self.parsers.get("*"),
        };
        factory.map(|factory| factory())
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl fmt::Debug for BodyParsers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.parsers.keys()).finish()
    }
}

/// Collects the body, failing once it grows past the limit.
#[derive(Debug)]
struct LimitedBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl LimitedBuffer {
    fn new(limit: usize) -> Self {
        Self { buf: Vec::new(), limit }
    }

    fn extend(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        if self.buf.len() + chunk.len() > self.limit {
            warn!(limit = self.limit, "request body exceeds the parser limit");
            return Err(ParseError::invalid_body(format!("body larger than {} bytes", self.limit)));
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
}

/// Parses `application/x-www-form-urlencoded` bodies into request parameters.
#[derive(Debug)]
pub struct FormParser {
    body: LimitedBuffer,
}

impl FormParser {
    pub fn new(limit: usize) -> Self {
        Self { body: LimitedBuffer::new(limit) }
    }
}

impl BodyParser for FormParser {
    fn on_event(&mut self, event: BodyEvent<'_>, request: &mut Request) -> Result<(), ParseError> {
        match event {
            BodyEvent::Start => Ok(()),
            BodyEvent::Data(chunk) => self.body.extend(chunk),
            BodyEvent::End => {
                let pairs: Vec<(String, String)> =
                    serde_urlencoded::from_bytes(&self.body.buf).map_err(ParseError::invalid_body)?;
                for (name, value) in pairs {
                    request.add_param(name, value);
                }
                Ok(())
            }
        }
    }
}

/// Buffers the body into memory and hands it to the request as its body stream.
#[derive(Debug)]
pub struct BufferParser {
    body: LimitedBuffer,
}

impl BufferParser {
    pub fn new(limit: usize) -> Self {
        Self { body: LimitedBuffer::new(limit) }
    }
}

impl BodyParser for BufferParser {
    fn on_event(&mut self, event: BodyEvent<'_>, request: &mut Request) -> Result<(), ParseError> {
        match event {
            BodyEvent::Start => {
                if let Some(length) = request.headers().get(KnownHeader::ContentLength).and_then(|v| v.parse::<usize>().ok()) {
                    self.body.buf.reserve(length.min(self.body.limit));
                }
                Ok(())
            }
            BodyEvent::Data(chunk) => self.body.extend(chunk),
            BodyEvent::End => {
                let body = std::mem::take(&mut self.body.buf);
                request.set_incoming_body(BodyStream::from(body));
                Ok(())
            }
        }
    }
}

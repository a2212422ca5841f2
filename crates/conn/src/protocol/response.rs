//! The response value object shared by both roles.
//!
//! A client connection fills one [`Response`] per exchange from the parser
//! callbacks; body bytes nobody else consumes land in its bounded buffer. A server
//! resource fills the response it is handed and attaches a body stream. Either way
//! a response is reset, not reallocated, when the connection moves on.

use bytes::BytesMut;
use http::{StatusCode, Version};
use tracing::warn;

use super::{HeaderNameRef, HeaderTable};
use crate::stream::BodyStream;

const DEFAULT_BUFFER_LIMIT: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderTable,
    body: Option<BodyStream>,
    buffer: BytesMut,
    buffer_limit: usize,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            headers: HeaderTable::new(),
            body: None,
            buffer: BytesMut::new(),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }

    pub fn with_status(status: StatusCode) -> Self {
        let mut response = Self::new();
        response.status = status;
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderTable {
        &mut self.headers
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    pub fn header<N: HeaderNameRef>(&mut self, name: N, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the body, dropping a body set earlier.
    pub fn set_body(&mut self, body: impl Into<BodyStream>) -> &mut Self {
        if let Some(previous) = self.body.replace(body.into()) {
            warn!(kind = previous.kind(), "response body replaced, previous body dropped");
        }
        self
    }

    /// Sets the body unless one is present, handing the new body back in that case.
    pub fn try_set_body(&mut self, body: BodyStream) -> Result<&mut Self, BodyStream> {
        if self.body.is_some() {
            return Err(body);
        }
        self.body = Some(body);
        Ok(self)
    }

    pub fn body(&self) -> Option<&BodyStream> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<BodyStream> {
        self.body.take()
    }

    /// Body bytes received and kept by the connection.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// The buffered body as text, when it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.buffer).ok()
    }

    pub fn is_informational(&self) -> bool {
        self.status.is_informational()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Clears everything for the next message, keeping allocations.
    pub fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.version = Version::HTTP_11;
        self.headers.reset();
        self.body = None;
        self.buffer.clear();
    }

    pub(crate) fn set_buffer_limit(&mut self, limit: usize) {
        self.buffer_limit = limit;
    }

    /// Appends to the buffer up to its limit and returns how much was taken.
    pub(crate) fn buffer_write(&mut self, chunk: &[u8]) -> usize {
        let room = self.buffer_limit.saturating_sub(self.buffer.len());
        let n = room.min(chunk.len());
        self.buffer.extend_from_slice(&chunk[..n]);
        n
    }
}

//! Serializes the start line and header section of an outgoing message.
//!
//! Framing headers are owned by the encoder: any `Content-Length` or
//! `Transfer-Encoding` present in the table is replaced by the framing that matches
//! the [`PayloadSize`] the body is actually sent with.

use crate::protocol::{HeaderTable, PayloadSize, SendError};

use bytes::{BufMut, BytesMut};

use http::{Method, StatusCode, Version};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::{error, warn};

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// The first line of an outgoing message.
#[derive(Debug, Clone, Copy)]
pub enum HeadLine<'a> {
    Request { method: &'a Method, target: &'a str, version: Version },
    Response { status: StatusCode, version: Version },
}

impl HeadLine<'_> {
    /// Whether an empty body still needs `Content-Length: 0` on the wire.
    fn announces_empty_body(&self) -> bool {
        match self {
            HeadLine::Request { method, .. } => matches!(**method, Method::POST | Method::PUT | Method::PATCH),
            HeadLine::Response { status, .. } => {
                !(status.is_informational() || *status == StatusCode::NO_CONTENT || *status == StatusCode::NOT_MODIFIED)
            }
        }
    }
}

fn version_str(version: Version) -> Result<&'static str, SendError> {
    match version {
        Version::HTTP_11 => Ok("HTTP/1.1"),
        Version::HTTP_10 => Ok("HTTP/1.0"),
        v => {
            error!(http_version = ?v, "unsupported http version");
            Err(io::Error::from(ErrorKind::Unsupported).into())
        }
    }
}

/// Encoder for message heads implementing the [`Encoder`] trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl<'a> Encoder<(HeadLine<'a>, &'a HeaderTable, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (HeadLine<'a>, &'a HeaderTable, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (line, headers, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        match line {
            HeadLine::Request { method, target, version } => {
                write!(FastWrite(dst), "{} {} {}\r\n", method.as_str(), target, version_str(version)?)?;
            }
            HeadLine::Response { status, version } => {
                write!(
                    FastWrite(dst),
                    "{} {} {}\r\n",
                    version_str(version)?,
                    status.as_str(),
                    status.canonical_reason().unwrap_or("Unknown")
                )?;
            }
        }

        for (name, value) in headers.lines() {
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding") {
                continue;
            }
            if value.bytes().any(|b| b == b'\r' || b == b'\n') || name.is_empty() {
                warn!(header = name, "skip header with line break in value");
                continue;
            }
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }

        match payload_size {
            PayloadSize::Length(n) => write!(FastWrite(dst), "Content-Length: {n}\r\n")?,
            PayloadSize::Chunked => dst.put_slice(b"Transfer-Encoding: chunked\r\n"),
            PayloadSize::Empty if line.announces_empty_body() => dst.put_slice(b"Content-Length: 0\r\n"),
            PayloadSize::Empty | PayloadSize::UntilClose => {}
        }

        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Writes straight into the reserved buffer.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

//! Executes the send side state machine against a [`Transport`].
//!
//! The [`Sender`] owns the outbound message of a connection: its encoded head,
//! its body stream and the scratch buffer the body is pumped through. Every call
//! to [`Sender::advance`] runs the pure [`transition`] function until no
//! synchronous progress is possible, then reports where it stopped.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::{trace, warn};

use super::state::{Effect, SendInput, SendState, transition};
use super::transport::Transport;
use crate::codec::{HeadLine, HeaderEncoder};
use crate::protocol::{HeaderTable, PayloadSize, SendError};
use crate::stream::{BodyStream, ByteStream};

/// Where [`Sender::advance`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing to send.
    Idle,
    /// The transport is full or the body has no bytes right now.
    Blocked,
    /// The message is completely handed to the transport.
    Sent,
    /// The previous message waits for its response.
    Waiting,
}

/// The framing a body goes out with.
pub fn body_framing(body: Option<&BodyStream>) -> PayloadSize {
    match body.map(BodyStream::content_length) {
        None | Some(Some(0)) => PayloadSize::Empty,
        Some(Some(n)) => PayloadSize::Length(n),
        Some(None) => PayloadSize::Chunked,
    }
}

/// Encodes a message head with the framing header matching `framing`.
pub fn encode_head(line: HeadLine<'_>, headers: &HeaderTable, framing: PayloadSize) -> Result<BytesMut, SendError> {
    let mut head = BytesMut::new();
    HeaderEncoder.encode((line, headers, framing), &mut head)?;
    Ok(head)
}

#[derive(Debug)]
pub struct Sender {
    state: SendState,
    loaded: bool,
    interim: BytesMut,
    head: BytesMut,
    body: Option<BodyStream>,
    framing: PayloadSize,
    remaining: Option<u64>,
    staged: BytesMut,
    scratch: Vec<u8>,
}

impl Sender {
    pub fn new(write_buffer_size: usize) -> Self {
        Self {
            state: SendState::Ready,
            loaded: false,
            interim: BytesMut::new(),
            head: BytesMut::new(),
            body: None,
            framing: PayloadSize::Empty,
            remaining: None,
            staged: BytesMut::new(),
            scratch: vec![0; write_buffer_size.max(1)],
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    /// Ready with nothing loaded.
    pub fn is_idle(&self) -> bool {
        self.state == SendState::Ready && !self.loaded && self.interim.is_empty()
    }

    /// Whether a new message may be loaded.
    pub fn can_load(&self) -> bool {
        self.state == SendState::Ready && !self.loaded
    }

    /// Loads the next message. Refused while another message is in flight.
    pub fn load(&mut self, head: BytesMut, body: Option<BodyStream>, framing: PayloadSize) -> Result<(), SendError> {
        if !self.can_load() {
            return Err(SendError::invalid_body(format!("cannot load a message in state {:?}", self.state)));
        }
        trace!(head_len = head.len(), ?framing, "message loaded");
        self.head = head;
        self.body = body;
        self.framing = framing;
        self.loaded = true;
        Ok(())
    }

    /// Queues bytes written ahead of the next message, such as `100 Continue`.
    pub fn queue_interim(&mut self, bytes: &[u8]) {
        self.interim.extend_from_slice(bytes);
    }

    /// Runs the machine until it cannot progress synchronously.
    pub fn advance(&mut self, transport: &mut dyn Transport) -> Result<Progress, SendError> {
        loop {
            match self.state {
                SendState::Ready => {
                    if !self.flush_interim(transport) {
                        return Ok(Progress::Blocked);
                    }
                    if self.step(SendInput::Writable { outbound: self.loaded }) != Effect::WriteHead {
                        return Ok(Progress::Idle);
                    }
                    self.loaded = false;
                }
                SendState::StartSending | SendState::SendingHeaders => {
                    let n = transport.write(&self.head);
                    self.head.advance(n);
                    if self.step(SendInput::HeadProgress { complete: self.head.is_empty() }) == Effect::Stall {
                        return Ok(Progress::Blocked);
                    }
                }
                SendState::StartBody => match self.step(SendInput::BodyPlan(self.framing)) {
                    Effect::WrapChunked => {
                        let source = self.body.take().unwrap_or_else(|| BodyStream::from(Vec::new()));
                        self.body = Some(match source {
                            already @ BodyStream::Chunked(_) => already,
                            other => other.chunked(),
                        });
                        self.remaining = None;
                    }
                    Effect::PassThrough => self.remaining = self.framing.length(),
                    Effect::ReleaseBody => self.release_body(),
                    _ => {}
                },
                SendState::SendingBody => {
                    let (progressed, finished) = self.pump(transport)?;
                    match self.step(SendInput::BodyProgress { finished, progressed }) {
                        Effect::ReleaseBody => self.release_body(),
                        Effect::Stall => return Ok(Progress::Blocked),
                        _ => {}
                    }
                }
                SendState::Sent => return Ok(Progress::Sent),
                SendState::WaitResponse => return Ok(Progress::Waiting),
            }
        }
    }

    /// Closes the cycle of a sent message.
    pub fn acknowledge(&mut self, await_response: bool) {
        self.step(SendInput::Acknowledge { await_response });
    }

    /// The response the connection waited for has completed.
    pub fn response_received(&mut self) {
        if self.state == SendState::WaitResponse {
            self.step(SendInput::ResponseDone);
        }
    }

    /// Drops the message in flight and returns to `Ready`.
    pub fn reset(&mut self) {
        self.release_body();
        self.head.clear();
        self.interim.clear();
        self.staged.clear();
        self.loaded = false;
        self.state = SendState::Ready;
    }

    fn step(&mut self, input: SendInput) -> Effect {
        let (next, effect) = transition(self.state, input);
        if next != self.state {
            trace!(from = ?self.state, to = ?next, ?effect, "send state changed");
        }
        self.state = next;
        effect
    }

    fn flush_interim(&mut self, transport: &mut dyn Transport) -> bool {
        if !self.interim.is_empty() {
            let n = transport.write(&self.interim);
            self.interim.advance(n);
        }
        self.interim.is_empty()
    }

    /// Moves body bytes to the transport; returns `(progressed, finished)`.
    fn pump(&mut self, transport: &mut dyn Transport) -> Result<(bool, bool), SendError> {
        let mut progressed = false;
        loop {
            if !self.staged.is_empty() {
                let n = transport.write(&self.staged);
                self.staged.advance(n);
                progressed |= n > 0;
                if !self.staged.is_empty() {
                    return Ok((progressed, false));
                }
            }

            let Some(body) = self.body.as_mut() else {
                return Ok((progressed, true));
            };
            if self.remaining == Some(0) {
                if !body.is_finished() {
                    warn!(kind = body.kind(), "body longer than its declared length, excess dropped");
                }
                return Ok((progressed, true));
            }

            let want = self.remaining.map_or(self.scratch.len(), |r| usize::try_from(r).map_or(self.scratch.len(), |r| r.min(self.scratch.len())));
            let n = body.read_into(&mut self.scratch[..want]).map_err(SendError::invalid_body)?;
            if n == 0 {
                if !body.is_finished() {
                    return Ok((progressed, false));
                }
                if let Some(left) = self.remaining.filter(|r| *r > 0) {
                    return Err(SendError::invalid_body(format!("body ended {left} bytes short of its declared length")));
                }
                return Ok((progressed, true));
            }

            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= n as u64;
            }
            self.staged.extend_from_slice(&self.scratch[..n]);
            progressed = true;
        }
    }

    fn release_body(&mut self) {
        if let Some(body) = self.body.take() {
            trace!(kind = body.kind(), "body released");
        }
        self.remaining = None;
    }
}

//! The client role of a connection.
//!
//! Requests enter the Waiting queue through [`ClientConnection::send`]. On every
//! send opportunity the head of Waiting moves to Executing and goes out through
//! the shared [`Sender`]. Responses are matched against Executing in strict FIFO
//! order, so the head of Executing is always the request the next response on
//! the wire belongs to.
//!
//! A GET or HEAD may follow another GET or HEAD before that one is answered.
//! Anything else waits until Executing has drained.

use bytes::BytesMut;
use http::{Method, StatusCode, Version};
use tracing::{debug, error, info, trace, warn};

use super::{BoundedQueue, TlsSettings};
use crate::codec::{HeadLine, HeadersVerdict, ParserEvents, StartLine, WireParser};
use crate::config::ConnectionConfig;
use crate::connection::{Engine, Progress, Sender, Transport, TransportEvent, body_framing, encode_head};
use crate::protocol::{ExchangeError, HttpError, KnownHeader, ParseError, QueueError, Request, Response, websocket};

/// Why the parser stopped after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// No more responses on this connection.
    Close,
    /// The connection switched protocols.
    Upgrade,
}

/// Per-response receive flags.
#[derive(Debug, Default)]
struct ReceiveState {
    field: String,
    interim: bool,
    upgrade: bool,
    retry: bool,
    content_error: bool,
    keep_alive: bool,
    stop: Option<Stop>,
}

impl ReceiveState {
    fn begin(&mut self, status: StatusCode) {
        self.interim = status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS;
        self.upgrade = false;
        self.retry = false;
        self.content_error = false;
        self.keep_alive = true;
    }
}

pub struct ClientConnection {
    config: ConnectionConfig,
    waiting: BoundedQueue<Request>,
    executing: BoundedQueue<Request>,
    sender: Sender,
    parser: WireParser,
    receive: ReceiveState,
    response: Response,
    connected: bool,
    closed: bool,
    upgraded: Option<BytesMut>,
}

impl ClientConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            waiting: BoundedQueue::new(config.waiting_capacity),
            executing: BoundedQueue::new(config.executing_capacity.max(1)),
            sender: Sender::new(config.write_buffer_size),
            parser: WireParser::responses(config.max_header_bytes, config.max_headers),
            receive: ReceiveState::default(),
            response: Response::new(),
            connected: false,
            closed: false,
            upgraded: None,
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Enqueues a request into Waiting.
    ///
    /// A full queue drops the request, its completion callback is not run.
    pub fn send(&mut self, request: Request) -> Result<(), QueueError> {
        let uri = request.uri().clone();
        self.waiting.try_push(request).inspect_err(|e| warn!(cause = %e, %uri, "request dropped"))
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn executing_len(&self) -> usize {
        self.executing.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.closed
    }

    /// Requests are queued or in flight.
    pub fn has_pending_work(&self) -> bool {
        !self.waiting.is_empty() || !self.executing.is_empty()
    }

    /// Forwards the TLS settings of the connection to every queued request
    /// before a handshake.
    pub fn prepare_tls(&mut self, settings: &TlsSettings) {
        for request in self.waiting.iter_mut() {
            request.run_tls_hook(settings);
        }
    }

    /// Fails every queued and in-flight request and closes the connection.
    pub fn abort(&mut self, transport: &mut dyn Transport, reason: &ExchangeError) {
        transport.close();
        self.closed = true;
        self.fail_pending(reason);
    }

    /// Fails every queued and in-flight request, for example when no transport
    /// could be opened.
    pub fn fail_pending(&mut self, reason: &ExchangeError) {
        self.sender.reset();
        self.fail_all(reason);
    }

    /// Sends as long as the pipelining policy and the transport allow.
    fn pump(&mut self, transport: &mut dyn Transport) -> Result<(), HttpError> {
        while self.is_connected() {
            if self.sender.can_load() {
                self.load_next()?;
            }

            match self.sender.advance(transport)? {
                Progress::Sent => {
                    let await_response = !self.config.pipelining || !self.executing.back().is_some_and(Request::is_pipelineable);
                    self.sender.acknowledge(await_response);
                }
                Progress::Idle | Progress::Blocked | Progress::Waiting => return Ok(()),
            }
        }
        Ok(())
    }

    fn may_send(&self, candidate: &Request) -> bool {
        if self.executing.is_full() {
            return false;
        }
        match self.executing.back() {
            None => true,
            Some(tail) => {
                self.config.pipelining
                    && tail.is_pipelineable()
                    && candidate.is_pipelineable()
                    && !tail.is_upgrade()
                    && !candidate.is_upgrade()
            }
        }
    }

    /// Moves the head of Waiting to Executing and loads it into the sender.
    fn load_next(&mut self) -> Result<(), HttpError> {
        while let Some(candidate) = self.waiting.front() {
            if !self.may_send(candidate) {
                trace!(executing = self.executing.len(), "next request stalls until executing drains");
                return Ok(());
            }
            let Some(mut request) = self.waiting.pop_front() else {
                return Ok(());
            };

            let loaded = request.prepare().and_then(|()| {
                let body = request.take_body_for_send();
                let framing = body_framing(body.as_ref());
                let line = HeadLine::Request { method: request.method(), target: request.target(), version: request.version() };
                let head = encode_head(line, request.headers(), framing).map_err(ExchangeError::aborted)?;
                Ok((head, body, framing))
            });

            match loaded {
                Ok((head, body, framing)) => {
                    debug!(method = %request.method(), uri = %request.uri(), ?framing, "send request");
                    self.sender.load(head, body, framing)?;
                    if let Err(e) = self.executing.try_push(request) {
                        // may_send checked the room
                        error!(cause = %e, "executing queue overflow");
                    }
                    return Ok(());
                }
                Err(e) => {
                    self.response.reset();
                    request.complete(&mut self.response, Err(e));
                }
            }
        }
        Ok(())
    }

    fn on_connected(&mut self, transport: &mut dyn Transport) -> Result<(), HttpError> {
        info!(waiting = self.waiting.len(), "client connection established");
        self.connected = true;
        self.closed = false;
        self.upgraded = None;
        self.parser.reset();
        self.sender.reset();
        self.pump(transport)
    }

    fn on_data(&mut self, data: &[u8], transport: &mut dyn Transport) -> Result<(), HttpError> {
        if !self.is_connected() {
            trace!(len = data.len(), "bytes after close ignored");
            return Ok(());
        }

        let mut inbound = Inbound {
            state: &mut self.receive,
            response: &mut self.response,
            waiting: &mut self.waiting,
            executing: &mut self.executing,
            buffer_limit: self.config.response_buffer_limit,
            close_on_content_error: self.config.close_on_content_error,
        };
        self.parser.feed(data, &mut inbound)?;

        if self.executing.is_empty() {
            self.sender.response_received();
        }

        match self.receive.stop.take() {
            Some(Stop::Upgrade) => {
                let leftover = self.parser.take_remaining();
                info!(leftover = leftover.len(), "connection upgraded, http processing stops");
                self.upgraded = Some(leftover);
                self.closed = true;
                self.sender.reset();
                Ok(())
            }
            Some(Stop::Close) => {
                debug!(unanswered = self.executing.len(), "server closes the connection");
                transport.close();
                self.closed = true;
                self.requeue_in_flight(&ExchangeError::ConnectionClosed);
                Ok(())
            }
            None => self.pump(transport),
        }
    }

    fn on_closed(&mut self) {
        if self.connected && !self.closed {
            let mut inbound = Inbound {
                state: &mut self.receive,
                response: &mut self.response,
                waiting: &mut self.waiting,
                executing: &mut self.executing,
                buffer_limit: self.config.response_buffer_limit,
                close_on_content_error: self.config.close_on_content_error,
            };
            if let Err(e) = self.parser.finish(&mut inbound) {
                debug!(cause = %e, "response cut short by connection close");
            }
            self.receive.stop = None;
        }

        info!(in_flight = self.executing.len(), waiting = self.waiting.len(), "client connection closed");
        self.connected = false;
        self.closed = true;
        self.requeue_in_flight(&ExchangeError::ConnectionClosed);
    }

    /// Puts retryable in-flight requests back in front of Waiting, in their
    /// original order, and fails the others with `reason`.
    fn requeue_in_flight(&mut self, reason: &ExchangeError) {
        self.sender.reset();
        let mut retry = Vec::new();
        for mut request in self.executing.drain().collect::<Vec<_>>() {
            if request.is_retryable() && request.rewind() {
                request.record_attempt();
                retry.push(request);
            } else {
                self.response.reset();
                request.complete(&mut self.response, Err(reason.clone()));
            }
        }
        if !retry.is_empty() {
            debug!(requeued = retry.len(), "in-flight requests requeued");
        }
        for request in retry.into_iter().rev() {
            self.waiting.requeue_front(request);
        }
    }

    fn fail_all(&mut self, reason: &ExchangeError) {
        let pending: Vec<Request> = self.executing.drain().chain(self.waiting.drain()).collect();
        for request in pending {
            self.response.reset();
            request.complete(&mut self.response, Err(reason.clone()));
        }
    }
}

impl Engine for ClientConnection {
    fn handle(&mut self, event: TransportEvent<'_>, transport: &mut dyn Transport) -> Result<(), HttpError> {
        let result = match event {
            TransportEvent::Connected => self.on_connected(transport),
            TransportEvent::Data(data) => self.on_data(data, transport),
            TransportEvent::Drained | TransportEvent::Poll => self.pump(transport),
            TransportEvent::Closed => {
                self.on_closed();
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!(cause = %e, "client connection failed");
            let reason = match e {
                HttpError::RequestError { source } => ExchangeError::parse(source),
                other => ExchangeError::aborted(other),
            };
            transport.close();
            self.closed = true;
            self.requeue_in_flight(&reason);
        }
        result
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_idle(&self) -> bool {
        !self.has_pending_work() && self.sender.is_idle()
    }

    fn take_upgraded(&mut self) -> Option<BytesMut> {
        self.upgraded.take()
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if self.has_pending_work() {
            debug!(pending = self.waiting.len() + self.executing.len(), "client connection dropped with pending requests");
            self.fail_all(&ExchangeError::ConnectionClosed);
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("waiting", &self.waiting.len())
            .field("executing", &self.executing.len())
            .field("send_state", &self.sender.state())
            .field("connected", &self.connected)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Parser callbacks for the response side, borrowing the connection's queues.
struct Inbound<'a> {
    state: &'a mut ReceiveState,
    response: &'a mut Response,
    waiting: &'a mut BoundedQueue<Request>,
    executing: &'a mut BoundedQueue<Request>,
    buffer_limit: usize,
    close_on_content_error: bool,
}

fn keeps_alive(response: &Response) -> bool {
    let headers = response.headers();
    if headers.has_token(KnownHeader::Connection, "close") {
        return false;
    }
    response.version() != Version::HTTP_10 || headers.has_token(KnownHeader::Connection, "keep-alive")
}

impl ParserEvents for Inbound<'_> {
    fn on_message_begin(&mut self, start: &StartLine<'_>) -> Result<(), ParseError> {
        let StartLine::Response { status, version, .. } = *start else {
            return Err(ParseError::invalid_header("expected a status line"));
        };
        if self.executing.is_empty() {
            return Err(ParseError::invalid_header("response received with no request in flight"));
        }

        self.response.reset();
        self.response.set_buffer_limit(self.buffer_limit);
        self.response.set_status(status).set_version(version);
        self.state.begin(status);
        Ok(())
    }

    fn on_header_field(&mut self, name: &[u8]) -> Result<(), ParseError> {
        self.state.field = String::from_utf8_lossy(name).into_owned();
        Ok(())
    }

    fn on_header_value(&mut self, value: &[u8]) -> Result<(), ParseError> {
        self.response.headers_mut().append(&self.state.field, String::from_utf8_lossy(value));
        Ok(())
    }

    fn on_headers_complete(&mut self) -> HeadersVerdict {
        if self.state.interim {
            return HeadersVerdict::NoBody;
        }
        let Some(request) = self.executing.front_mut() else {
            return HeadersVerdict::NoBodyNoMore;
        };
        if self.response.status() == StatusCode::SWITCHING_PROTOCOLS {
            self.state.upgrade = true;
            return HeadersVerdict::NoBodyNoMore;
        }

        self.state.keep_alive = keeps_alive(self.response);
        if request.answer_challenge(self.response) {
            // the challenge response is discarded, the retry answers instead
            self.state.retry = true;
            if request.method() == Method::HEAD {
                return HeadersVerdict::NoBody;
            }
            return HeadersVerdict::Continue;
        }

        match request.run_headers_hook(self.response) {
            HeadersVerdict::NoBodyNoMore => {
                self.state.keep_alive = false;
                HeadersVerdict::NoBodyNoMore
            }
            _ if request.method() == Method::HEAD => HeadersVerdict::NoBody,
            verdict => verdict,
        }
    }

    fn on_body(&mut self, chunk: &[u8]) {
        if self.state.interim || self.state.retry || self.state.content_error {
            return;
        }
        let Some(request) = self.executing.front_mut() else {
            return;
        };

        let accepted = request.deliver_body(self.response, chunk);
        if accepted < chunk.len() {
            warn!(offered = chunk.len(), accepted, uri = %request.uri(), "response body chunk rejected");
            self.state.content_error = true;
            if self.close_on_content_error {
                if let Some(request) = self.executing.pop_front() {
                    request.complete(self.response, Err(ExchangeError::ContentRejected));
                }
                self.state.stop = Some(Stop::Close);
            }
        }
    }

    fn on_message_complete(&mut self) {
        if self.state.interim {
            trace!(status = self.response.status().as_u16(), "interim response skipped");
            return;
        }
        let Some(mut request) = self.executing.pop_front() else {
            return;
        };

        if self.state.upgrade {
            let result = websocket::validate_accept(request.headers(), self.response.headers());
            self.state.stop = Some(if result.is_ok() { Stop::Upgrade } else { Stop::Close });
            request.complete(self.response, result);
            return;
        }

        if self.state.retry {
            debug!(status = self.response.status().as_u16(), uri = %request.uri(), "request re-enqueued for authentication retry");
            self.waiting.requeue_front(request);
        } else {
            let result = if self.state.content_error {
                Err(ExchangeError::ContentRejected)
            } else if request.is_upgrade() {
                Err(ExchangeError::upgrade_rejected(format!("server answered {}", self.response.status())))
            } else {
                Ok(())
            };
            request.complete(self.response, result);
        }

        if !self.state.keep_alive {
            self.state.stop = Some(Stop::Close);
        }
    }

    fn on_error(&mut self, error: &ParseError) {
        debug!(cause = %error, in_flight = self.executing.len(), "response stream broken");
    }

    fn is_paused(&self) -> bool {
        self.state.stop.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::BufferedTransport;
    use crate::protocol::Completion;
    use indoc::indoc;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    fn logged(log: &Log, name: &'static str, mut request: Request) -> Request {
        let sink = Arc::clone(log);
        request.on_complete(move |completion: Completion<'_>| {
            let entry = match &completion.result {
                Ok(()) => format!("{name} {} {}", completion.response.status().as_u16(), completion.response.text().unwrap_or("")),
                Err(e) => format!("{name} error {e}"),
            };
            sink.lock().unwrap().push(entry);
        });
        request
    }

    fn connected(config: ConnectionConfig) -> (ClientConnection, BufferedTransport) {
        let mut client = ClientConnection::new(config);
        let mut transport = BufferedTransport::new(64 * 1024);
        client.handle(TransportEvent::Connected, &mut transport).unwrap();
        (client, transport)
    }

    fn sent_lines(transport: &mut BufferedTransport) -> Vec<String> {
        let out = transport.take_output();
        String::from_utf8_lossy(&out)
            .split("\r\n")
            .filter(|line| line.starts_with("GET ") || line.starts_with("HEAD ") || line.starts_with("POST "))
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn pipelines_get_and_holds_post() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());

        client.send(logged(&log, "a", Request::get("http://h/a").unwrap())).unwrap();
        client.send(logged(&log, "b", Request::head("http://h/b").unwrap())).unwrap();
        let mut post = Request::post("http://h/c").unwrap();
        post.set_body("data");
        client.send(logged(&log, "c", post)).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();

        assert_eq!(sent_lines(&mut transport), vec!["GET /a HTTP/1.1", "HEAD /b HTTP/1.1"]);
        assert_eq!(client.executing_len(), 2);
        assert_eq!(client.waiting_len(), 1);

        let responses = crlf(indoc! {"
            HTTP/1.1 200 OK
            Content-Length: 1

            AHTTP/1.1 200 OK
            Content-Length: 10

        "});
        client.handle(TransportEvent::Data(responses.as_bytes()), &mut transport).unwrap();

        assert_eq!(sent_lines(&mut transport), vec!["POST /c HTTP/1.1"]);
        assert_eq!(client.executing_len(), 1);

        let response = crlf("HTTP/1.1 201 Created\nContent-Length: 2\n\nok");
        client.handle(TransportEvent::Data(response.as_bytes()), &mut transport).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a 200 A", "b 200 ", "c 201 ok"]);
        assert!(client.is_idle());
    }

    #[test]
    fn no_pipelining_waits_for_each_response() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default().with_pipelining(false));

        client.send(logged(&log, "a", Request::get("http://h/a").unwrap())).unwrap();
        client.send(logged(&log, "b", Request::get("http://h/b").unwrap())).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();
        assert_eq!(sent_lines(&mut transport), vec!["GET /a HTTP/1.1"]);

        let response = crlf("HTTP/1.1 204 No Content\n\n");
        client.handle(TransportEvent::Data(response.as_bytes()), &mut transport).unwrap();
        assert_eq!(sent_lines(&mut transport), vec!["GET /b HTTP/1.1"]);
    }

    #[test]
    fn zero_executing_capacity_still_sends() {
        let config = ConnectionConfig { executing_capacity: 0, ..ConnectionConfig::default() };
        let (mut client, mut transport) = connected(config);
        client.send(Request::get("http://h/a").unwrap()).unwrap();
        client.send(Request::get("http://h/b").unwrap()).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();

        assert_eq!(sent_lines(&mut transport), vec!["GET /a HTTP/1.1"]);
        assert_eq!(client.executing_len(), 1);
    }

    #[test]
    fn waiting_queue_is_bounded() {
        let mut client = ClientConnection::new(ConnectionConfig::default().with_waiting_capacity(1));
        client.send(Request::get("http://h/a").unwrap()).unwrap();
        assert_eq!(client.send(Request::get("http://h/b").unwrap()), Err(QueueError::Full { capacity: 1 }));
        assert_eq!(client.waiting_len(), 1);
    }

    #[test]
    fn interim_response_is_skipped() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        client.send(logged(&log, "a", Request::get("http://h/a").unwrap())).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();

        let responses = crlf("HTTP/1.1 100 Continue\n\nHTTP/1.1 200 OK\nContent-Length: 2\n\nhi");
        client.handle(TransportEvent::Data(responses.as_bytes()), &mut transport).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a 200 hi"]);
    }

    #[test]
    fn challenge_is_retried_once_then_surfaces() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        let mut request = Request::get("http://h/private").unwrap();
        request.basic_auth("user", "secret");
        client.send(logged(&log, "a", request)).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();
        let first = String::from_utf8(transport.take_output().to_vec()).unwrap();
        assert!(!first.contains("Authorization"));

        let challenge = crlf("HTTP/1.1 401 Unauthorized\nWWW-Authenticate: Basic realm=\"x\"\nContent-Length: 4\n\ndeny");
        client.handle(TransportEvent::Data(challenge.as_bytes()), &mut transport).unwrap();
        let retry = String::from_utf8(transport.take_output().to_vec()).unwrap();
        assert!(retry.contains("Authorization: Basic dXNlcjpzZWNyZXQ=\r\n"));
        assert!(log.lock().unwrap().is_empty());

        client.handle(TransportEvent::Data(challenge.as_bytes()), &mut transport).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a 401 deny"]);
        assert!(transport.take_output().is_empty());
    }

    #[test]
    fn head_challenge_with_length_expects_no_body() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        let mut request = Request::head("http://h/private").unwrap();
        request.basic_auth("user", "secret");
        client.send(logged(&log, "a", request)).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();
        assert_eq!(sent_lines(&mut transport), vec!["HEAD /private HTTP/1.1"]);

        let challenge = crlf("HTTP/1.1 401 Unauthorized\nWWW-Authenticate: Basic realm=\"x\"\nContent-Length: 12\n\n");
        client.handle(TransportEvent::Data(challenge.as_bytes()), &mut transport).unwrap();
        let retry = String::from_utf8(transport.take_output().to_vec()).unwrap();
        assert!(retry.starts_with("HEAD /private HTTP/1.1\r\n"));
        assert!(retry.contains("Authorization: Basic dXNlcjpzZWNyZXQ=\r\n"));

        let response = crlf("HTTP/1.1 200 OK\nContent-Length: 5\n\n");
        client.handle(TransportEvent::Data(response.as_bytes()), &mut transport).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a 200 "]);
        assert!(client.is_idle());
    }

    #[test]
    fn rejected_body_chunk_marks_content_error() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        let mut request = logged(&log, "a", Request::get("http://h/a").unwrap());
        request.on_body(|_, chunk| chunk.len() / 2);
        client.send(request).unwrap();
        client.send(logged(&log, "b", Request::get("http://h/b").unwrap())).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();

        let responses = crlf("HTTP/1.1 200 OK\nContent-Length: 4\n\nbodyHTTP/1.1 200 OK\nContent-Length: 2\n\nok");
        client.handle(TransportEvent::Data(responses.as_bytes()), &mut transport).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[0], "a error response body rejected by the consumer");
        assert_eq!(log[1], "b 200 ok");
    }

    #[test]
    fn close_requeues_retryable_and_fails_the_rest() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        client.send(logged(&log, "get", Request::get("http://h/a").unwrap())).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();
        let mut post = Request::post("http://h/b").unwrap();
        post.set_body("x");
        client.send(logged(&log, "post", post)).unwrap();

        client.handle(TransportEvent::Closed, &mut transport).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(client.waiting_len(), 2);
        assert!(client.is_closed());

        let mut transport = BufferedTransport::new(64 * 1024);
        client.handle(TransportEvent::Connected, &mut transport).unwrap();
        assert_eq!(sent_lines(&mut transport), vec!["GET /a HTTP/1.1"]);

        client.handle(TransportEvent::Closed, &mut transport).unwrap();
        client.handle(TransportEvent::Connected, &mut transport).unwrap();
        client.abort(&mut transport, &ExchangeError::ConnectionClosed);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn connection_close_response_stops_the_pipeline() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        client.send(logged(&log, "a", Request::get("http://h/a").unwrap())).unwrap();
        client.send(logged(&log, "b", Request::get("http://h/b").unwrap())).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();

        let response = crlf("HTTP/1.1 200 OK\nConnection: close\nContent-Length: 1\n\nA");
        client.handle(TransportEvent::Data(response.as_bytes()), &mut transport).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a 200 A"]);
        assert!(transport.is_closing());
        assert_eq!(client.waiting_len(), 1);
        assert_eq!(client.executing_len(), 0);
    }

    #[test]
    fn until_close_body_completes_on_close() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        client.send(logged(&log, "a", Request::get("http://h/a").unwrap())).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();

        let response = crlf("HTTP/1.0 200 OK\n\nstreamed");
        client.handle(TransportEvent::Data(response.as_bytes()), &mut transport).unwrap();
        client.handle(TransportEvent::Closed, &mut transport).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a 200 streamed"]);
    }

    #[test]
    fn websocket_upgrade_hands_over_leftover_bytes() {
        let log = Log::default();
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        let request = Request::websocket("http://h/chat").unwrap();
        let key = request.headers().get(KnownHeader::SecWebSocketKey).unwrap().to_owned();
        client.send(logged(&log, "ws", request)).unwrap();
        client.handle(TransportEvent::Poll, &mut transport).unwrap();

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n\u{81}\u{0}",
            websocket::accept_key(&key)
        );
        client.handle(TransportEvent::Data(response.as_bytes()), &mut transport).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["ws 101 "]);
        assert_eq!(&client.take_upgraded().unwrap()[..], "\u{81}\u{0}".as_bytes());
        assert!(client.is_closed());
    }

    #[test]
    fn unsolicited_response_fails_the_connection() {
        let (mut client, mut transport) = connected(ConnectionConfig::default());
        let response = crlf("HTTP/1.1 200 OK\nContent-Length: 0\n\n");
        assert!(client.handle(TransportEvent::Data(response.as_bytes()), &mut transport).is_err());
        assert!(client.is_closed());
    }

    #[test]
    fn tls_settings_reach_queued_requests() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut client = ClientConnection::new(ConnectionConfig::default());
        for path in ["http://h/a", "http://h/b"] {
            let sink = Arc::clone(&seen);
            let mut request = Request::get(path).unwrap();
            request.on_tls(move |settings| sink.lock().unwrap().push(settings.server_name().map(str::to_owned)));
            client.send(request).unwrap();
        }

        client.prepare_tls(&TlsSettings::new().with_server_name("h"));
        assert_eq!(*seen.lock().unwrap(), vec![Some("h".to_owned()), Some("h".to_owned())]);
    }
}

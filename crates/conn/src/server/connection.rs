//! The server role of a connection.
//!
//! Requests on one connection are parsed strictly in order. Each complete
//! request becomes an [`Exchange`] waiting in the ready queue until the
//! [`Sender`] is free for its response. Once `max_queued_responses` exchanges
//! are queued or sending, the parser pauses and the remaining bytes stay
//! buffered.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use http::{Method, StatusCode, Version};
use tracing::{debug, error, info, trace, warn};

use super::{BodyEvent, BodyParsers, Exchange, ResourceRegistry};
use crate::codec::{HeadLine, HeadersVerdict, ParserEvents, StartLine, WireParser};
use crate::config::ConnectionConfig;
use crate::connection::{Engine, Progress, Sender, Transport, TransportEvent, body_framing, encode_head};
use crate::protocol::{HeaderTable, HttpError, KnownHeader, ParseError, PayloadSize, Request, Response, websocket};
use crate::stream::BodyStream;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// What happens once the response in the sender is out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterSend {
    KeepAlive,
    Close,
    Upgrade,
}

pub struct ServerConnection {
    config: ConnectionConfig,
    registry: Arc<dyn ResourceRegistry>,
    parsers: Arc<BodyParsers>,
    parser: WireParser,
    sender: Sender,
    field: String,
    current: Option<Exchange>,
    ready: VecDeque<Exchange>,
    /// Header table of the last answered request, reset and reused by the next one.
    spare_headers: Option<HeaderTable>,
    after_send: Option<AfterSend>,
    /// No further requests are read from this connection.
    draining: bool,
    closed: bool,
    upgraded: Option<BytesMut>,
}

impl ServerConnection {
    /// A connection answering from `registry`, with [`BodyParsers::standard`]
    /// limited to the configured buffer limit.
    pub fn new(config: ConnectionConfig, registry: Arc<dyn ResourceRegistry>) -> Self {
        Self {
            registry,
            parsers: Arc::new(BodyParsers::standard(config.response_buffer_limit)),
            parser: WireParser::requests(config.max_header_bytes, config.max_headers),
            sender: Sender::new(config.write_buffer_size),
            field: String::new(),
            current: None,
            ready: VecDeque::new(),
            spare_headers: None,
            after_send: None,
            draining: false,
            closed: false,
            upgraded: None,
            config,
        }
    }

    pub fn with_body_parsers(mut self, parsers: Arc<BodyParsers>) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Complete requests whose response has not started yet.
    pub fn queued_responses(&self) -> usize {
        self.ready.len()
    }

    /// Parses, answers and resumes the parser until nothing moves.
    fn process(&mut self, transport: &mut dyn Transport) -> Result<(), HttpError> {
        loop {
            self.parse();
            self.offer_continue();
            let sent = self.pump(transport)?;
            if sent == 0 || self.closed {
                return Ok(());
            }
        }
    }

    fn parse(&mut self) {
        if self.draining || self.closed {
            return;
        }
        let mut inbound = Inbound {
            field: &mut self.field,
            current: &mut self.current,
            ready: &mut self.ready,
            spare_headers: &mut self.spare_headers,
            draining: &mut self.draining,
            in_flight: self.after_send.is_some(),
            registry: self.registry.as_ref(),
            parsers: &self.parsers,
            max_queued: self.config.max_queued_responses.max(1),
            close_on_content_error: self.config.close_on_content_error,
        };
        if let Err(e) = self.parser.parse(&mut inbound) {
            error!(cause = %e, "request parse failed, answering 400 and closing");
            let mut exchange = Exchange::new(Request::incoming(Method::GET, Version::HTTP_11));
            exchange.close = true;
            exchange.response_mut().set_status(StatusCode::BAD_REQUEST);
            self.ready.push_back(exchange);
            self.draining = true;
        }
    }

    /// Writes `100 Continue` for the request being read once every earlier
    /// response is out.
    fn offer_continue(&mut self) {
        if !self.ready.is_empty() || !self.sender.is_idle() {
            return;
        }
        if let Some(exchange) = self.current.as_mut()
            && exchange.continue_pending
        {
            exchange.continue_pending = false;
            info!(path = exchange.request().path(), "send 100 Continue");
            self.sender.queue_interim(CONTINUE);
        }
    }

    /// Sends queued responses as far as the transport allows and returns how
    /// many went out completely.
    fn pump(&mut self, transport: &mut dyn Transport) -> Result<usize, HttpError> {
        let mut sent = 0;
        while !self.closed {
            if self.sender.can_load()
                && self.after_send.is_none()
                && let Some(exchange) = self.ready.pop_front()
            {
                self.after_send = Some(self.load_response(exchange)?);
            }

            match self.sender.advance(transport)? {
                Progress::Sent => {
                    self.sender.acknowledge(false);
                    sent += 1;
                    self.finish_response(transport);
                }
                Progress::Idle | Progress::Blocked | Progress::Waiting => break,
            }
        }
        Ok(sent)
    }

    fn load_response(&mut self, exchange: Exchange) -> Result<AfterSend, HttpError> {
        let mut keep_alive = !exchange.close && !exchange.response().headers().has_token(KnownHeader::Connection, "close");
        let upgrade = exchange.upgrade && exchange.response().status() == StatusCode::SWITCHING_PROTOCOLS;
        let (mut request, mut response) = exchange.into_parts();

        apply_identity_tag(&request, &mut response);
        let mut body = response.take_body();
        if is_bodiless(response.status()) && body.take().is_some() {
            debug!(status = %response.status(), "body dropped for a bodiless status");
        }

        let mut framing = body_framing(body.as_ref());
        if framing.is_chunked() && request.version() == Version::HTTP_10 {
            // 1.0 peers know no chunked coding, the close delimits the body
            framing = PayloadSize::UntilClose;
            keep_alive = false;
        }

        if !upgrade {
            if !keep_alive {
                response.header(KnownHeader::Connection, "close");
            } else if request.version() == Version::HTTP_10 {
                response.header(KnownHeader::Connection, "keep-alive");
            }
        }

        let line = HeadLine::Response { status: response.status(), version: Version::HTTP_11 };
        let head = encode_head(line, response.headers(), framing)?;

        debug!(method = %request.method(), path = request.path(), status = %response.status(), ?framing, "send response");
        if request.method() == Method::HEAD {
            self.sender.load(head, None, PayloadSize::Empty)?;
        } else {
            self.sender.load(head, body, framing)?;
        }
        self.spare_headers = Some(request.take_headers());

        Ok(match (upgrade, keep_alive) {
            (true, _) => AfterSend::Upgrade,
            (false, true) => AfterSend::KeepAlive,
            (false, false) => AfterSend::Close,
        })
    }

    fn finish_response(&mut self, transport: &mut dyn Transport) {
        match self.after_send.take() {
            Some(AfterSend::Close) => {
                debug!(discarded = self.ready.len(), "closing after response");
                transport.close();
                self.shutdown();
            }
            Some(AfterSend::Upgrade) => {
                let leftover = self.parser.take_remaining();
                info!(leftover = leftover.len(), "connection upgraded, http processing stops");
                self.upgraded = Some(leftover);
                self.shutdown();
            }
            Some(AfterSend::KeepAlive) | None => {}
        }
    }

    fn on_data(&mut self, data: &[u8], transport: &mut dyn Transport) -> Result<(), HttpError> {
        if self.closed {
            trace!(len = data.len(), "bytes after close ignored");
            return Ok(());
        }
        self.parser.push(data);
        self.process(transport)
    }

    fn on_closed(&mut self) {
        if !self.closed && self.parser.in_message() {
            debug!(path = self.current.as_ref().map(|e| e.request().path()), "request cut short by connection close");
        }
        info!(unanswered = self.ready.len(), "server connection closed");
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.closed = true;
        self.draining = true;
        self.current = None;
        self.ready.clear();
        self.after_send = None;
        self.sender.reset();
    }
}

impl Engine for ServerConnection {
    fn handle(&mut self, event: TransportEvent<'_>, transport: &mut dyn Transport) -> Result<(), HttpError> {
        let result = match event {
            TransportEvent::Connected => {
                info!("server connection established");
                self.process(transport)
            }
            TransportEvent::Data(data) => self.on_data(data, transport),
            TransportEvent::Drained | TransportEvent::Poll => self.process(transport),
            TransportEvent::Closed => {
                self.on_closed();
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!(cause = %e, "server connection failed");
            transport.close();
            self.shutdown();
        }
        result
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_idle(&self) -> bool {
        self.current.is_none() && self.ready.is_empty() && self.after_send.is_none() && self.sender.is_idle()
    }

    fn take_upgraded(&mut self) -> Option<BytesMut> {
        self.upgraded.take()
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("sender", &self.sender.state())
            .field("ready", &self.ready.len())
            .field("draining", &self.draining)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn is_bodiless(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Emits the body's identity tag as `ETag` and turns a successful response into
/// `304 Not Modified` when a conditional header of the request names that tag.
fn apply_identity_tag(request: &Request, response: &mut Response) {
    let Some(tag) = response.body().and_then(BodyStream::identity_tag).map(str::to_owned) else {
        return;
    };
    if !response.headers().contains(KnownHeader::ETag) {
        response.header(KnownHeader::ETag, tag.clone());
    }
    if response.is_success() && condition_matches(request, &tag) {
        debug!(etag = %tag, path = request.path(), "not modified");
        drop(response.take_body());
        response.set_status(StatusCode::NOT_MODIFIED);
    }
}

fn condition_matches(request: &Request, tag: &str) -> bool {
    let headers = request.headers();
    [KnownHeader::IfNoneMatch, KnownHeader::IfMatch]
        .into_iter()
        .flat_map(|name| headers.get_all(name))
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim() == tag)
}

fn reject_content(exchange: &mut Exchange, close: bool, cause: &dyn fmt::Display) {
    warn!(%cause, path = exchange.request().path(), "request content rejected");
    exchange.content_error = true;
    exchange.close |= close;
}

/// The parser callbacks of one [`ServerConnection::parse`] run.
struct Inbound<'a> {
    field: &'a mut String,
    current: &'a mut Option<Exchange>,
    ready: &'a mut VecDeque<Exchange>,
    spare_headers: &'a mut Option<HeaderTable>,
    draining: &'a mut bool,
    /// A response is in the sender and counts against `max_queued`.
    in_flight: bool,
    registry: &'a dyn ResourceRegistry,
    parsers: &'a BodyParsers,
    max_queued: usize,
    close_on_content_error: bool,
}

impl Inbound<'_> {
    /// Answers an upgrade request; `false` leaves it to the regular path.
    fn try_upgrade(exchange: &mut Exchange) -> bool {
        let Some(resource) = exchange.resource.clone() else {
            return false;
        };
        let accept = match websocket::server_accept(exchange.request().headers()) {
            Ok(accept) => accept,
            Err(e) => {
                warn!(cause = %e, path = exchange.request().path(), "websocket handshake refused");
                return false;
            }
        };
        if !resource.on_upgrade(exchange) {
            return false;
        }

        exchange.upgrade = true;
        exchange
            .response_mut()
            .set_status(StatusCode::SWITCHING_PROTOCOLS)
            .header(KnownHeader::Upgrade, "websocket")
            .header(KnownHeader::Connection, "Upgrade")
            .header(KnownHeader::SecWebSocketAccept, accept);
        true
    }
}

impl ParserEvents for Inbound<'_> {
    fn on_message_begin(&mut self, start: &StartLine<'_>) -> Result<(), ParseError> {
        let StartLine::Request { method, version } = *start else {
            return Err(ParseError::InvalidMethod);
        };
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let request = match self.spare_headers.take() {
            Some(headers) => Request::incoming_reusing(method, version, headers),
            None => Request::incoming(method, version),
        };
        *self.current = Some(Exchange::new(request));
        Ok(())
    }

    fn on_path(&mut self, path: &[u8]) -> Result<(), ParseError> {
        let Some(exchange) = self.current.as_mut() else {
            return Ok(());
        };
        let target = std::str::from_utf8(path).map_err(|_| ParseError::InvalidUri)?;
        exchange.request_mut().set_target(target).map_err(|_| ParseError::InvalidUri)
    }

    fn on_header_field(&mut self, name: &[u8]) -> Result<(), ParseError> {
        *self.field = String::from_utf8_lossy(name).into_owned();
        Ok(())
    }

    fn on_header_value(&mut self, value: &[u8]) -> Result<(), ParseError> {
        if let Some(exchange) = self.current.as_mut() {
            exchange.request_mut().headers_mut().append(&*self.field, String::from_utf8_lossy(value));
        }
        Ok(())
    }

    fn on_headers_complete(&mut self) -> HeadersVerdict {
        let Some(exchange) = self.current.as_mut() else {
            return HeadersVerdict::NoBodyNoMore;
        };

        let path = exchange.request().path().to_owned();
        match self.registry.find(&path) {
            Some(route) => {
                exchange.set_route_params(route.params);
                exchange.resource = Some(route.resource);
            }
            None => exchange.resource = self.registry.default_resource(),
        }
        exchange.close = !exchange.request_keeps_alive();

        let Some(resource) = exchange.resource.clone() else {
            debug!(%path, "no resource, answering 404");
            return HeadersVerdict::Continue;
        };

        if exchange.request().is_upgrade() && Self::try_upgrade(exchange) {
            return HeadersVerdict::NoBodyNoMore;
        }

        let headers = exchange.request().headers();
        let expects_continue = headers.has_token(KnownHeader::Expect, "100-continue");
        let body_parser = if headers.contains(KnownHeader::ContentLength) || headers.contains(KnownHeader::TransferEncoding) {
            self.parsers.select(headers.get(KnownHeader::ContentType))
        } else {
            None
        };

        exchange.continue_pending = expects_continue;
        if body_parser.is_some() {
            exchange.body_parser = body_parser;
            if let Err(e) = exchange.feed_body_parser(BodyEvent::Start) {
                reject_content(exchange, self.close_on_content_error, &e);
            }
        }

        resource.on_headers_complete(exchange);
        HeadersVerdict::Continue
    }

    fn on_body(&mut self, chunk: &[u8]) {
        let Some(exchange) = self.current.as_mut() else {
            return;
        };
        if exchange.content_error {
            return;
        }
        let Some(resource) = exchange.resource.clone() else {
            trace!(len = chunk.len(), "body of an unrouted request discarded");
            return;
        };

        if let Err(e) = exchange.feed_body_parser(BodyEvent::Data(chunk)) {
            reject_content(exchange, self.close_on_content_error, &e);
            return;
        }
        let accepted = resource.on_body(exchange, chunk);
        if accepted < chunk.len() {
            let cause = format!("resource accepted {accepted} of {} bytes", chunk.len());
            reject_content(exchange, self.close_on_content_error, &cause);
        }
    }

    fn on_message_complete(&mut self) {
        let Some(mut exchange) = self.current.take() else {
            return;
        };

        if !exchange.content_error
            && let Err(e) = exchange.feed_body_parser(BodyEvent::End)
        {
            reject_content(&mut exchange, self.close_on_content_error, &e);
        }

        if exchange.content_error {
            let response = exchange.response_mut();
            response.reset();
            response.set_status(StatusCode::BAD_REQUEST);
        } else if !exchange.upgrade {
            match exchange.resource.clone() {
                Some(resource) => resource.on_request_complete(&mut exchange),
                None => {
                    exchange.response_mut().set_status(StatusCode::NOT_FOUND);
                }
            }
        }

        trace!(method = %exchange.request().method(), path = exchange.request().path(), status = %exchange.response().status(), "request complete");
        if exchange.close || exchange.upgrade {
            *self.draining = true;
        }
        self.ready.push_back(exchange);
    }

    fn on_error(&mut self, error: &ParseError) {
        debug!(cause = %error, "partial request dropped");
        self.current.take();
    }

    fn is_paused(&self) -> bool {
        *self.draining || self.ready.len() + usize::from(self.in_flight) >= self.max_queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::BufferedTransport;
    use crate::server::{Resource, Router, resource_fn};
    use crate::stream::{BufferStream, MemoryStream, WriteStream};
    use indoc::indoc;

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/hello",
                resource_fn(|exchange: &mut Exchange| {
                    exchange.response_mut().set_body("hello");
                }),
            )
            .unwrap()
            .route(
                "/greet",
                resource_fn(|exchange: &mut Exchange| {
                    let name = exchange.request().param("name").unwrap_or("nobody").to_owned();
                    exchange.response_mut().set_body(format!("hi {name}"));
                }),
            )
            .unwrap()
            .route(
                "/users/{id}",
                resource_fn(|exchange: &mut Exchange| {
                    let id = exchange.route_param("id").unwrap_or_default().to_owned();
                    exchange.response_mut().set_body(id);
                }),
            )
            .unwrap()
            .route(
                "/tagged",
                resource_fn(|exchange: &mut Exchange| {
                    exchange.response_mut().set_body(MemoryStream::from(&b"tagged body"[..]).with_identity_tag("\"v1\""));
                }),
            )
            .unwrap()
    }

    struct Harness {
        server: ServerConnection,
        transport: BufferedTransport,
    }

    impl Harness {
        fn new(config: ConnectionConfig, registry: impl ResourceRegistry + 'static) -> Self {
            Self::with_transport(config, registry, BufferedTransport::new(64 * 1024))
        }

        fn with_transport(config: ConnectionConfig, registry: impl ResourceRegistry + 'static, transport: BufferedTransport) -> Self {
            let mut harness = Self { server: ServerConnection::new(config, Arc::new(registry)), transport };
            harness.server.handle(TransportEvent::Connected, &mut harness.transport).unwrap();
            harness
        }

        fn send(&mut self, data: &str) -> String {
            self.server.handle(TransportEvent::Data(data.as_bytes()), &mut self.transport).unwrap();
            self.output()
        }

        fn output(&mut self) -> String {
            String::from_utf8(self.transport.take_output().to_vec()).unwrap()
        }
    }

    #[test]
    fn answers_a_routed_request() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let output = harness.send(&crlf("GET /users/7 HTTP/1.1\nHost: x\n\n"));
        assert_eq!(output, crlf("HTTP/1.1 200 OK\nContent-Length: 1\n\n7"));
        assert!(Engine::is_idle(&harness.server));
    }

    #[test]
    fn unknown_path_is_404() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let output = harness.send(&crlf("POST /missing HTTP/1.1\nContent-Length: 3\n\nabc"));
        assert_eq!(output, crlf("HTTP/1.1 404 Not Found\nContent-Length: 0\n\n"));
        assert!(!harness.transport.is_closing());
    }

    #[test]
    fn default_resource_answers_unmatched_paths() {
        let registry = router().default_route(resource_fn(|exchange: &mut Exchange| {
            exchange.response_mut().set_status(StatusCode::GONE);
        }));
        let mut harness = Harness::new(ConnectionConfig::new(), registry);
        let output = harness.send(&crlf("GET /old HTTP/1.1\n\n"));
        assert!(output.starts_with("HTTP/1.1 410 Gone\r\n"));
    }

    #[test]
    fn pipelined_requests_are_answered_in_order() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let output = harness.send(&crlf(indoc! {"
            GET /users/1 HTTP/1.1

            GET /hello HTTP/1.1

            GET /users/2 HTTP/1.1

        "}));
        let bodies: Vec<&str> = output.split("\r\n\r\n").skip(1).map(|rest| rest.split("HTTP/1.1").next().unwrap_or("")).collect();
        assert_eq!(bodies, vec!["1", "hello", "2"]);
    }

    #[test]
    fn form_body_and_query_become_params() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let output = harness.send(&crlf(indoc! {"
            POST /greet?lang=en HTTP/1.1
            Content-Type: application/x-www-form-urlencoded
            Content-Length: 11

            name=Ferris"}));
        assert_eq!(output, crlf("HTTP/1.1 200 OK\nContent-Length: 9\n\nhi Ferris"));
    }

    #[test]
    fn expect_continue_gets_an_interim_response() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let head = crlf(indoc! {"
            POST /greet HTTP/1.1
            Content-Type: application/x-www-form-urlencoded
            Content-Length: 8
            Expect: 100-continue

        "});
        assert_eq!(harness.send(&head), "HTTP/1.1 100 Continue\r\n\r\n");

        let output = harness.send("name=Bob");
        assert_eq!(output, crlf("HTTP/1.1 200 OK\nContent-Length: 6\n\nhi Bob"));
    }

    #[test]
    fn matching_tag_turns_into_304() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let fresh = harness.send(&crlf("GET /tagged HTTP/1.1\n\n"));
        assert_eq!(fresh, crlf("HTTP/1.1 200 OK\nETag: \"v1\"\nContent-Length: 11\n\ntagged body"));

        let cached = harness.send(&crlf("GET /tagged HTTP/1.1\nIf-None-Match: \"v0\", \"v1\"\n\n"));
        assert_eq!(cached, crlf("HTTP/1.1 304 Not Modified\nETag: \"v1\"\n\n"));

        let stale = harness.send(&crlf("GET /tagged HTTP/1.1\nIf-None-Match: \"v2\"\n\n"));
        assert!(stale.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn matching_if_match_turns_into_304() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let cached = harness.send(&crlf("GET /tagged HTTP/1.1\nIf-Match: \"v1\"\n\n"));
        assert_eq!(cached, crlf("HTTP/1.1 304 Not Modified\nETag: \"v1\"\n\n"));

        let other = harness.send(&crlf("GET /tagged HTTP/1.1\nIf-Match: \"v9\"\n\n"));
        assert_eq!(other, crlf("HTTP/1.1 200 OK\nETag: \"v1\"\nContent-Length: 11\n\ntagged body"));
    }

    #[test]
    fn head_keeps_the_length_but_sends_no_body() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let output = harness.send(&crlf("HEAD /hello HTTP/1.1\n\nGET /hello HTTP/1.1\n\n"));
        assert_eq!(output, crlf("HTTP/1.1 200 OK\nContent-Length: 5\n\nHTTP/1.1 200 OK\nContent-Length: 5\n\nhello"));
    }

    #[test]
    fn connection_close_stops_after_the_response() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let output = harness.send(&crlf("GET /hello HTTP/1.1\nConnection: close\n\nGET /users/1 HTTP/1.1\n\n"));
        assert_eq!(output, crlf("HTTP/1.1 200 OK\nConnection: close\nContent-Length: 5\n\nhello"));
        assert!(harness.transport.is_closing());
        assert!(harness.server.is_closed());
    }

    #[test]
    fn http_10_keep_alive_is_explicit() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let kept = harness.send(&crlf("GET /hello HTTP/1.0\nConnection: keep-alive\n\n"));
        assert!(kept.contains("Connection: keep-alive\r\n"));
        assert!(!harness.server.is_closed());

        let closed = harness.send(&crlf("GET /hello HTTP/1.0\n\n"));
        assert!(closed.contains("Connection: close\r\n"));
        assert!(harness.server.is_closed());
    }

    #[test]
    fn http_10_open_body_is_delimited_by_close() {
        let registry = Router::new()
            .route(
                "/open",
                resource_fn(|exchange: &mut Exchange| {
                    let mut body = BufferStream::with_capacity(16);
                    body.write(b"data");
                    body.close();
                    exchange.response_mut().set_body(body);
                }),
            )
            .unwrap();
        let mut harness = Harness::new(ConnectionConfig::new(), registry);
        let output = harness.send(&crlf("GET /open HTTP/1.0\nConnection: keep-alive\n\n"));

        assert_eq!(output, crlf("HTTP/1.1 200 OK\nConnection: close\n\ndata"));
        assert!(harness.transport.is_closing());
        assert!(harness.server.is_closed());
    }

    #[test]
    fn header_table_is_reused_without_stale_values() {
        let registry = Router::new()
            .route(
                "/trace",
                resource_fn(|exchange: &mut Exchange| {
                    let trace = exchange.request().headers().get("X-Trace").unwrap_or("none").to_owned();
                    exchange.response_mut().set_body(trace);
                }),
            )
            .unwrap();
        let mut harness = Harness::new(ConnectionConfig::new(), registry);

        let first = harness.send(&crlf("GET /trace HTTP/1.1\nX-Trace: 7\n\n"));
        assert!(first.ends_with("\r\n\r\n7"));
        assert!(harness.server.spare_headers.is_some());

        let second = harness.send(&crlf("GET /trace HTTP/1.1\n\n"));
        assert!(second.ends_with("\r\n\r\nnone"));
        assert!(harness.server.spare_headers.is_some());
    }

    #[test]
    fn malformed_request_gets_400_and_close() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        let output = harness.send("GET /hello HTTP/1.1\r\nbroken header\r\n\r\n");
        assert_eq!(output, crlf("HTTP/1.1 400 Bad Request\nConnection: close\nContent-Length: 0\n\n"));
        assert!(harness.transport.is_closing());
    }

    #[test]
    fn refused_body_chunk_is_a_content_error() {
        struct Picky;
        impl Resource for Picky {
            fn on_body(&self, _exchange: &mut Exchange, _chunk: &[u8]) -> usize {
                0
            }

            fn on_request_complete(&self, exchange: &mut Exchange) {
                exchange.response_mut().set_body("never");
            }
        }

        let registry = Router::new().route("/upload", Picky).unwrap();
        let mut harness = Harness::new(ConnectionConfig::new(), registry);
        let output = harness.send(&crlf("PUT /upload HTTP/1.1\nContent-Length: 3\n\nabcGET /upload HTTP/1.1\n\n"));
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        // the connection survives, the next request is answered normally
        assert!(output.ends_with("never"));

        let registry = Router::new().route("/upload", Picky).unwrap();
        let mut strict = Harness::new(ConnectionConfig::new().with_close_on_content_error(true), registry);
        let output = strict.send(&crlf("PUT /upload HTTP/1.1\nContent-Length: 3\n\nabc"));
        assert!(output.contains("Connection: close\r\n"));
        assert!(strict.server.is_closed());
    }

    #[test]
    fn full_ready_queue_pauses_the_parser() {
        let config = ConnectionConfig::new().with_max_queued_responses(2);
        let mut harness = Harness::with_transport(config, router(), BufferedTransport::new(8));
        let requests = crlf("GET /hello HTTP/1.1\n\nGET /users/1 HTTP/1.1\n\nGET /users/2 HTTP/1.1\n\n");
        harness.server.handle(TransportEvent::Data(requests.as_bytes()), &mut harness.transport).unwrap();
        // one response in the sender, one queued, the third request still unparsed
        assert_eq!(harness.server.queued_responses(), 1);

        let mut output = String::new();
        for _ in 0..64 {
            output.push_str(&harness.output());
            harness.server.handle(TransportEvent::Drained, &mut harness.transport).unwrap();
        }
        output.push_str(&harness.output());
        assert!(output.ends_with("\r\n\r\n2"), "{output}");
        assert_eq!(output.matches("HTTP/1.1 200 OK").count(), 3);
        assert!(Engine::is_idle(&harness.server));
    }

    #[test]
    fn websocket_upgrade_hands_over_leftover_bytes() {
        struct Echo;
        impl Resource for Echo {
            fn on_request_complete(&self, exchange: &mut Exchange) {
                exchange.response_mut().set_status(StatusCode::UPGRADE_REQUIRED);
            }

            fn on_upgrade(&self, _exchange: &mut Exchange) -> bool {
                true
            }
        }

        let registry = Router::new().route("/ws", Echo).unwrap();
        let mut harness = Harness::new(ConnectionConfig::new(), registry);
        let mut request = crlf(indoc! {"
            GET /ws HTTP/1.1
            Host: example.com
            Upgrade: websocket
            Connection: Upgrade
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
            Sec-WebSocket-Version: 13

        "});
        request.push_str("\u{81}\u{0}");

        let output = harness.send(&request);
        assert_eq!(
            output,
            crlf(indoc! {"
                HTTP/1.1 101 Switching Protocols
                Upgrade: websocket
                Connection: Upgrade
                Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=

            "})
        );
        assert!(harness.server.is_closed());
        assert!(!harness.transport.is_closing());
        assert_eq!(&harness.server.take_upgraded().unwrap()[..], "\u{81}\u{0}".as_bytes());
    }

    #[test]
    fn bad_handshake_falls_back_to_the_resource() {
        struct Echo;
        impl Resource for Echo {
            fn on_request_complete(&self, exchange: &mut Exchange) {
                exchange.response_mut().set_status(StatusCode::UPGRADE_REQUIRED);
            }

            fn on_upgrade(&self, _exchange: &mut Exchange) -> bool {
                true
            }
        }

        let registry = Router::new().route("/ws", Echo).unwrap();
        let mut harness = Harness::new(ConnectionConfig::new(), registry);
        let output = harness.send(&crlf("GET /ws HTTP/1.1\nUpgrade: websocket\nConnection: Upgrade\nSec-WebSocket-Version: 13\n\n"));
        assert!(output.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(!harness.server.is_closed());
    }

    #[test]
    fn peer_close_drops_pending_work() {
        let mut harness = Harness::new(ConnectionConfig::new(), router());
        harness.send(&crlf("POST /greet HTTP/1.1\nContent-Length: 10\n\nname"));
        harness.server.handle(TransportEvent::Closed, &mut harness.transport).unwrap();
        assert!(harness.server.is_closed());
        assert!(Engine::is_idle(&harness.server));
        assert_eq!(harness.output(), "");
    }
}

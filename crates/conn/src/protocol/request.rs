//! The request value object shared by both roles.
//!
//! On the client a [`Request`] is built by the caller, handed to a connection and
//! carries the callbacks that observe its exchange: a headers hook, a body
//! delegate, the completion callback and a TLS initialisation hook. On the server
//! the connection builds one per incoming message.
//!
//! A request is owned by exactly one connection at a time. Its body moves into the
//! connection's sender when sending starts; with a retry budget an in-memory body
//! keeps a replay copy so that a challenge retry can send it again.

use std::fmt;

use http::uri::InvalidUri;
use http::{Extensions, Method, StatusCode, Uri, Version};
use tracing::{debug, warn};

use super::{ExchangeError, HeaderNameRef, HeaderTable, KnownHeader, Response, websocket};
use crate::client::{AuthAdapter, BasicAuth, Challenge, TlsSettings};
use crate::codec::HeadersVerdict;
use crate::stream::{BodyStream, WriteStream};

/// How many times a request is replayed after losing its connection.
pub const MAX_TRANSPORT_ATTEMPTS: u8 = 3;

pub type HeadersHook = Box<dyn FnMut(&Response) -> HeadersVerdict + Send>;
pub type BodyHook = Box<dyn FnMut(&Response, &[u8]) -> usize + Send>;
pub type CompletionHook = Box<dyn FnOnce(Completion<'_>) + Send>;
pub type TlsHook = Box<dyn FnMut(&TlsSettings) + Send>;

/// What the completion callback of a request receives.
#[derive(Debug)]
pub struct Completion<'a> {
    pub request: &'a Request,
    pub response: &'a mut Response,
    pub result: Result<(), ExchangeError>,
}

impl Completion<'_> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Default)]
struct Callbacks {
    on_headers: Option<HeadersHook>,
    on_body: Option<BodyHook>,
    on_complete: Option<CompletionHook>,
    on_tls: Option<TlsHook>,
}

pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderTable,
    params: Vec<(String, String)>,
    body: Option<BodyStream>,
    replay: Option<BodyStream>,
    body_taken: bool,
    capture: Option<Box<dyn WriteStream + Send>>,
    retries: u8,
    attempts: u8,
    auth: Option<Box<dyn AuthAdapter>>,
    callbacks: Callbacks,
    extensions: Extensions,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderTable::new(),
            params: Vec::new(),
            body: None,
            replay: None,
            body_taken: false,
            capture: None,
            retries: 0,
            attempts: 0,
            auth: None,
            callbacks: Callbacks::default(),
            extensions: Extensions::new(),
        }
    }

    pub fn get(uri: &str) -> Result<Self, InvalidUri> {
        Ok(Self::new(Method::GET, uri.parse()?))
    }

    pub fn head(uri: &str) -> Result<Self, InvalidUri> {
        Ok(Self::new(Method::HEAD, uri.parse()?))
    }

    pub fn post(uri: &str) -> Result<Self, InvalidUri> {
        Ok(Self::new(Method::POST, uri.parse()?))
    }

    pub fn put(uri: &str) -> Result<Self, InvalidUri> {
        Ok(Self::new(Method::PUT, uri.parse()?))
    }

    pub fn delete(uri: &str) -> Result<Self, InvalidUri> {
        Ok(Self::new(Method::DELETE, uri.parse()?))
    }

    /// A GET asking to switch the connection to the WebSocket protocol.
    pub fn websocket(uri: &str) -> Result<Self, InvalidUri> {
        let mut request = Self::get(uri)?;
        websocket::apply_upgrade_headers(&mut request.headers);
        Ok(request)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
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

    /// Query parameters on the server, parameters to send on the client.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&BodyStream> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut BodyStream> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<BodyStream> {
        self.body.take()
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn set_uri(&mut self, uri: Uri) -> &mut Self {
        self.uri = uri;
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

    pub fn add_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Sets the body, dropping a body set earlier.
    pub fn set_body(&mut self, body: impl Into<BodyStream>) -> &mut Self {
        if let Some(previous) = self.body.replace(body.into()) {
            warn!(kind = previous.kind(), "request body replaced, previous body dropped");
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

    /// Streams the response body into `stream` instead of buffering it.
    pub fn capture(&mut self, stream: impl WriteStream + Send + 'static) -> &mut Self {
        self.capture = Some(Box::new(stream));
        self
    }

    /// How many challenge retries the request may use.
    pub fn set_retries(&mut self, retries: u8) -> &mut Self {
        self.retries = retries;
        self
    }

    pub fn set_auth(&mut self, adapter: impl AuthAdapter + 'static) -> &mut Self {
        self.auth = Some(Box::new(adapter));
        self
    }

    /// Answers `Basic` challenges with these credentials, allowing one retry.
    pub fn basic_auth(&mut self, user: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.retries = self.retries.max(1);
        self.set_auth(BasicAuth::new(user, password))
    }

    pub fn on_headers<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&Response) -> HeadersVerdict + Send + 'static,
    {
        self.callbacks.on_headers = Some(Box::new(hook));
        self
    }

    /// Delegate for response body chunks; returns how many bytes it accepted.
    pub fn on_body<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&Response, &[u8]) -> usize + Send + 'static,
    {
        self.callbacks.on_body = Some(Box::new(hook));
        self
    }

    pub fn on_complete<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(Completion<'_>) + Send + 'static,
    {
        self.callbacks.on_complete = Some(Box::new(hook));
        self
    }

    pub fn on_tls<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&TlsSettings) + Send + 'static,
    {
        self.callbacks.on_tls = Some(Box::new(hook));
        self
    }

    /// GET and HEAD may share the pipeline with other GET and HEAD requests.
    pub fn is_pipelineable(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD)
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE)
    }

    pub fn is_upgrade(&self) -> bool {
        websocket::is_upgrade_request(&self.headers)
    }

    /// The request target as written on the request line.
    pub fn target(&self) -> &str {
        self.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }
}

// client side plumbing
impl Request {
    /// Finalizes the request before its first send: parameters go into the query or
    /// a form body, multipart bodies announce their boundary, `Host` is filled in,
    /// and a replay copy of the body is kept.
    pub(crate) fn prepare(&mut self) -> Result<(), ExchangeError> {
        if !self.params.is_empty() {
            let encoded = serde_urlencoded::to_string(&self.params).map_err(ExchangeError::aborted)?;
            let params = std::mem::take(&mut self.params);
            if self.body.is_none() && matches!(self.method, Method::POST | Method::PUT | Method::PATCH) {
                self.headers.set(KnownHeader::ContentType, mime::APPLICATION_WWW_FORM_URLENCODED.as_ref());
                self.body = Some(BodyStream::from(encoded));
            } else {
                let path = self.uri.path();
                let target = match self.uri.query() {
                    Some(query) => format!("{path}?{query}&{encoded}"),
                    None => format!("{path}?{encoded}"),
                };
                let mut parts = self.uri.clone().into_parts();
                parts.path_and_query = Some(target.parse().map_err(ExchangeError::aborted)?);
                self.uri = Uri::from_parts(parts).map_err(ExchangeError::aborted)?;
            }
            debug!(count = params.len(), uri = %self.uri, "request parameters encoded");
        }

        if let Some(BodyStream::Multipart(multipart)) = self.body.as_mut()
            && !self.headers.contains(KnownHeader::ContentType)
        {
            self.headers.set(KnownHeader::ContentType, multipart.content_type());
        }

        if !self.headers.contains(KnownHeader::Host)
            && let Some(authority) = self.uri.authority()
        {
            self.headers.set(KnownHeader::Host, authority.as_str());
        }

        if self.replay.is_none() && !self.body_taken {
            self.replay = self.body.as_ref().and_then(BodyStream::replay);
        }
        Ok(())
    }

    /// Moves the body into the connection's sender.
    pub(crate) fn take_body_for_send(&mut self) -> Option<BodyStream> {
        let body = self.body.take();
        self.body_taken = body.is_some();
        body
    }

    /// Puts the body back for another send; fails when it was consumed and cannot be replayed.
    pub(crate) fn rewind(&mut self) -> bool {
        if !self.body_taken {
            return true;
        }
        match &self.replay {
            Some(replay) => {
                self.body = replay.replay();
                self.body_taken = false;
                true
            }
            None => false,
        }
    }

    /// Whether the request can go out again after its connection was lost.
    pub(crate) fn is_retryable(&self) -> bool {
        self.is_idempotent() && self.attempts < MAX_TRANSPORT_ATTEMPTS && (!self.body_taken || self.replay.is_some())
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Prepares a retry answering an authentication challenge carried by `response`.
    pub(crate) fn answer_challenge(&mut self, response: &Response) -> bool {
        let (challenge_header, answer_header) = match response.status() {
            StatusCode::UNAUTHORIZED => (KnownHeader::WwwAuthenticate, KnownHeader::Authorization),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => (KnownHeader::ProxyAuthenticate, KnownHeader::ProxyAuthorization),
            _ => return false,
        };
        if self.retries == 0 {
            return false;
        }
        let Some(adapter) = self.auth.as_mut() else {
            return false;
        };

        let challenges = Challenge::parse_all(response.headers().get_all(challenge_header));
        let Some(answer) = challenges.iter().find_map(|challenge| adapter.authorize(challenge, &self.method, &self.uri)) else {
            debug!(status = response.status().as_u16(), "no usable authentication challenge");
            return false;
        };
        if !self.rewind() {
            warn!("authentication retry impossible, request body was consumed");
            return false;
        }

        self.headers.set(answer_header, answer);
        self.retries -= 1;
        debug!(retries_left = self.retries, "request answers authentication challenge");
        true
    }

    pub(crate) fn run_headers_hook(&mut self, response: &Response) -> HeadersVerdict {
        match self.callbacks.on_headers.as_mut() {
            Some(hook) => hook(response),
            None => HeadersVerdict::Continue,
        }
    }

    /// Offers a body chunk to the delegate, the capture stream or the response buffer.
    /// Returns how many bytes were accepted.
    pub(crate) fn deliver_body(&mut self, response: &mut Response, chunk: &[u8]) -> usize {
        if let Some(hook) = self.callbacks.on_body.as_mut() {
            return hook(response, chunk);
        }
        if let Some(capture) = self.capture.as_mut() {
            return capture.write(chunk);
        }
        response.buffer_write(chunk)
    }

    pub(crate) fn run_tls_hook(&mut self, settings: &TlsSettings) {
        if let Some(hook) = self.callbacks.on_tls.as_mut() {
            hook(settings);
        }
    }

    /// Ends the exchange: runs the completion callback and drops the request.
    pub(crate) fn complete(mut self, response: &mut Response, result: Result<(), ExchangeError>) {
        if let Err(e) = &result {
            debug!(cause = %e, method = %self.method, uri = %self.uri, "request failed");
        }
        if let Some(hook) = self.callbacks.on_complete.take() {
            hook(Completion { request: &self, response, result });
        }
    }
}

// server side plumbing
impl Request {
    pub(crate) fn incoming(method: Method, version: Version) -> Self {
        let mut request = Self::new(method, Uri::from_static("/"));
        request.version = version;
        request
    }

    /// An incoming request filling a header table left over from an earlier message.
    pub(crate) fn incoming_reusing(method: Method, version: Version, mut headers: HeaderTable) -> Self {
        headers.reset();
        let mut request = Self::incoming(method, version);
        request.headers = headers;
        request
    }

    /// Hands the header table back for the next message on the connection.
    pub(crate) fn take_headers(&mut self) -> HeaderTable {
        std::mem::take(&mut self.headers)
    }

    /// Sets the target of an incoming request and parses its query parameters.
    pub(crate) fn set_target(&mut self, target: &str) -> Result<(), InvalidUri> {
        self.uri = target.parse()?;
        self.params = self
            .uri
            .query()
            .and_then(|query| serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok())
            .unwrap_or_default();
        Ok(())
    }

    pub(crate) fn set_incoming_body(&mut self, body: BodyStream) {
        self.body = Some(body);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("body", &self.body.as_ref().map(BodyStream::kind))
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ByteStream, read_to_end};
    use std::sync::{Arc, Mutex};

    #[test]
    fn get_params_go_into_query() {
        let mut request = Request::get("http://example.com/search?lang=en").unwrap();
        request.add_param("q", "rust http").add_param("page", "2");
        request.prepare().unwrap();

        assert_eq!(request.target(), "/search?lang=en&q=rust+http&page=2");
        assert_eq!(request.headers().get(KnownHeader::Host), Some("example.com"));
        assert!(request.params().is_empty());
    }

    #[test]
    fn post_params_become_form_body() {
        let mut request = Request::post("http://example.com/login").unwrap();
        request.add_param("user", "ann").add_param("pass", "a&b");
        request.prepare().unwrap();

        assert_eq!(request.headers().get(KnownHeader::ContentType), Some("application/x-www-form-urlencoded"));
        let mut body = request.take_body().unwrap();
        assert_eq!(read_to_end(&mut body, 64).unwrap(), b"user=ann&pass=a%26b");
    }

    #[test]
    fn set_body_replaces_and_try_set_body_refuses() {
        let mut request = Request::post("/upload").unwrap();
        request.set_body("first").set_body("second");
        assert_eq!(request.body().and_then(BodyStream::content_length), Some(6));

        let rejected = request.try_set_body(BodyStream::from("third")).unwrap_err();
        assert_eq!(rejected.content_length(), Some(5));
    }

    #[test]
    fn replayable_body_can_rewind() {
        let mut request = Request::put("http://h/doc").unwrap();
        request.set_body("content");
        request.prepare().unwrap();

        let mut sent = request.take_body_for_send().unwrap();
        read_to_end(&mut sent, 3).unwrap();
        assert!(sent.is_finished());

        assert!(request.is_retryable());
        assert!(request.rewind());
        let mut again = request.take_body().unwrap();
        assert_eq!(read_to_end(&mut again, 64).unwrap(), b"content");
    }

    #[test]
    fn consumed_stream_body_is_not_retryable() {
        let mut request = Request::put("http://h/doc").unwrap();
        request.set_body(crate::stream::BufferStream::with_capacity(4));
        request.prepare().unwrap();
        let _ = request.take_body_for_send();

        assert!(!request.is_retryable());
        assert!(!request.rewind());
    }

    #[test]
    fn post_is_not_retryable() {
        let request = Request::post("http://h/").unwrap();
        assert!(!request.is_retryable());
        assert!(!request.is_pipelineable());
    }

    #[test]
    fn completion_callback_sees_result() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        let mut request = Request::get("http://h/").unwrap();
        request.on_complete(move |completion| {
            *sink.lock().unwrap() = Some((completion.response.status(), completion.result.clone()));
        });

        let mut response = Response::new();
        response.set_status(StatusCode::ACCEPTED);
        request.complete(&mut response, Err(ExchangeError::ConnectionClosed));

        let seen = seen.lock().unwrap().take().unwrap();
        assert_eq!(seen, (StatusCode::ACCEPTED, Err(ExchangeError::ConnectionClosed)));
    }

    #[test]
    fn basic_auth_answers_one_challenge() {
        let mut request = Request::get("http://h/private").unwrap();
        request.basic_auth("Aladdin", "open sesame");

        let mut response = Response::new();
        response.set_status(StatusCode::UNAUTHORIZED).header(KnownHeader::WwwAuthenticate, "Basic realm=\"x\"");

        assert!(request.answer_challenge(&response));
        assert_eq!(request.headers().get(KnownHeader::Authorization), Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="));
        assert_eq!(request.retries(), 0);
        assert!(!request.answer_challenge(&response));
    }

    #[test]
    fn incoming_target_parses_query() {
        let mut request = Request::incoming(Method::GET, Version::HTTP_11);
        request.set_target("/index/?a=1&b=2&a=3").unwrap();
        assert_eq!(request.path(), "/index/");
        assert_eq!(request.param("a"), Some("1"));
        assert_eq!(request.params().len(), 3);
    }
}

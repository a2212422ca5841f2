use std::sync::Arc;

use super::{BodyEvent, BodyParser, Resource};
use crate::protocol::{KnownHeader, ParseError, Request, Response};
use http::Version;

/// One request/response pair on a server connection.
///
/// Resources receive the exchange in each of their hooks: the request is filled
/// in as it arrives and the resource writes its answer into the response.
pub struct Exchange {
    request: Request,
    response: Response,
    route_params: Vec<(String, String)>,
    pub(crate) resource: Option<Arc<dyn Resource>>,
    pub(crate) body_parser: Option<Box<dyn BodyParser>>,
    pub(crate) content_error: bool,
    pub(crate) continue_pending: bool,
    pub(crate) upgrade: bool,
    pub(crate) close: bool,
}

impl Exchange {
    pub(crate) fn new(request: Request) -> Self {
        Self {
            request,
            response: Response::new(),
            route_params: Vec::new(),
            resource: None,
            body_parser: None,
            content_error: false,
            continue_pending: false,
            upgrade: false,
            close: false,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// A parameter captured by the route pattern, such as `id` in `/users/{id}`.
    pub fn route_param(&self, name: &str) -> Option<&str> {
        self.route_params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn route_params(&self) -> &[(String, String)] {
        &self.route_params
    }

    /// Whether a body chunk was rejected; the exchange is answered with `400`.
    pub fn has_content_error(&self) -> bool {
        self.content_error
    }

    /// Whether the connection closes after this exchange.
    pub fn closes_connection(&self) -> bool {
        self.close
    }

    pub(crate) fn set_route_params(&mut self, params: Vec<(String, String)>) {
        self.route_params = params;
    }

    /// Hands a body event to the selected body parser, if any.
    pub(crate) fn feed_body_parser(&mut self, event: BodyEvent<'_>) -> Result<(), ParseError> {
        match self.body_parser.as_mut() {
            Some(parser) => parser.on_event(event, &mut self.request),
            None => Ok(()),
        }
    }

    pub(crate) fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }

    /// Whether the request lets the connection stay open after the response.
    pub(crate) fn request_keeps_alive(&self) -> bool {
        let headers = self.request.headers();
        if headers.has_token(KnownHeader::Connection, "close") {
            return false;
        }
        self.request.version() != Version::HTTP_10 || headers.has_token(KnownHeader::Connection, "keep-alive")
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("route_params", &self.route_params)
            .field("content_error", &self.content_error)
            .field("close", &self.close)
            .finish_non_exhaustive()
    }
}

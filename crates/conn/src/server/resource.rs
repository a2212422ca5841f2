//! Resources answer requests; a [`ResourceRegistry`] finds the resource for a path.
//!
//! Resources are shared by every connection of a server, so their hooks take
//! `&self`. Per-request state belongs in the [`Exchange`] or in the request's
//! extensions.

use std::fmt;
use std::sync::Arc;

use matchit::InsertError;
use tracing::{debug, error};

use super::Exchange;

pub trait Resource: Send + Sync {
    /// The request head arrived, before any body bytes.
    fn on_headers_complete(&self, _exchange: &mut Exchange) {}

    /// A chunk of the request body. Returns how many bytes were accepted;
    /// accepting fewer marks a content error and the exchange is answered
    /// with `400`.
    fn on_body(&self, _exchange: &mut Exchange, chunk: &[u8]) -> usize {
        chunk.len()
    }

    /// The whole request arrived; the resource fills in the response.
    fn on_request_complete(&self, exchange: &mut Exchange);

    /// Whether to switch protocols for an upgrade request. Refused by default,
    /// and the request is then completed like any other.
    fn on_upgrade(&self, _exchange: &mut Exchange) -> bool {
        false
    }
}

/// The resource matched for a path together with the captured parameters.
#[derive(Clone)]
pub struct Route {
    pub resource: Arc<dyn Resource>,
    pub params: Vec<(String, String)>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("params", &self.params).finish_non_exhaustive()
    }
}

pub trait ResourceRegistry: Send + Sync {
    fn find(&self, path: &str) -> Option<Route>;

    /// Answers requests no path matches; without one they get `404`.
    fn default_resource(&self) -> Option<Arc<dyn Resource>> {
        None
    }
}

/// A [`ResourceRegistry`] backed by a `matchit` route table.
pub struct Router {
    inner_router: matchit::Router<Arc<dyn Resource>>,
    default: Option<Arc<dyn Resource>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { inner_router: matchit::Router::new(), default: None }
    }

    /// Registers `resource` for a route pattern such as `/users/{id}`.
    pub fn route(mut self, path: &str, resource: impl Resource + 'static) -> Result<Self, InsertError> {
        self.inner_router.insert(path, Arc::new(resource))?;
        Ok(self)
    }

    pub fn default_route(mut self, resource: impl Resource + 'static) -> Self {
        self.default = Some(Arc::new(resource));
        self
    }
}

impl ResourceRegistry for Router {
    fn find(&self, path: &str) -> Option<Route> {
        match self.inner_router.at(path) {
            Ok(matched) => {
                let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
                Some(Route { resource: Arc::clone(matched.value), params })
            }
            Err(e) => {
                if self.default.is_none() {
                    error!("match '{}' error: {}", path, e);
                } else {
                    debug!("match '{}' falls back to the default resource", path);
                }
                None
            }
        }
    }

    fn default_resource(&self) -> Option<Arc<dyn Resource>> {
        self.default.clone()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("has_default", &self.default.is_some()).finish_non_exhaustive()
    }
}

/// A resource that only answers complete requests, built from a closure.
pub struct ResourceFn<F> {
    f: F,
}

impl<F> Resource for ResourceFn<F>
where
    F: Fn(&mut Exchange) + Send + Sync,
{
    fn on_request_complete(&self, exchange: &mut Exchange) {
        (self.f)(exchange);
    }
}

pub fn resource_fn<F>(f: F) -> ResourceFn<F>
where
    F: Fn(&mut Exchange) + Send + Sync,
{
    ResourceFn { f }
}

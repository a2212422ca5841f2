//! Client connections indexed by destination.
//!
//! The pool owns one [`ClientConnection`] per `host:port` (and scheme) and the
//! transport it currently runs on. Opening transports is left to a
//! [`Connector`]; the pool only decides when a destination needs one, forwards
//! the per-destination [`TlsSettings`] to the queued requests before the
//! handshake, and routes transport events to the right connection.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use http::Uri;
use tracing::{debug, error, info};

use super::ClientConnection;
use crate::config::ConnectionConfig;
use crate::connection::{Engine, Transport, TransportEvent};
use crate::protocol::{ExchangeError, HttpError, PoolError, Request};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: u16,
    secure: bool,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self { host: host.into().to_ascii_lowercase(), port, secure }
    }

    /// The destination a request uri points at; default ports follow the scheme.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let host = uri.host()?;
        let secure = matches!(uri.scheme_str(), Some("https" | "wss"));
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        Some(Self::new(host, port, secure))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// TLS material attached to a pooled connection.
///
/// The engine does not perform handshakes. These values are handed to the
/// connector and to each queued request's TLS hook before one starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    server_name: Option<String>,
    session_id: Option<Bytes>,
    pins: Vec<String>,
    client_certificate: Option<Bytes>,
    client_key: Option<Bytes>,
}

impl TlsSettings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Adds an accepted certificate pin, such as a base64 SPKI digest.
    #[must_use]
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pins.push(pin.into());
        self
    }

    #[must_use]
    pub fn with_client_identity(mut self, certificate: impl Into<Bytes>, key: impl Into<Bytes>) -> Self {
        self.client_certificate = Some(certificate.into());
        self.client_key = Some(key.into());
        self
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// The cached session id of the last handshake, for resumption.
    pub fn session_id(&self) -> Option<&Bytes> {
        self.session_id.as_ref()
    }

    pub fn set_session_id(&mut self, id: impl Into<Bytes>) {
        self.session_id = Some(id.into());
    }

    pub fn pins(&self) -> &[String] {
        &self.pins
    }

    pub fn client_certificate(&self) -> Option<&Bytes> {
        self.client_certificate.as_ref()
    }

    pub fn client_key(&self) -> Option<&Bytes> {
        self.client_key.as_ref()
    }
}

/// Opens transports for the pool.
pub trait Connector {
    type Transport: Transport;

    /// Starts a connection to `destination`. TLS destinations get `tls` for their handshake.
    fn connect(&mut self, destination: &Destination, tls: &mut TlsSettings) -> Result<Self::Transport, HttpError>;
}

struct Pooled<T> {
    connection: ClientConnection,
    transport: Option<T>,
    tls: TlsSettings,
}

impl<T: Transport> Pooled<T> {
    fn is_live(&self) -> bool {
        self.connection.is_connected() && self.transport.as_ref().is_some_and(Transport::is_connected)
    }
}

pub struct ConnectionPool<C: Connector> {
    connector: C,
    config: ConnectionConfig,
    connections: HashMap<Destination, Pooled<C::Transport>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self { connector, config, connections: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Attaches TLS settings to the connection of `destination`.
    pub fn set_tls(&mut self, destination: &Destination, settings: TlsSettings) {
        self.entry(destination).tls = settings;
    }

    /// Routes a request to the connection of its destination.
    pub fn send(&mut self, request: Request) -> Result<Destination, PoolError> {
        let destination = Destination::from_uri(request.uri()).ok_or_else(|| PoolError::NoDestination { uri: request.uri().to_string() })?;
        self.entry(&destination).connection.send(request)?;
        Ok(destination)
    }

    /// Opens transports for destinations with queued work and lets every live
    /// connection send.
    pub fn dispatch(&mut self) -> Result<(), PoolError> {
        let mut failure = None;
        for (destination, pooled) in &mut self.connections {
            if !pooled.connection.has_pending_work() {
                continue;
            }

            if !pooled.is_live() {
                pooled.connection.prepare_tls(&pooled.tls);
                match self.connector.connect(destination, &mut pooled.tls) {
                    Ok(transport) => {
                        info!(%destination, secure = destination.is_secure(), "pooled connection opened");
                        pooled.transport = Some(transport);
                        if let Some(transport) = pooled.transport.as_mut() {
                            Self::deliver(&mut pooled.connection, transport, TransportEvent::Connected);
                        }
                    }
                    Err(e) => {
                        error!(%destination, cause = %e, "can't open connection");
                        let reason = ExchangeError::aborted(&e);
                        pooled.connection.fail_pending(&reason);
                        failure.get_or_insert(PoolError::Connect { destination: destination.to_string(), reason: e.to_string() });
                    }
                }
                continue;
            }

            if let Some(transport) = pooled.transport.as_mut() {
                Self::deliver(&mut pooled.connection, transport, TransportEvent::Poll);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Hands a transport event to the connection of `destination`.
    pub fn handle(&mut self, destination: &Destination, event: TransportEvent<'_>) -> Result<(), HttpError> {
        let Some(pooled) = self.connections.get_mut(destination) else {
            debug!(%destination, "event for unknown destination ignored");
            return Ok(());
        };
        let Some(transport) = pooled.transport.as_mut() else {
            return Ok(());
        };

        let result = pooled.connection.handle(event, transport);
        if matches!(event, TransportEvent::Closed) {
            pooled.transport = None;
        }
        result
    }

    /// Evicts connections that are no longer connected and have no pending work.
    /// Returns how many were evicted.
    pub fn cleanup(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|destination, pooled| {
            let keep = pooled.is_live() || pooled.connection.has_pending_work();
            if !keep {
                debug!(%destination, "pooled connection evicted");
            }
            keep
        });
        before - self.connections.len()
    }

    pub fn connection(&self, destination: &Destination) -> Option<&ClientConnection> {
        self.connections.get(destination).map(|p| &p.connection)
    }

    pub fn transport_mut(&mut self, destination: &Destination) -> Option<&mut C::Transport> {
        self.connections.get_mut(destination).and_then(|p| p.transport.as_mut())
    }

    fn entry(&mut self, destination: &Destination) -> &mut Pooled<C::Transport> {
        self.connections.entry(destination.clone()).or_insert_with(|| Pooled {
            connection: ClientConnection::new(self.config.clone()),
            transport: None,
            tls: TlsSettings::default(),
        })
    }

    fn deliver(connection: &mut ClientConnection, transport: &mut C::Transport, event: TransportEvent<'_>) {
        // failures already completed the affected requests
        if let Err(e) = connection.handle(event, transport) {
            debug!(cause = %e, "pooled connection failed");
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.connections.iter().map(|(d, p)| (d.to_string(), &p.connection))).finish()
    }
}

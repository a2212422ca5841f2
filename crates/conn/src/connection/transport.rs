//! The transport seam between the engine and the socket layer.
//!
//! The engine never touches sockets. It writes into a [`Transport`], which may
//! accept fewer bytes than offered, and it is woken by [`TransportEvent`]s.
//! [`BufferedTransport`] is the in-memory implementation used by the tokio
//! [`IoDriver`](super::IoDriver) and by tests.

use bytes::BytesMut;
use tracing::debug;

/// What the socket layer reports to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent<'a> {
    Connected,
    /// Bytes received from the peer.
    Data(&'a [u8]),
    /// Everything written so far has left the send buffer.
    Drained,
    /// Periodic tick while nothing else happens.
    Poll,
    /// The peer or the socket layer closed the connection.
    Closed,
}

pub trait Transport {
    /// Offers bytes and returns how many were accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Room left in the send buffer, when the transport knows it.
    fn capacity(&self) -> Option<usize> {
        None
    }

    fn is_connected(&self) -> bool;

    /// Requests the connection to be closed once the buffered bytes are out.
    fn close(&mut self);
}

/// A bounded outbox in memory.
#[derive(Debug)]
pub struct BufferedTransport {
    outbox: BytesMut,
    limit: usize,
    connected: bool,
    closing: bool,
}

impl BufferedTransport {
    pub fn new(limit: usize) -> Self {
        Self { outbox: BytesMut::with_capacity(limit.min(64 * 1024)), limit: limit.max(1), connected: true, closing: false }
    }

    /// Hands out everything written so far.
    pub fn take_output(&mut self) -> BytesMut {
        self.outbox.split()
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn has_output(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if connected {
            self.closing = false;
        }
    }
}

impl Transport for BufferedTransport {
    fn write(&mut self, data: &[u8]) -> usize {
        if !self.connected || self.closing {
            return 0;
        }
        let n = self.limit.saturating_sub(self.outbox.len()).min(data.len());
        self.outbox.extend_from_slice(&data[..n]);
        n
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.limit.saturating_sub(self.outbox.len()))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        if !self.closing {
            debug!(pending = self.outbox.len(), "transport close requested");
        }
        self.closing = true;
    }
}

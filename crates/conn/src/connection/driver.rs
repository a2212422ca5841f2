use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::time::{Instant, sleep};
use tracing::{error, info, trace};

use super::transport::{BufferedTransport, Transport, TransportEvent};
use crate::config::ConnectionConfig;
use crate::protocol::{HttpError, ParseError, SendError};

/// A role of the engine, client or server, as seen by a driver.
pub trait Engine {
    /// Reacts to one transport event, writing whatever became sendable.
    fn handle(&mut self, event: TransportEvent<'_>, transport: &mut dyn Transport) -> Result<(), HttpError>;

    /// The engine wants no further events; the socket may be shut down.
    fn is_closed(&self) -> bool;

    /// Nothing queued and nothing in flight.
    fn is_idle(&self) -> bool;

    /// Bytes following a protocol switch, once HTTP processing stopped.
    fn take_upgraded(&mut self) -> Option<BytesMut> {
        None
    }
}

/// Why a driver returned.
#[derive(Debug, PartialEq, Eq)]
pub enum Exit {
    Closed,
    /// Returned by [`IoDriver::run_until_idle`] once the engine has no more work.
    Idle,
    TimedOut,
    /// The connection switched protocols; the bytes already read belong to the new protocol.
    Upgraded(BytesMut),
}

/// Drives an [`Engine`] over tokio I/O halves.
///
/// Socket readiness is mapped onto the transport events: bytes read become
/// [`TransportEvent::Data`], a completed flush becomes [`TransportEvent::Drained`],
/// a quiet period becomes [`TransportEvent::Poll`], and end of stream becomes
/// [`TransportEvent::Closed`].
pub struct IoDriver<R, W> {
    reader: R,
    writer: W,
    transport: BufferedTransport,
    read_buf: BytesMut,
    poll_interval: Duration,
    idle_timeout: Duration,
    connected: bool,
}

impl<R, W> IoDriver<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, config: &ConnectionConfig) -> Self {
        Self {
            reader,
            writer,
            transport: BufferedTransport::new(config.write_buffer_size),
            read_buf: BytesMut::with_capacity(8 * 1024),
            poll_interval: config.poll_interval,
            idle_timeout: config.idle_timeout,
            connected: false,
        }
    }

    /// Runs until the connection closes, times out or switches protocols.
    pub async fn run<E: Engine>(&mut self, engine: &mut E) -> Result<Exit, HttpError> {
        self.drive(engine, false).await
    }

    /// Like [`run`](Self::run) but also returns as soon as the engine is idle.
    pub async fn run_until_idle<E: Engine>(&mut self, engine: &mut E) -> Result<Exit, HttpError> {
        self.drive(engine, true).await
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    async fn drive<E: Engine>(&mut self, engine: &mut E, stop_when_idle: bool) -> Result<Exit, HttpError> {
        if !self.connected {
            self.connected = true;
            engine.handle(TransportEvent::Connected, &mut self.transport)?;
        }

        let mut last_activity = Instant::now();
        loop {
            self.flush(engine).await?;

            if let Some(leftover) = engine.take_upgraded() {
                info!(leftover = leftover.len(), "connection switched protocols, stop http processing");
                return Ok(Exit::Upgraded(leftover));
            }
            if engine.is_closed() || self.transport.is_closing() {
                info!("engine finished, shut this connection down");
                self.writer.shutdown().await.map_err(SendError::io)?;
                return Ok(Exit::Closed);
            }
            if stop_when_idle && engine.is_idle() {
                return Ok(Exit::Idle);
            }

            select! {
                read = self.reader.read_buf(&mut self.read_buf) => match read {
                    Ok(0) => {
                        info!("cant read more bytes, peer closed this connection");
                        self.transport.set_connected(false);
                        engine.handle(TransportEvent::Closed, &mut self.transport)?;
                        return Ok(Exit::Closed);
                    }
                    Ok(n) => {
                        trace!(len = n, "bytes received");
                        last_activity = Instant::now();
                        let data = self.read_buf.split();
                        engine.handle(TransportEvent::Data(&data), &mut self.transport)?;
                    }
                    Err(e) => {
                        error!(cause = %e, "can't read from connection");
                        self.transport.set_connected(false);
                        engine.handle(TransportEvent::Closed, &mut self.transport)?;
                        return Err(ParseError::io(e).into());
                    }
                },
                () = sleep(self.poll_interval) => {
                    engine.handle(TransportEvent::Poll, &mut self.transport)?;
                    if last_activity.elapsed() >= self.idle_timeout {
                        info!(timeout = ?self.idle_timeout, "connection idle for too long, close it");
                        self.transport.set_connected(false);
                        engine.handle(TransportEvent::Closed, &mut self.transport)?;
                        self.writer.shutdown().await.map_err(SendError::io)?;
                        return Ok(Exit::TimedOut);
                    }
                }
            }
        }
    }

    /// Writes out everything the engine produced, reporting each drain back to it.
    async fn flush<E: Engine>(&mut self, engine: &mut E) -> Result<(), HttpError> {
        while self.transport.has_output() {
            let out = self.transport.take_output();
            self.writer.write_all(&out).await.map_err(SendError::io)?;
            self.writer.flush().await.map_err(SendError::io)?;
            trace!(len = out.len(), "bytes flushed");
            engine.handle(TransportEvent::Drained, &mut self.transport)?;
        }
        Ok(())
    }
}

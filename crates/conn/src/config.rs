//! Per-connection limits and policies.
//!
//! A [`ConnectionConfig`] is an owned value handed to every connection, pool and
//! driver. Nothing reads configuration from globals.

use crate::codec::header::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Upper bound for one message head.
    pub max_header_bytes: usize,
    /// Upper bound for the number of headers of one message, at most 64.
    pub max_headers: usize,
    /// Size of the scratch buffer a body is pumped through.
    pub write_buffer_size: usize,
    /// How many body bytes a response buffers when nobody consumes them.
    pub response_buffer_limit: usize,
    /// Capacity of the client Waiting queue.
    pub waiting_capacity: usize,
    /// Capacity of the client Executing queue, the pipelining depth. Treated as at least 1.
    pub executing_capacity: usize,
    /// Whether the client pipelines GET/HEAD requests.
    pub pipelining: bool,
    /// Whether a rejected body chunk aborts the connection instead of only marking the exchange.
    pub close_on_content_error: bool,
    /// How many parsed server requests may wait for their response before the parser pauses.
    pub max_queued_responses: usize,
    /// Interval of idle-poll events emitted by the async driver.
    pub poll_interval: Duration,
    /// Connection is closed after this long without traffic.
    pub idle_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: MAX_HEADER_BYTES,
            max_headers: MAX_HEADER_NUM,
            write_buffer_size: 16 * 1024,
            response_buffer_limit: 4 * 1024 * 1024,
            waiting_capacity: 64,
            executing_capacity: 8,
            pipelining: true,
            close_on_content_error: false,
            max_queued_responses: 16,
            poll_interval: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    #[must_use]
    pub fn with_max_headers(mut self, max_headers: usize) -> Self {
        self.max_headers = max_headers.min(MAX_HEADER_NUM);
        self
    }

    #[must_use]
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_response_buffer_limit(mut self, limit: usize) -> Self {
        self.response_buffer_limit = limit;
        self
    }

    #[must_use]
    pub fn with_waiting_capacity(mut self, capacity: usize) -> Self {
        self.waiting_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_executing_capacity(mut self, capacity: usize) -> Self {
        self.executing_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_pipelining(mut self, pipelining: bool) -> Self {
        self.pipelining = pipelining;
        self
    }

    #[must_use]
    pub fn with_close_on_content_error(mut self, close: bool) -> Self {
        self.close_on_content_error = close;
        self
    }

    #[must_use]
    pub fn with_max_queued_responses(mut self, max: usize) -> Self {
        self.max_queued_responses = max.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

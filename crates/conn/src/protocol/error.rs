use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("connection aborted: {reason}")]
    Aborted { reason: String },
}

impl HttpError {
    pub fn aborted<S: ToString>(str: S) -> Self {
        Self::Aborted { reason: str.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid http status: {0:?}")]
    InvalidStatus(Option<u16>),

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("connection closed in the middle of a message")]
    Incomplete,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Failure of a [`ByteStream`](crate::stream::ByteStream) cursor operation.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream can only seek forward, requested offset {offset}")]
    ForwardOnly { offset: i64 },

    #[error("seek offset {offset} out of range")]
    OutOfRange { offset: i64 },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// A bounded queue rejected an element.
///
/// The rejected element is dropped by the caller that attempted the enqueue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full, capacity {capacity}")]
    Full { capacity: usize },
}

/// The outcome handed to a request's completion callback when the exchange failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("connection closed before the response completed")]
    ConnectionClosed,

    #[error("malformed response: {reason}")]
    Parse { reason: String },

    #[error("response body rejected by the consumer")]
    ContentRejected,

    #[error("upgrade rejected: {reason}")]
    UpgradeRejected { reason: String },

    #[error("request could not be sent: {reason}")]
    Aborted { reason: String },
}

impl ExchangeError {
    pub fn parse<S: ToString>(str: S) -> Self {
        Self::Parse { reason: str.to_string() }
    }

    pub fn upgrade_rejected<S: ToString>(str: S) -> Self {
        Self::UpgradeRejected { reason: str.to_string() }
    }

    pub fn aborted<S: ToString>(str: S) -> Self {
        Self::Aborted { reason: str.to_string() }
    }
}

/// Failure to route a request through a connection pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("request uri has no host: {uri}")]
    NoDestination { uri: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("connect to {destination} failed: {reason}")]
    Connect { destination: String, reason: String },
}

//! The role independent part of a connection.
//!
//! # Components
//!
//! - [`transition`]: the send side state machine as a pure function over
//!   [`SendState`] and [`SendInput`]
//! - [`Sender`]: carries out the machine's [`Effect`]s, writing heads and pumping
//!   bodies into a [`Transport`] until no more progress is possible
//! - [`Transport`] and [`TransportEvent`]: the seam to the socket layer, with
//!   [`BufferedTransport`] as the in-memory implementation
//! - [`IoDriver`]: runs an [`Engine`] (a client or server connection) over tokio
//!   I/O halves
//!
//! Nothing here blocks. Waiting means staying in a state until the next
//! transport event arrives.

mod driver;
mod sender;
mod state;
mod transport;

pub use driver::{Engine, Exit, IoDriver};
pub use sender::{Progress, Sender, body_framing, encode_head};
pub use state::{Effect, SendInput, SendState, transition};
pub use transport::{BufferedTransport, Transport, TransportEvent};

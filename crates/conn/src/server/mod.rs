//! Server dispatch: resources, body parsers and the server role of a connection.

mod body_parser;
mod connection;
mod exchange;
mod resource;

pub use body_parser::{BodyEvent, BodyParser, BodyParsers, BufferParser, FormParser};
pub use connection::ServerConnection;
pub use exchange::Exchange;
pub use resource::{Resource, ResourceFn, ResourceRegistry, Route, Router, resource_fn};

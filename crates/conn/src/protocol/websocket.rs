//! WebSocket opening handshake helpers (RFC 6455 section 4).
//!
//! Only the HTTP side of the upgrade lives here: generating the client key,
//! computing the accept value and checking both ends of the exchange. Once the
//! handshake completes the connection stops speaking HTTP and hands its leftover
//! bytes to whoever owns the socket next.

use super::{ExchangeError, HeaderTable, KnownHeader};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WEBSOCKET_VERSION: &str = "13";

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// The `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Writes the upgrade request headers, returning the generated key.
pub fn apply_upgrade_headers(headers: &mut HeaderTable) -> String {
    let key = generate_key();
    headers
        .set(KnownHeader::Upgrade, "websocket")
        .set(KnownHeader::Connection, "Upgrade")
        .set(KnownHeader::SecWebSocketKey, key.clone())
        .set(KnownHeader::SecWebSocketVersion, WEBSOCKET_VERSION);
    key
}

/// Whether the headers ask for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderTable) -> bool {
    headers.has_token(KnownHeader::Upgrade, "websocket") && headers.has_token(KnownHeader::Connection, "upgrade")
}

/// Checks an incoming upgrade request and returns the accept value to answer with.
pub fn server_accept(headers: &HeaderTable) -> Result<String, ExchangeError> {
    if !is_upgrade_request(headers) {
        return Err(ExchangeError::upgrade_rejected("missing upgrade tokens"));
    }
    if !headers.has_token(KnownHeader::SecWebSocketVersion, WEBSOCKET_VERSION) {
        return Err(ExchangeError::upgrade_rejected("unsupported websocket version"));
    }
    let key = headers
        .get(KnownHeader::SecWebSocketKey)
        .ok_or_else(|| ExchangeError::upgrade_rejected("missing Sec-WebSocket-Key"))?;

    match STANDARD.decode(key.trim()) {
        Ok(nonce) if nonce.len() == 16 => Ok(accept_key(key)),
        _ => Err(ExchangeError::upgrade_rejected("malformed Sec-WebSocket-Key")),
    }
}

/// Checks a `101 Switching Protocols` answer against the request that asked for it.
pub fn validate_accept(request: &HeaderTable, response: &HeaderTable) -> Result<(), ExchangeError> {
    let key = request
        .get(KnownHeader::SecWebSocketKey)
        .ok_or_else(|| ExchangeError::upgrade_rejected("request carried no Sec-WebSocket-Key"))?;

    if !response.has_token(KnownHeader::Upgrade, "websocket") {
        return Err(ExchangeError::upgrade_rejected("response does not upgrade to websocket"));
    }

    match response.get(KnownHeader::SecWebSocketAccept) {
        Some(accept) if accept.trim() == accept_key(key) => Ok(()),
        Some(_) => Err(ExchangeError::upgrade_rejected("Sec-WebSocket-Accept mismatch")),
        None => Err(ExchangeError::upgrade_rejected("missing Sec-WebSocket-Accept")),
    }
}

//! Ordered, case-insensitive header storage.
//!
//! [`HeaderTable`] keeps one value per header name in insertion order. Names that
//! appear in [`KnownHeader`] are stored in a fixed inline array indexed by the
//! enum discriminant, so reading or writing them never searches. Any other name is
//! interned once into a growable name table and looked up by scanning it, the value
//! itself living in a map keyed by the interned index.
//!
//! A header that legitimately occurs several times on the wire (for example
//! `Sec-WebSocket-Version` or `Set-Cookie`) is kept as a single value whose parts are
//! joined with `\0`; [`HeaderTable::lines`] expands it back into one line per part.
//!
//! Clearing a table keeps both the inline array and the interned custom names, so a
//! table reused for the same kind of message does not allocate again for the same
//! names. [`HeaderTable::reset`] also forgets the custom names; tables that live as
//! long as a connection are reset between messages so names chosen by the peer do
//! not pile up.

use std::collections::HashMap;
use std::fmt;

/// Separator used to join the parts of a multi-valued header.
pub const MULTI_VALUE_SEPARATOR: char = '\0';

macro_rules! known_headers {
    ($($variant:ident => $name:literal,)+) => {
        /// Well-known header names with O(1) storage in a [`HeaderTable`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum KnownHeader {
            $($variant,)+
        }

        impl KnownHeader {
            /// Every well-known header, in discriminant order.
            pub const ALL: &'static [KnownHeader] = &[$(KnownHeader::$variant,)+];

            /// Number of well-known headers.
            pub const COUNT: usize = Self::ALL.len();

            /// Canonical spelling used when the header is written.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(KnownHeader::$variant => $name,)+
                }
            }
        }
    };
}

known_headers! {
    Accept => "Accept",
    AcceptEncoding => "Accept-Encoding",
    Authorization => "Authorization",
    CacheControl => "Cache-Control",
    Connection => "Connection",
    ContentDisposition => "Content-Disposition",
    ContentLength => "Content-Length",
    ContentType => "Content-Type",
    Cookie => "Cookie",
    Date => "Date",
    ETag => "ETag",
    Expect => "Expect",
    Host => "Host",
    IfMatch => "If-Match",
    IfNoneMatch => "If-None-Match",
    KeepAlive => "Keep-Alive",
    Location => "Location",
    Origin => "Origin",
    ProxyAuthenticate => "Proxy-Authenticate",
    ProxyAuthorization => "Proxy-Authorization",
    SecWebSocketAccept => "Sec-WebSocket-Accept",
    SecWebSocketKey => "Sec-WebSocket-Key",
    SecWebSocketProtocol => "Sec-WebSocket-Protocol",
    SecWebSocketVersion => "Sec-WebSocket-Version",
    Server => "Server",
    SetCookie => "Set-Cookie",
    TransferEncoding => "Transfer-Encoding",
    Upgrade => "Upgrade",
    UserAgent => "User-Agent",
    WwwAuthenticate => "WWW-Authenticate",
}

impl KnownHeader {
    /// Resolves a header name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|known| known.as_str().len() == name.len() && known.as_str().eq_ignore_ascii_case(name))
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for KnownHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a header inside one [`HeaderTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKey {
    Known(KnownHeader),
    /// Index into the table's interned custom names.
    Custom(usize),
}

/// Anything that can name a header: a [`KnownHeader`] or a string.
pub trait HeaderNameRef {
    /// Finds the key without registering a new custom name.
    fn find_key(&self, table: &HeaderTable) -> Option<HeaderKey>;

    /// Finds the key, interning the name when it is not known yet.
    fn intern_key(&self, table: &mut HeaderTable) -> HeaderKey;
}

impl HeaderNameRef for KnownHeader {
    #[inline]
    fn find_key(&self, _table: &HeaderTable) -> Option<HeaderKey> {
        Some(HeaderKey::Known(*self))
    }

    #[inline]
    fn intern_key(&self, _table: &mut HeaderTable) -> HeaderKey {
        HeaderKey::Known(*self)
    }
}

impl HeaderNameRef for &str {
    fn find_key(&self, table: &HeaderTable) -> Option<HeaderKey> {
        match KnownHeader::from_name(self) {
            Some(known) => Some(HeaderKey::Known(known)),
            None => table.find_custom(self).map(HeaderKey::Custom),
        }
    }

    fn intern_key(&self, table: &mut HeaderTable) -> HeaderKey {
        match KnownHeader::from_name(self) {
            Some(known) => HeaderKey::Known(known),
            None => HeaderKey::Custom(table.intern_custom(self)),
        }
    }
}

impl HeaderNameRef for &String {
    fn find_key(&self, table: &HeaderTable) -> Option<HeaderKey> {
        self.as_str().find_key(table)
    }

    fn intern_key(&self, table: &mut HeaderTable) -> HeaderKey {
        self.as_str().intern_key(table)
    }
}

/// Insertion-ordered, case-insensitive header map with one value per name.
#[derive(Clone)]
pub struct HeaderTable {
    known: [Option<String>; KnownHeader::COUNT],
    custom_names: Vec<String>,
    custom_values: HashMap<usize, String>,
    order: Vec<HeaderKey>,
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderTable {
    pub fn new() -> Self {
        Self {
            known: std::array::from_fn(|_| None),
            custom_names: Vec::new(),
            custom_values: HashMap::new(),
            order: Vec::with_capacity(16),
        }
    }

    /// Number of distinct header names present.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sets `name` to `value`, replacing any previous value but keeping its position.
    pub fn set<N: HeaderNameRef>(&mut self, name: N, value: impl Into<String>) -> &mut Self {
        let key = name.intern_key(self);
        let value = value.into();
        match self.slot_mut(key) {
            Some(existing) => *existing = value,
            None => self.insert_new(key, value),
        }
        self
    }

    /// Adds another value for `name`, joining it to an existing one with `\0`.
    pub fn append<N: HeaderNameRef>(&mut self, name: N, value: impl AsRef<str>) -> &mut Self {
        let key = name.intern_key(self);
        let value = value.as_ref();
        match self.slot_mut(key) {
            Some(existing) => {
                existing.push(MULTI_VALUE_SEPARATOR);
                existing.push_str(value);
            }
            None => self.insert_new(key, value.to_owned()),
        }
        self
    }

    /// Returns the stored value, multi-valued headers still joined.
    pub fn get<N: HeaderNameRef>(&self, name: N) -> Option<&str> {
        name.find_key(self).and_then(|key| self.value_of(key))
    }

    /// Returns each part of a multi-valued header.
    pub fn get_all<N: HeaderNameRef>(&self, name: N) -> impl Iterator<Item = &str> {
        self.get(name).into_iter().flat_map(|value| value.split(MULTI_VALUE_SEPARATOR))
    }

    pub fn contains<N: HeaderNameRef>(&self, name: N) -> bool {
        self.get(name).is_some()
    }

    /// Checks whether any comma separated token of the header equals `token`, ignoring case.
    pub fn has_token<N: HeaderNameRef>(&self, name: N, token: &str) -> bool {
        self.get_all(name).flat_map(|value| value.split(',')).any(|part| part.trim().eq_ignore_ascii_case(token))
    }

    pub fn remove<N: HeaderNameRef>(&mut self, name: N) -> Option<String> {
        let key = name.find_key(self)?;
        let removed = match key {
            HeaderKey::Known(known) => self.known[known.index()].take(),
            HeaderKey::Custom(index) => self.custom_values.remove(&index),
        };
        if removed.is_some() {
            self.order.retain(|k| *k != key);
        }
        removed
    }

    /// Removes every value but keeps interned names and allocations.
    pub fn clear(&mut self) {
        for key in self.order.drain(..) {
            match key {
                HeaderKey::Known(known) => self.known[known.index()] = None,
                HeaderKey::Custom(index) => {
                    self.custom_values.remove(&index);
                }
            }
        }
    }

    /// Removes every value and forgets the interned custom names.
    pub fn reset(&mut self) {
        self.clear();
        self.custom_names.clear();
    }

    #[cfg(test)]
    pub(crate) fn custom_name_count(&self) -> usize {
        self.custom_names.len()
    }

    /// The canonical (known) or first-seen (custom) spelling of a key.
    pub fn name_of(&self, key: HeaderKey) -> &str {
        match key {
            HeaderKey::Known(known) => known.as_str(),
            HeaderKey::Custom(index) => self.custom_names[index].as_str(),
        }
    }

    pub fn value_of(&self, key: HeaderKey) -> Option<&str> {
        match key {
            HeaderKey::Known(known) => self.known[known.index()].as_deref(),
            HeaderKey::Custom(index) => self.custom_values.get(&index).map(String::as_str),
        }
    }

    /// `(name, value)` pairs in insertion order, multi-valued headers still joined.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().filter_map(|key| self.value_of(*key).map(|value| (self.name_of(*key), value)))
    }

    /// `(name, value)` pairs as they go on the wire: one pair per part of a multi-valued header.
    pub fn lines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().flat_map(|(name, value)| value.split(MULTI_VALUE_SEPARATOR).map(move |part| (name, part)))
    }

    fn slot_mut(&mut self, key: HeaderKey) -> Option<&mut String> {
        match key {
            HeaderKey::Known(known) => self.known[known.index()].as_mut(),
            HeaderKey::Custom(index) => self.custom_values.get_mut(&index),
        }
    }

    fn insert_new(&mut self, key: HeaderKey, value: String) {
        match key {
            HeaderKey::Known(known) => self.known[known.index()] = Some(value),
            HeaderKey::Custom(index) => {
                self.custom_values.insert(index, value);
            }
        }
        self.order.push(key);
    }

    fn find_custom(&self, name: &str) -> Option<usize> {
        self.custom_names.iter().position(|existing| existing.eq_ignore_ascii_case(name))
    }

    fn intern_custom(&mut self, name: &str) -> usize {
        match self.find_custom(name) {
            Some(index) => index,
            None => {
                self.custom_names.push(name.to_owned());
                self.custom_names.len() - 1
            }
        }
    }
}

impl fmt::Debug for HeaderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_resolve_case_insensitively() {
        assert_eq!(KnownHeader::from_name("content-length"), Some(KnownHeader::ContentLength));
        assert_eq!(KnownHeader::from_name("SEC-WEBSOCKET-KEY"), Some(KnownHeader::SecWebSocketKey));
        assert_eq!(KnownHeader::from_name("x-request-id"), None);
    }

    #[test]
    fn keeps_insertion_order() {
        let mut table = HeaderTable::new();
        table.set("X-First", "1").set(KnownHeader::Host, "example.com").set("x-third", "3");

        let names: Vec<&str> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["X-First", "Host", "x-third"]);
    }

    #[test]
    fn lookup_ignores_case_for_known_and_custom() {
        let mut table = HeaderTable::new();
        table.set("content-type", "text/plain");
        table.set("X-Trace", "abc");

        assert_eq!(table.get(KnownHeader::ContentType), Some("text/plain"));
        assert_eq!(table.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(table.get("x-trace"), Some("abc"));
        assert_eq!(table.get("X-TRACE"), Some("abc"));
        assert_eq!(table.get("x-missing"), None);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut table = HeaderTable::new();
        table.set("A", "1").set("B", "2").set("a", "3");

        assert_eq!(table.len(), 2);
        let pairs: Vec<(&str, &str)> = table.iter().collect();
        assert_eq!(pairs, vec![("A", "3"), ("B", "2")]);
    }

    #[test]
    fn multi_values_are_joined_and_expanded() {
        let mut table = HeaderTable::new();
        table.append(KnownHeader::SecWebSocketVersion, "13");
        table.append("sec-websocket-version", "8");

        assert_eq!(table.get(KnownHeader::SecWebSocketVersion), Some("13\08"));
        assert_eq!(table.get_all(KnownHeader::SecWebSocketVersion).collect::<Vec<_>>(), vec!["13", "8"]);

        let lines: Vec<(&str, &str)> = table.lines().collect();
        assert_eq!(lines, vec![("Sec-WebSocket-Version", "13"), ("Sec-WebSocket-Version", "8")]);
    }

    #[test]
    fn clear_keeps_interned_names() {
        let mut table = HeaderTable::new();
        table.set("X-Custom", "1").set(KnownHeader::Accept, "*/*");
        table.clear();

        assert!(table.is_empty());
        assert_eq!(table.get("x-custom"), None);
        assert_eq!(table.get(KnownHeader::Accept), None);

        table.set("x-custom", "2");
        assert_eq!(table.custom_names.len(), 1);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![("X-Custom", "2")]);
    }

    #[test]
    fn reset_forgets_custom_names() {
        let mut table = HeaderTable::new();
        table.set("X-One", "1").set("X-Two", "2").set(KnownHeader::Host, "h");
        table.reset();

        assert!(table.is_empty());
        assert_eq!(table.custom_name_count(), 0);

        table.set("X-Three", "3");
        assert_eq!(table.custom_name_count(), 1);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![("X-Three", "3")]);
    }

    #[test]
    fn remove_drops_value_and_order_entry() {
        let mut table = HeaderTable::new();
        table.set("A", "1").set(KnownHeader::Host, "h").set("B", "2");

        assert_eq!(table.remove(KnownHeader::Host), Some("h".to_string()));
        assert_eq!(table.remove("missing"), None);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![("A", "1"), ("B", "2")]);
    }

    #[test]
    fn token_matching() {
        let mut table = HeaderTable::new();
        table.set(KnownHeader::Connection, "keep-alive, Upgrade");

        assert!(table.has_token(KnownHeader::Connection, "upgrade"));
        assert!(!table.has_token(KnownHeader::Connection, "close"));
    }
}

//! Challenge/response authentication for client requests.
//!
//! A `401` or `407` response carries one or more challenges. The request's
//! [`AuthAdapter`] may answer one of them; the answer becomes the credentials
//! header of a retry, which costs one unit of the request's retry budget.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::{Method, Uri};

/// Produces the credentials answering a challenge.
pub trait AuthAdapter: Send {
    /// The value of the `Authorization` (or `Proxy-Authorization`) header, `None`
    /// when this adapter cannot answer the challenge.
    fn authorize(&mut self, challenge: &Challenge, method: &Method, uri: &Uri) -> Option<String>;
}

/// One authentication challenge, such as `Basic realm="files"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    scheme: String,
    token: Option<String>,
    params: Vec<(String, String)>,
}

impl Challenge {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self { scheme: scheme.into(), token: None, params: Vec::new() }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }

    /// The `token68` form, as used by `Negotiate`.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// A parameter by case-insensitive name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    /// Parses every challenge out of the values of challenge headers.
    pub fn parse_all<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<Challenge> {
        let mut challenges: Vec<Challenge> = Vec::new();
        for value in values {
            let mut current: Option<Challenge> = None;
            for piece in split_unquoted(value) {
                let piece = piece.trim();
                if piece.is_empty() {
                    continue;
                }
                if let (Some(challenge), Some(param)) = (current.as_mut(), parse_param(piece)) {
                    challenge.params.push(param);
                    continue;
                }

                challenges.extend(current.take());
                let (scheme, rest) = piece.split_once(char::is_whitespace).unwrap_or((piece, ""));
                let mut challenge = Challenge::new(scheme);
                let rest = rest.trim();
                if !rest.is_empty() {
                    match parse_param(rest) {
                        Some(param) => challenge.params.push(param),
                        None => challenge.token = Some(rest.to_owned()),
                    }
                }
                current = Some(challenge);
            }
            challenges.extend(current);
        }
        challenges
    }
}

/// Splits at commas outside of quoted strings.
fn split_unquoted(value: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                pieces.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&value[start..]);
    pieces
}

/// `name=value` or `name="quoted value"`; `None` when the piece is no parameter.
fn parse_param(piece: &str) -> Option<(String, String)> {
    let (name, value) = piece.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    let value = value.trim();
    // token68 padding, not a parameter
    if value.chars().all(|c| c == '=') {
        return None;
    }
    let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_owned(),
    };
    Some((name.to_ascii_lowercase(), value))
}

/// Answers `Basic` challenges with a user name and password.
#[derive(Clone)]
pub struct BasicAuth {
    user: String,
    password: String,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: user.into(), password: password.into() }
    }

    /// The credentials header value.
    pub fn credentials(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", self.user, self.password)))
    }
}

impl AuthAdapter for BasicAuth {
    fn authorize(&mut self, challenge: &Challenge, _method: &Method, _uri: &Uri) -> Option<String> {
        challenge.is_scheme("basic").then(|| self.credentials())
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth").field("user", &self.user).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_several_challenges_in_one_value() {
        let challenges = Challenge::parse_all([r#"Digest realm="x, y", nonce="abc", qop="auth", Basic realm="files""#]);
        assert_eq!(challenges.len(), 2);
        assert!(challenges[0].is_scheme("digest"));
        assert_eq!(challenges[0].realm(), Some("x, y"));
        assert_eq!(challenges[0].param("QOP"), Some("auth"));
        assert_eq!(challenges[1].scheme(), "Basic");
        assert_eq!(challenges[1].realm(), Some("files"));
    }

    #[test]
    fn parses_token68_and_bare_schemes() {
        let challenges = Challenge::parse_all(["Negotiate YIIGhgYJKoZIhvcSAQICAQBuggZ1==", "NTLM"]);
        assert_eq!(challenges[0].token(), Some("YIIGhgYJKoZIhvcSAQICAQBuggZ1=="));
        assert_eq!(challenges[1].scheme(), "NTLM");
        assert!(challenges[1].realm().is_none());
    }

    #[test]
    fn basic_answers_only_basic() {
        let mut auth = BasicAuth::new("Aladdin", "open sesame");
        let uri = Uri::from_static("/");
        let basic = Challenge::parse_all(["Basic realm=\"WallyWorld\""]);
        let digest = Challenge::parse_all(["Digest realm=\"x\""]);

        assert_eq!(auth.authorize(&basic[0], &Method::GET, &uri).as_deref(), Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="));
        assert_eq!(auth.authorize(&digest[0], &Method::GET, &uri), None);
        assert!(!format!("{auth:?}").contains("sesame"));
    }
}

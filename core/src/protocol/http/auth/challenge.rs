/*
 * challenge.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Poolwire, a pooled HTTP/1.1 client transport.
 *
 * Poolwire is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Poolwire is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Poolwire.  If not, see <http://www.gnu.org/licenses/>.
 */

//! `WWW-Authenticate` / `Proxy-Authenticate` challenges.

use url::Url;

use super::credentials::{Credential, Credentials};
use crate::protocol::http::headers::Headers;
use crate::protocol::http::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    Negotiate,
    Ntlm,
    Digest,
    Basic,
}

impl AuthScheme {
    /// Strongest first.
    pub const PREFERENCE: [AuthScheme; 4] = [
        AuthScheme::Negotiate,
        AuthScheme::Ntlm,
        AuthScheme::Digest,
        AuthScheme::Basic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AuthScheme::Negotiate => "Negotiate",
            AuthScheme::Ntlm => "NTLM",
            AuthScheme::Digest => "Digest",
            AuthScheme::Basic => "Basic",
        }
    }

    /// Connection-based schemes run a multi-leg handshake on one connection.
    pub fn is_connection_based(&self) -> bool {
        matches!(self, AuthScheme::Negotiate | AuthScheme::Ntlm)
    }
}

/// Origin server or proxy authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthTarget {
    Server,
    Proxy,
}

impl AuthTarget {
    pub(crate) fn status(&self) -> u16 {
        match self {
            AuthTarget::Server => 401,
            AuthTarget::Proxy => 407,
        }
    }

    pub(crate) fn challenge_header(&self) -> &'static str {
        match self {
            AuthTarget::Server => "WWW-Authenticate",
            AuthTarget::Proxy => "Proxy-Authenticate",
        }
    }

    pub(crate) fn authorization_header(&self) -> &'static str {
        match self {
            AuthTarget::Server => "Authorization",
            AuthTarget::Proxy => "Proxy-Authorization",
        }
    }
}

/// A challenge we can answer.
#[derive(Debug, Clone)]
pub(crate) struct Challenge {
    pub scheme: AuthScheme,
    pub target: AuthTarget,
    pub credential: Credential,
    /// Everything after the scheme token.
    pub payload: String,
}

pub(crate) fn is_challenge(response: &Response, target: AuthTarget) -> bool {
    response.status == target.status()
}

/// Payload of the first challenge header for `scheme`, if any.
pub(crate) fn challenge_payload<'a>(headers: &'a Headers, target: AuthTarget, scheme: AuthScheme) -> Option<&'a str> {
    headers.get_all(target.challenge_header()).find_map(|value| {
        let value = value.trim();
        let (token, rest) = match value.find(|c: char| c == ' ' || c == '\t') {
            Some(i) => (&value[..i], value[i..].trim()),
            None => (value, ""),
        };
        if token.eq_ignore_ascii_case(scheme.name()) {
            Some(rest)
        } else {
            None
        }
    })
}

/// Pick the strongest scheme that was offered and has a credential. Connection-based
/// schemes are only considered when a security context provider exists.
pub(crate) fn select_challenge(
    response: &Response,
    target: AuthTarget,
    uri: &Url,
    credentials: &dyn Credentials,
    connection_auth_available: bool,
) -> Option<Challenge> {
    if !is_challenge(response, target) {
        return None;
    }
    AuthScheme::PREFERENCE.iter().find_map(|&scheme| {
        if scheme.is_connection_based() && !connection_auth_available {
            return None;
        }
        let payload = challenge_payload(&response.headers, target, scheme)?;
        let credential = credentials.credential(uri, scheme)?;
        Some(Challenge {
            scheme,
            target,
            credential,
            payload: payload.to_string(),
        })
    })
}

/// Payload of a repeated challenge for the same scheme on a 401/407.
pub(crate) fn repeated_challenge(response: &Response, target: AuthTarget, scheme: AuthScheme) -> Option<String> {
    if !is_challenge(response, target) {
        return None;
    }
    challenge_payload(&response.headers, target, scheme).map(str::to_string)
}

/// `name=value` / `name="quoted value"` directives of a challenge, names lowercased.
pub(crate) fn parse_directives(payload: &str) -> Vec<(String, String)> {
    let bytes = payload.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i] == b',' || bytes[i].is_ascii_whitespace()) {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len() && bytes[i] != b'=' && bytes[i] != b',' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let name = payload[name_start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            // Bare token without a value.
            if !name.is_empty() {
                out.push((name, String::new()));
            }
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < bytes.len() && bytes[i] == b'"' {
            i += 1;
            let mut start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    value.push_str(&payload[start..i]);
                    i += 1;
                    start = i;
                }
                i += 1;
            }
            value.push_str(&payload[start..i.min(bytes.len())]);
            i += 1;
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            value.push_str(payload[start..i].trim());
        }
        if !name.is_empty() {
            out.push((name, value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::http::body::Body;

    fn challenge_response(status: u16, headers: &[(&str, &str)]) -> Response {
        let mut r = Response::new(status, Url::parse("http://h/").unwrap(), Body::empty());
        for (n, v) in headers {
            r.headers.append(*n, *v);
        }
        r
    }

    #[test]
    fn directives() {
        let d = parse_directives(r#"realm="a, \"b\"", nonce=abc ,qop="auth,auth-int",  stale=TRUE, x"#);
        assert_eq!(
            d,
            vec![
                ("realm".to_string(), "a, \"b\"".to_string()),
                ("nonce".to_string(), "abc".to_string()),
                ("qop".to_string(), "auth,auth-int".to_string()),
                ("stale".to_string(), "TRUE".to_string()),
                ("x".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn prefers_strongest_scheme_with_credential() {
        let r = challenge_response(
            401,
            &[
                ("WWW-Authenticate", "Basic realm=\"x\""),
                ("WWW-Authenticate", "Digest realm=\"x\", nonce=\"n\""),
                ("WWW-Authenticate", "NTLM"),
            ],
        );
        let uri = Url::parse("http://h/").unwrap();
        let cred = Credential::new("u", "p");
        let c = select_challenge(&r, AuthTarget::Server, &uri, &cred, false).unwrap();
        assert_eq!(c.scheme, AuthScheme::Digest);
        assert_eq!(c.payload, "realm=\"x\", nonce=\"n\"");
        let c = select_challenge(&r, AuthTarget::Server, &uri, &cred, true).unwrap();
        assert_eq!(c.scheme, AuthScheme::Ntlm);
        assert_eq!(c.payload, "");
        assert!(select_challenge(&r, AuthTarget::Proxy, &uri, &cred, true).is_none());
    }

    #[test]
    fn scheme_token_must_match_whole() {
        let r = challenge_response(407, &[("Proxy-Authenticate", "Basically realm=x")]);
        assert!(challenge_payload(&r.headers, AuthTarget::Proxy, AuthScheme::Basic).is_none());
        assert!(repeated_challenge(&r, AuthTarget::Proxy, AuthScheme::Basic).is_none());
    }
}

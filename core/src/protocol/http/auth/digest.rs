/*
 * digest.rs
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

//! HTTP Digest access authentication (RFC 2617, RFC 7616).
//!
//! Supported algorithms: MD5, MD5-sess, SHA-256, SHA-256-sess. The nonce count is always
//! `00000001`: every answered challenge carries a fresh nonce.

use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use super::challenge::parse_directives;
use super::credentials::Credential;

const NONCE_COUNT: &str = "00000001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Sha256,
}

impl Algorithm {
    fn hex(&self, data: &str) -> String {
        match self {
            Algorithm::Md5 => format!("{:x}", Md5::digest(data.as_bytes())),
            Algorithm::Sha256 => format!("{:x}", Sha256::digest(data.as_bytes())),
        }
    }

    fn hex_bytes(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Md5 => format!("{:x}", Md5::digest(data)),
            Algorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        }
    }
}

/// Parsed directives of a Digest challenge.
#[derive(Debug, Clone)]
pub(crate) struct DigestChallenge {
    directives: Vec<(String, String)>,
}

impl DigestChallenge {
    pub(crate) fn parse(payload: &str) -> Self {
        Self {
            directives: parse_directives(payload),
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The server rejected the nonce as expired, not the credential.
    pub(crate) fn is_stale(&self) -> bool {
        self.get("stale")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// 16 alphanumeric characters drawn from 32 random bytes: each pair picks a class
/// (upper, lower, digit) and a character within it.
pub(crate) fn generate_cnonce() -> String {
    let mut random = [0u8; 32];
    OsRng.fill_bytes(&mut random);
    random
        .chunks(2)
        .map(|pair| match pair[0] % 3 {
            0 => (b'A' + pair[1] % 26) as char,
            1 => (b'a' + pair[1] % 26) as char,
            _ => (b'0' + pair[1] % 10) as char,
        })
        .collect()
}

fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// The `qop` to answer with: `auth-int` whenever it is offered as a whole token, else
/// `auth`. `None` inside `Some` means the challenge had no qop directive.
fn select_qop(offered: Option<&str>) -> Option<Option<&'static str>> {
    let offered = match offered {
        Some(q) => q,
        None => return Some(None),
    };
    let tokens: Vec<&str> = offered.split(',').map(str::trim).collect();
    if tokens.iter().any(|t| t.eq_ignore_ascii_case("auth-int")) {
        Some(Some("auth-int"))
    } else if tokens.iter().any(|t| t.eq_ignore_ascii_case("auth")) {
        Some(Some("auth"))
    } else {
        None
    }
}

/// Digest authorization header value, or `None` if the challenge cannot be answered
/// (missing realm or nonce, unknown algorithm or qop, `userhash`).
pub(crate) fn digest_token(
    credential: &Credential,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    body: Option<&[u8]>,
) -> Option<String> {
    digest_token_with_cnonce(credential, challenge, method, uri, body, &generate_cnonce())
}

pub(crate) fn digest_token_with_cnonce(
    credential: &Credential,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    body: Option<&[u8]>,
    cnonce: &str,
) -> Option<String> {
    let realm = challenge.get("realm")?;
    let nonce = challenge.get("nonce")?;
    if challenge
        .get("userhash")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return None;
    }
    let algorithm_name = challenge.get("algorithm").unwrap_or("MD5");
    let (algorithm, session) = match algorithm_name.to_ascii_uppercase().as_str() {
        "MD5" => (Algorithm::Md5, false),
        "MD5-SESS" => (Algorithm::Md5, true),
        "SHA-256" => (Algorithm::Sha256, false),
        "SHA-256-SESS" => (Algorithm::Sha256, true),
        _ => return None,
    };
    let qop = select_qop(challenge.get("qop"))?;

    let mut ha1 = algorithm.hex(&format!("{}:{}:{}", credential.username, realm, credential.password));
    if session {
        ha1 = algorithm.hex(&format!("{}:{}:{}", ha1, nonce, cnonce));
    }
    let ha2 = match qop {
        Some("auth-int") => {
            let body_hash = algorithm.hex_bytes(body.unwrap_or(&[]));
            algorithm.hex(&format!("{}:{}:{}", method, uri, body_hash))
        }
        _ => algorithm.hex(&format!("{}:{}", method, uri)),
    };
    let response = match qop {
        Some(qop) => algorithm.hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, NONCE_COUNT, cnonce, qop, ha2
        )),
        None => algorithm.hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
    };

    let mut parts = vec![
        format!("username={}", quoted(&credential.username)),
        format!("realm={}", quoted(realm)),
        format!("nonce={}", quoted(nonce)),
        format!("uri={}", quoted(uri)),
        format!("response={}", quoted(&response)),
        format!("algorithm={}", algorithm_name),
    ];
    if let Some(opaque) = challenge.get("opaque") {
        parts.push(format!("opaque={}", quoted(opaque)));
    }
    if let Some(qop) = qop {
        parts.push(format!("qop={}", qop));
        parts.push(format!("nc={}", NONCE_COUNT));
        parts.push(format!("cnonce={}", quoted(cnonce)));
    }
    Some(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::http::auth::challenge::parse_directives;

    fn response_of(token: &str) -> String {
        parse_directives(token)
            .into_iter()
            .find(|(n, _)| n == "response")
            .map(|(_, v)| v)
            .unwrap()
    }

    #[test]
    fn rfc2617_example() {
        let challenge = DigestChallenge::parse(
            r#"realm="testrealm@host.com", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        );
        let cred = Credential::new("Mufasa", "Circle Of Life");
        let token = digest_token_with_cnonce(&cred, &challenge, "GET", "/dir/index.html", None, "0a4f113b").unwrap();
        assert_eq!(response_of(&token), "6629fae49393a05397450978507c4ef1");
        assert!(token.contains("qop=auth, nc=00000001, cnonce=\"0a4f113b\""));
        assert!(token.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
        assert!(token.starts_with("username=\"Mufasa\", realm=\"testrealm@host.com\""));
    }

    #[test]
    fn rfc7616_sha256_example() {
        let challenge = DigestChallenge::parse(
            r#"realm="http-auth@example.org", qop="auth", algorithm=SHA-256, nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v", opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS""#,
        );
        let cred = Credential::new("Mufasa", "Circle of Life");
        let token = digest_token_with_cnonce(
            &cred,
            &challenge,
            "GET",
            "/dir/index.html",
            None,
            "f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ",
        )
        .unwrap();
        assert_eq!(
            response_of(&token),
            "753927fa0e85d155564e2e272a28d1802ca10daf4496794697cf8db5856cb6c1"
        );
    }

    #[test]
    fn qop_selection_uses_whole_tokens() {
        assert_eq!(select_qop(Some("auth-int")), Some(Some("auth-int")));
        assert_eq!(select_qop(Some("auth-int, auth")), Some(Some("auth-int")));
        assert_eq!(select_qop(Some("auth, auth-int")), Some(Some("auth-int")));
        assert_eq!(select_qop(Some("auth")), Some(Some("auth")));
        assert_eq!(select_qop(Some("auth-integrity")), None);
        assert_eq!(select_qop(None), Some(None));
    }

    #[test]
    fn unanswerable_challenges() {
        let cred = Credential::new("u", "p");
        assert!(digest_token(&cred, &DigestChallenge::parse("nonce=\"n\""), "GET", "/", None).is_none());
        assert!(digest_token(&cred, &DigestChallenge::parse("realm=\"r\""), "GET", "/", None).is_none());
        let sha512 = DigestChallenge::parse("realm=\"r\", nonce=\"n\", algorithm=SHA-512-256");
        assert!(digest_token(&cred, &sha512, "GET", "/", None).is_none());
        let userhash = DigestChallenge::parse("realm=\"r\", nonce=\"n\", userhash=true");
        assert!(digest_token(&cred, &userhash, "GET", "/", None).is_none());
    }

    #[test]
    fn session_and_auth_int_change_the_response() {
        let cred = Credential::new("u", "p");
        let plain = DigestChallenge::parse("realm=\"r\", nonce=\"n\", qop=auth");
        let sess = DigestChallenge::parse("realm=\"r\", nonce=\"n\", qop=auth, algorithm=MD5-sess");
        let int = DigestChallenge::parse("realm=\"r\", nonce=\"n\", qop=auth-int");
        let a = response_of(&digest_token_with_cnonce(&cred, &plain, "POST", "/", Some(b"x"), "c").unwrap());
        let b = response_of(&digest_token_with_cnonce(&cred, &sess, "POST", "/", Some(b"x"), "c").unwrap());
        let c = response_of(&digest_token_with_cnonce(&cred, &int, "POST", "/", Some(b"x"), "c").unwrap());
        let d = response_of(&digest_token_with_cnonce(&cred, &int, "POST", "/", Some(b"y"), "c").unwrap());
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(c, d);
    }

    #[test]
    fn legacy_challenge_without_qop() {
        let cred = Credential::new("u", "p");
        let challenge = DigestChallenge::parse("realm=\"r\", nonce=\"n\"");
        let token = digest_token_with_cnonce(&cred, &challenge, "GET", "/", None, "c").unwrap();
        assert!(!token.contains("qop="));
        assert!(!token.contains("cnonce="));
        let ha1 = Algorithm::Md5.hex("u:r:p");
        let ha2 = Algorithm::Md5.hex("GET:/");
        assert_eq!(response_of(&token), Algorithm::Md5.hex(&format!("{}:n:{}", ha1, ha2)));
    }

    #[test]
    fn cnonce_is_alphanumeric() {
        let c = generate_cnonce();
        assert_eq!(c.len(), 16);
        assert!(c.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert!(DigestChallenge::parse("stale=TRUE").is_stale());
        assert!(!DigestChallenge::parse("stale=false").is_stale());
    }

    #[test]
    fn auth_int_covers_the_body() {
        let challenge = DigestChallenge::parse(r#"realm="r", qop="auth,auth-int", nonce="n""#);
        let cred = Credential::new("user", "pass");
        let token = |body: &[u8]| {
            digest_token_with_cnonce(&cred, &challenge, "POST", "/upload", Some(body), "c").unwrap()
        };
        let a = token(b"one");
        assert!(a.contains("qop=auth-int, nc=00000001"));
        assert_ne!(response_of(&a), response_of(&token(b"two")));
    }
}

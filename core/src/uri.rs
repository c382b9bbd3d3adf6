/*
 * uri.rs
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

//! URL helpers for the wire: request-target forms, Host header, redirect resolution,
//! proxy bypass matching and userinfo credentials.

use percent_encoding::percent_decode_str;
use url::{Host, Url};

/// Default port of an http(s)/ws(s) scheme.
pub fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" | "wss" => 443,
        _ => 80,
    }
}

/// Port of the URL, falling back to the scheme default.
pub fn port_or_default(url: &Url) -> u16 {
    url.port().unwrap_or_else(|| default_port(url.scheme()))
}

/// Host suitable for a socket connect: IPv6 literals without brackets.
pub fn connect_host(url: &Url) -> String {
    match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => String::new(),
    }
}

/// Value for a synthesized `Host` header: host, plus `:port` when not the scheme default.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) if port != default_port(url.scheme()) => format!("{}:{}", host, port),
        _ => host.to_string(),
    }
}

/// `host:port` for a CONNECT request line, bracketing IPv6 literals.
pub fn authority_form(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// `/path?query` (origin-form).
pub fn origin_form(url: &Url) -> String {
    let path = url.path();
    let mut out = String::with_capacity(path.len() + url.query().map(|q| q.len() + 1).unwrap_or(0) + 1);
    if path.is_empty() {
        out.push('/');
    } else {
        out.push_str(path);
    }
    if let Some(q) = url.query() {
        out.push('?');
        out.push_str(q);
    }
    out
}

/// Full URL without fragment or userinfo (absolute-form, for plain proxied requests).
pub fn absolute_form(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.to_string()
}

/// Resolve a `Location` value against the URL that produced it. The previous fragment is
/// carried forward when the new location has none. Only http(s) results are returned.
pub fn resolve_redirect(base: &Url, location: &str) -> Option<Url> {
    let mut target = base.join(location.trim()).ok()?;
    if !matches!(target.scheme(), "http" | "https") {
        return None;
    }
    if target.fragment().is_none() {
        if let Some(fragment) = base.fragment() {
            target.set_fragment(Some(fragment));
        }
    }
    Some(target)
}

/// True if `host` matches a proxy bypass entry: `*`, an exact name, or a `.suffix` / `*.suffix`.
pub fn bypass_matches(host: &str, patterns: &[String]) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    patterns.iter().any(|p| {
        let p = p.trim();
        if p == "*" {
            return true;
        }
        let suffix = p.strip_prefix('*').unwrap_or(p);
        if suffix.starts_with('.') {
            let bare = &suffix[1..];
            host.eq_ignore_ascii_case(bare)
                || (host.len() > suffix.len()
                    && host[host.len() - suffix.len()..].eq_ignore_ascii_case(suffix))
        } else {
            host.eq_ignore_ascii_case(p)
        }
    })
}

/// Percent-decoded `(username, password)` from the URL userinfo, if a username is present.
pub fn userinfo(url: &Url) -> Option<(String, String)> {
    if url.username().is_empty() {
        return None;
    }
    let user = percent_decode_str(url.username()).decode_utf8_lossy().into_owned();
    let pass = url
        .password()
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
        .unwrap_or_default();
    Some((user, pass))
}

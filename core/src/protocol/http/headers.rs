/*
 * headers.rs
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

//! Ordered, case-insensitive header collection and the known-header table.
//!
//! Names are stored as given, except that names found in the known-header table are
//! normalized to their canonical spelling. A name may repeat; serialization joins the values
//! of one name with that header's separator.

/// A header the codec recognizes: canonical spelling and multi-value separator.
#[derive(Debug, PartialEq, Eq)]
pub struct KnownHeader {
    pub name: &'static str,
    pub separator: &'static str,
}

const fn known(name: &'static str) -> KnownHeader {
    KnownHeader { name, separator: ", " }
}

const fn known_sep(name: &'static str, separator: &'static str) -> KnownHeader {
    KnownHeader { name, separator }
}

static KNOWN_HEADERS: &[KnownHeader] = &[
    known("Accept"),
    known("Accept-Charset"),
    known("Accept-Encoding"),
    known("Accept-Language"),
    known("Accept-Ranges"),
    known("Age"),
    known("Allow"),
    known("Authorization"),
    known("Cache-Control"),
    known("Connection"),
    known("Content-Disposition"),
    known("Content-Encoding"),
    known("Content-Language"),
    known("Content-Length"),
    known("Content-Location"),
    known("Content-Range"),
    known("Content-Type"),
    known_sep("Cookie", "; "),
    known("Date"),
    known("ETag"),
    known("Expect"),
    known("Expires"),
    known("Host"),
    known("If-Match"),
    known("If-Modified-Since"),
    known("If-None-Match"),
    known("Keep-Alive"),
    known("Last-Modified"),
    known("Location"),
    known("Pragma"),
    known("Proxy-Authenticate"),
    known("Proxy-Authorization"),
    known("Proxy-Connection"),
    known("Range"),
    known("Referer"),
    known("Retry-After"),
    known_sep("Server", " "),
    known("Set-Cookie"),
    known("TE"),
    known("Trailer"),
    known("Transfer-Encoding"),
    known("Upgrade"),
    known_sep("User-Agent", " "),
    known("Vary"),
    known("Via"),
    known("Warning"),
    known("WWW-Authenticate"),
];

/// Look up a header name (case-insensitive) in the known-header table.
pub fn known_header(name: &str) -> Option<&'static KnownHeader> {
    KNOWN_HEADERS
        .iter()
        .find(|h| h.name.len() == name.len() && h.name.eq_ignore_ascii_case(name))
}

/// Headers whose values describe the body rather than the message.
pub(crate) const CONTENT_HEADERS: &[&str] = &[
    "Content-Disposition",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-Range",
    "Content-Type",
    "Transfer-Encoding",
];

/// Ordered multimap of header name → value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn canonical(name: String) -> String {
        match known_header(&name) {
            Some(k) if k.name != name => k.name.to_string(),
            _ => name,
        }
    }

    /// Add a value, keeping any existing values for the name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((Self::canonical(name.into()), value.into()));
        self
    }

    /// Replace every value of the name with this one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = Self::canonical(name.into());
        self.remove(&name);
        self.entries.push((name, value.into()));
        self
    }

    /// Remove all values of the name. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// First value for the name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// True if any comma-separated element of any value of `name` equals `token` (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `(name, joined value)` per distinct name, in order of first appearance.
    /// Values are joined with the known-header separator, or `", "` for unknown names.
    pub fn grouped(&self) -> Vec<(&str, String)> {
        let mut out: Vec<(&str, String)> = Vec::new();
        for (name, value) in &self.entries {
            match out.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some((_, joined)) => {
                    let sep = known_header(name).map(|k| k.separator).unwrap_or(", ");
                    joined.push_str(sep);
                    joined.push_str(value);
                }
                None => out.push((name.as_str(), value.clone())),
            }
        }
        out
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut h = Headers::new();
        for (n, v) in iter {
            h.append(n, v);
        }
        h
    }
}

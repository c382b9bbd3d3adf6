/*
 * credentials.rs
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

//! Credentials and their lookup by URI and scheme.

use std::fmt;

use url::Url;

use super::challenge::AuthScheme;
use crate::uri;

/// Username, password and optional Windows domain.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: String::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Source of credentials for a challenge from `uri` using `scheme`.
pub trait Credentials: Send + Sync {
    fn credential(&self, uri: &Url, scheme: AuthScheme) -> Option<Credential>;
}

/// A single credential answers every URI and scheme.
impl Credentials for Credential {
    fn credential(&self, _uri: &Url, _scheme: AuthScheme) -> Option<Credential> {
        Some(self.clone())
    }
}

struct CacheEntry {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    auth: AuthScheme,
    credential: Credential,
}

/// Credentials keyed by URI prefix and scheme. Lookup picks the longest matching prefix.
///
/// A prefix covers its own scheme, host and port, and every path at or below the directory
/// of its path (`http://h/a/b` covers `/a/` and deeper).
#[derive(Default)]
pub struct CredentialCache {
    entries: Vec<CacheEntry>,
}

fn directory(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    }
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the credential for `prefix` and `scheme`.
    pub fn add(&mut self, prefix: &Url, scheme: AuthScheme, credential: Credential) {
        let entry = CacheEntry {
            scheme: prefix.scheme().to_string(),
            host: prefix.host_str().unwrap_or("").to_ascii_lowercase(),
            port: uri::port_or_default(prefix),
            path: directory(prefix.path()).to_string(),
            auth: scheme,
            credential,
        };
        self.entries.retain(|e| {
            !(e.auth == entry.auth
                && e.scheme == entry.scheme
                && e.host == entry.host
                && e.port == entry.port
                && e.path == entry.path)
        });
        self.entries.push(entry);
    }

    pub fn lookup(&self, uri: &Url, scheme: AuthScheme) -> Option<&Credential> {
        let host = uri.host_str().unwrap_or("").to_ascii_lowercase();
        let port = uri::port_or_default(uri);
        self.entries
            .iter()
            .filter(|e| {
                e.auth == scheme
                    && e.scheme == uri.scheme()
                    && e.host == host
                    && e.port == port
                    && uri.path().starts_with(&e.path)
            })
            .max_by_key(|e| e.path.len())
            .map(|e| &e.credential)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Credentials for CredentialCache {
    fn credential(&self, uri: &Url, scheme: AuthScheme) -> Option<Credential> {
        self.lookup(uri, scheme).cloned()
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

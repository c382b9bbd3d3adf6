/*
 * cookies.rs
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

//! Cookie store collaborator. Cookie parsing and policy belong to the store; the
//! connection only asks for a `Cookie` header value and hands over `Set-Cookie` values.

use std::collections::HashMap;
use std::sync::Mutex;

use url::Url;

pub trait CookieStore: Send + Sync {
    /// `Cookie` header value for a request to `url`, if any.
    fn cookie_header(&self, url: &Url) -> Option<String>;

    /// Record the `Set-Cookie` values of a response from `url`.
    fn set_cookies(&self, url: &Url, values: &[&str]);
}

/// Minimal per-host store: keeps the `name=value` part of each cookie, ignoring attributes.
#[derive(Debug, Default)]
pub struct HostCookieStore {
    hosts: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl HostCookieStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieStore for HostCookieStore {
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let hosts = self.hosts.lock().ok()?;
        let cookies = hosts.get(host).filter(|c| !c.is_empty())?;
        Some(
            cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn set_cookies(&self, url: &Url, values: &[&str]) {
        let host = match url.host_str() {
            Some(h) => h.to_string(),
            None => return,
        };
        let mut hosts = match self.hosts.lock() {
            Ok(h) => h,
            Err(_) => return,
        };
        let cookies = hosts.entry(host).or_default();
        for value in values {
            let pair = value.split(';').next().unwrap_or("");
            let (name, val) = match pair.split_once('=') {
                Some((n, v)) => (n.trim(), v.trim()),
                None => continue,
            };
            if name.is_empty() {
                continue;
            }
            cookies.retain(|(n, _)| n != name);
            cookies.push((name.to_string(), val.to_string()));
        }
    }
}

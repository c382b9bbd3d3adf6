/*
 * config.rs
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

//! Transport settings. One `HttpSettings` value is shared (behind an `Arc`) by the pool manager,
//! every pool, and every connection it creates; it is never mutated after the client is built.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::rustls::ClientConfig;
use url::Url;

use crate::protocol::http::auth::{Credentials, SecurityContextProvider};
use crate::protocol::http::CookieStore;

/// Default connect timeout (TCP + TLS).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default cap on status line + header bytes per response.
pub const DEFAULT_MAX_RESPONSE_HEADERS_LENGTH: usize = 64 * 1024;
/// Default byte budget when draining an abandoned response body.
pub const DEFAULT_MAX_RESPONSE_DRAIN_SIZE: usize = 1024 * 1024;

/// Which content codings the decompression stage negotiates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecompressionMethods {
    pub gzip: bool,
    pub deflate: bool,
}

impl DecompressionMethods {
    pub const NONE: Self = Self { gzip: false, deflate: false };
    pub const ALL: Self = Self { gzip: true, deflate: true };

    pub fn is_empty(&self) -> bool {
        !self.gzip && !self.deflate
    }
}

/// Forward proxy used for every request whose host is not bypassed.
#[derive(Clone)]
pub struct ProxySettings {
    /// `http://host:port` of the proxy. Userinfo, if present, supplies proxy credentials.
    pub uri: Url,
    /// Hosts that go direct: exact names, `.suffix` / `*.suffix` patterns, or `*` for all.
    pub bypass: Vec<String>,
    /// Credentials answered on `407 Proxy Authentication Required`.
    pub credentials: Option<Arc<dyn Credentials>>,
}

impl ProxySettings {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            bypass: Vec::new(),
            credentials: None,
        }
    }
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("uri", &self.uri.as_str())
            .field("bypass", &self.bypass)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

/// All knobs consumed by the transport.
#[derive(Clone)]
pub struct HttpSettings {
    /// Connections associated with one destination at once. `usize::MAX` means unbounded.
    pub max_connections_per_server: usize,
    /// Absolute age after which a connection is no longer reused. `None` is infinite;
    /// `Some(Duration::ZERO)` disables pooling.
    pub pooled_connection_lifetime: Option<Duration>,
    /// How long a connection may sit idle in the pool. `None` is infinite.
    pub pooled_connection_idle_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub expect_100_continue_timeout: Duration,
    pub max_response_headers_length: usize,
    pub max_response_drain_size: usize,
    pub response_drain_timeout: Duration,
    pub use_proxy: bool,
    pub proxy: Option<ProxySettings>,
    pub use_cookies: bool,
    pub cookie_store: Option<Arc<dyn CookieStore>>,
    /// Server credentials answered on `401 Unauthorized`.
    pub credentials: Option<Arc<dyn Credentials>>,
    /// Send Basic credentials up front once a URI prefix is known to accept them.
    pub pre_authenticate: bool,
    pub allow_auto_redirect: bool,
    pub max_automatic_redirections: usize,
    pub automatic_decompression: DecompressionMethods,
    /// Backing library for NTLM and Negotiate. Without one those schemes are never selected.
    pub security_context_provider: Option<Arc<dyn SecurityContextProvider>>,
    /// TLS client configuration. `None` uses native roots with the Mozilla set as fallback.
    pub tls_config: Option<Arc<ClientConfig>>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_connections_per_server: usize::MAX,
            pooled_connection_lifetime: None,
            pooled_connection_idle_timeout: Some(Duration::from_secs(60)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            expect_100_continue_timeout: Duration::from_secs(1),
            max_response_headers_length: DEFAULT_MAX_RESPONSE_HEADERS_LENGTH,
            max_response_drain_size: DEFAULT_MAX_RESPONSE_DRAIN_SIZE,
            response_drain_timeout: Duration::from_secs(2),
            use_proxy: true,
            proxy: None,
            use_cookies: false,
            cookie_store: None,
            credentials: None,
            pre_authenticate: false,
            allow_auto_redirect: true,
            max_automatic_redirections: 50,
            automatic_decompression: DecompressionMethods::NONE,
            security_context_provider: None,
            tls_config: None,
        }
    }
}

impl HttpSettings {
    /// The proxy to use, if proxying is enabled and configured.
    pub fn active_proxy(&self) -> Option<&ProxySettings> {
        if self.use_proxy {
            self.proxy.as_ref()
        } else {
            None
        }
    }

    /// True when returned connections must be closed instead of pooled.
    pub fn pooling_disabled(&self) -> bool {
        self.pooled_connection_lifetime == Some(Duration::ZERO)
            || self.pooled_connection_idle_timeout == Some(Duration::ZERO)
    }

    /// Interval of the idle-connection sweep: a quarter of the shortest timeout, between 1 and 30 seconds.
    pub fn cleanup_interval(&self) -> Duration {
        let shortest = match (self.pooled_connection_idle_timeout, self.pooled_connection_lifetime) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => Duration::from_secs(120),
        };
        (shortest / 4).clamp(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl fmt::Debug for HttpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSettings")
            .field("max_connections_per_server", &self.max_connections_per_server)
            .field("pooled_connection_lifetime", &self.pooled_connection_lifetime)
            .field("pooled_connection_idle_timeout", &self.pooled_connection_idle_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("expect_100_continue_timeout", &self.expect_100_continue_timeout)
            .field("max_response_headers_length", &self.max_response_headers_length)
            .field("max_response_drain_size", &self.max_response_drain_size)
            .field("response_drain_timeout", &self.response_drain_timeout)
            .field("use_proxy", &self.use_proxy)
            .field("proxy", &self.proxy)
            .field("use_cookies", &self.use_cookies)
            .field("pre_authenticate", &self.pre_authenticate)
            .field("allow_auto_redirect", &self.allow_auto_redirect)
            .field("max_automatic_redirections", &self.max_automatic_redirections)
            .field("automatic_decompression", &self.automatic_decompression)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_interval_bounds() {
        let mut s = HttpSettings::default();
        assert_eq!(s.cleanup_interval(), Duration::from_secs(15));
        s.pooled_connection_idle_timeout = Some(Duration::from_millis(200));
        assert_eq!(s.cleanup_interval(), Duration::from_secs(1));
        s.pooled_connection_idle_timeout = None;
        assert_eq!(s.cleanup_interval(), Duration::from_secs(30));
    }

    #[test]
    fn zero_lifetime_disables_pooling() {
        let mut s = HttpSettings::default();
        assert!(!s.pooling_disabled());
        s.pooled_connection_lifetime = Some(Duration::ZERO);
        assert!(s.pooling_disabled());
    }

    #[test]
    fn proxy_only_when_enabled() {
        let mut s = HttpSettings::default();
        s.proxy = Some(ProxySettings::new(Url::parse("http://proxy:3128").unwrap()));
        assert!(s.active_proxy().is_some());
        s.use_proxy = false;
        assert!(s.active_proxy().is_none());
    }
}

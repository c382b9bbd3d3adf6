/*
 * key.rs
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

//! Pool bucketing key.

use std::fmt;

use url::Url;

use crate::config::HttpSettings;
use crate::error::HttpError;
use crate::protocol::http::request::Request;
use crate::uri;

/// How connections in a pool reach their destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Plain TCP to the origin.
    Http,
    /// TLS to the origin.
    Https,
    /// Plain TCP to a proxy; requests use absolute-form targets. One pool per proxy.
    Proxy,
    /// CONNECT tunnel through a proxy, plain inside.
    ProxyTunnel,
    /// CONNECT tunnel through a proxy, TLS inside.
    SslProxyTunnel,
    /// Connections to a proxy that carry CONNECT requests.
    ProxyConnect,
}

impl ConnectionKind {
    /// The socket goes to the proxy rather than the origin.
    pub fn uses_proxy(&self) -> bool {
        !matches!(self, ConnectionKind::Http | ConnectionKind::Https)
    }

    pub fn is_tunnel(&self) -> bool {
        matches!(self, ConnectionKind::ProxyTunnel | ConnectionKind::SslProxyTunnel)
    }
}

/// Identifies a pool. Requests with equal keys share connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub kind: ConnectionKind,
    /// Destination host; `None` for the shared plain-proxy pool.
    pub host: Option<String>,
    pub port: u16,
    /// TLS SNI and certificate name, from the `Host` header when one is set.
    pub tls_server_name: Option<String>,
    pub proxy_uri: Option<Url>,
}

/// Host part of a `Host` header value, without port or IPv6 brackets.
fn host_header_name(value: &str) -> &str {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => value,
    }
}

impl ConnectionKey {
    /// Key for the request under the given settings.
    pub fn for_request(request: &Request, settings: &HttpSettings) -> Result<Self, HttpError> {
        let url = &request.url;
        let host = uri::connect_host(url);
        if host.is_empty() {
            return Err(HttpError::invalid_request("URL has no host"));
        }
        let port = uri::port_or_default(url);
        let secure = request.is_secure();
        let tls_server_name = if secure {
            Some(
                request
                    .headers
                    .get("Host")
                    .map(|h| host_header_name(h).to_string())
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| host.clone()),
            )
        } else {
            None
        };

        let proxy = settings
            .active_proxy()
            .filter(|p| !uri::bypass_matches(&host, &p.bypass));
        let key = match proxy {
            Some(proxy) => {
                if proxy.uri.scheme() != "http" {
                    return Err(HttpError::invalid_request(format!(
                        "unsupported proxy scheme '{}'",
                        proxy.uri.scheme()
                    )));
                }
                let websocket = matches!(url.scheme(), "ws" | "wss");
                if secure {
                    ConnectionKey {
                        kind: ConnectionKind::SslProxyTunnel,
                        host: Some(host),
                        port,
                        tls_server_name,
                        proxy_uri: Some(proxy.uri.clone()),
                    }
                } else if websocket {
                    ConnectionKey {
                        kind: ConnectionKind::ProxyTunnel,
                        host: Some(host),
                        port,
                        tls_server_name: None,
                        proxy_uri: Some(proxy.uri.clone()),
                    }
                } else {
                    ConnectionKey {
                        kind: ConnectionKind::Proxy,
                        host: None,
                        port: 0,
                        tls_server_name: None,
                        proxy_uri: Some(proxy.uri.clone()),
                    }
                }
            }
            None => ConnectionKey {
                kind: if secure {
                    ConnectionKind::Https
                } else {
                    ConnectionKind::Http
                },
                host: Some(host),
                port,
                tls_server_name,
                proxy_uri: None,
            },
        };
        Ok(key)
    }

    /// Key of the pool carrying CONNECT requests to `proxy_uri`.
    pub fn proxy_connect(proxy_uri: &Url) -> Self {
        ConnectionKey {
            kind: ConnectionKind::ProxyConnect,
            host: Some(uri::connect_host(proxy_uri)),
            port: uri::port_or_default(proxy_uri),
            tls_server_name: None,
            proxy_uri: Some(proxy_uri.clone()),
        }
    }

    /// Where the socket connects: the proxy for proxied kinds, otherwise the origin.
    pub fn dial_endpoint(&self) -> Result<(String, u16), HttpError> {
        match (self.kind.uses_proxy(), &self.proxy_uri, &self.host) {
            (true, Some(proxy), _) => Ok((uri::connect_host(proxy), uri::port_or_default(proxy))),
            (false, _, Some(host)) => Ok((host.clone(), self.port)),
            _ => Err(HttpError::invalid_request("connection key has no endpoint")),
        }
    }

    /// TLS name for Https and SslProxyTunnel connections.
    pub fn server_name(&self) -> Option<&str> {
        self.tls_server_name.as_deref().or(self.host.as_deref())
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(host) = &self.host {
            write!(f, " {}", uri::authority_form(host, self.port))?;
        }
        if let Some(proxy) = &self.proxy_uri {
            write!(f, " via {}", proxy)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxySettings;

    fn key(url: &str, settings: &HttpSettings) -> ConnectionKey {
        ConnectionKey::for_request(&Request::get(url).unwrap(), settings).unwrap()
    }

    fn proxied() -> HttpSettings {
        let mut proxy = ProxySettings::new(Url::parse("http://proxy.local:3128").unwrap());
        proxy.bypass = vec![".internal".to_string()];
        HttpSettings {
            proxy: Some(proxy),
            ..HttpSettings::default()
        }
    }

    #[test]
    fn direct_keys() {
        let s = HttpSettings::default();
        let k = key("http://example.com/a", &s);
        assert_eq!(k.kind, ConnectionKind::Http);
        assert_eq!(k.host.as_deref(), Some("example.com"));
        assert_eq!(k.port, 80);
        assert_eq!(k.tls_server_name, None);
        let k = key("wss://example.com:8443/", &s);
        assert_eq!(k.kind, ConnectionKind::Https);
        assert_eq!(k.server_name(), Some("example.com"));
        assert_eq!(k.dial_endpoint().unwrap(), ("example.com".to_string(), 8443));
        assert_eq!(key("http://example.com/x", &s), key("http://example.com:80/y", &s));
    }

    #[test]
    fn host_header_overrides_tls_name() {
        let mut req = Request::get("https://10.0.0.5/").unwrap();
        req.header("Host", "virtual.example:443");
        let k = ConnectionKey::for_request(&req, &HttpSettings::default()).unwrap();
        assert_eq!(k.tls_server_name.as_deref(), Some("virtual.example"));
        assert_eq!(k.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(host_header_name("[::1]:8080"), "::1");
        assert_eq!(host_header_name("plain"), "plain");
    }

    #[test]
    fn proxy_keys() {
        let s = proxied();
        let a = key("http://a.example/", &s);
        let b = key("http://b.example:8080/", &s);
        assert_eq!(a.kind, ConnectionKind::Proxy);
        assert_eq!(a, b);
        assert_eq!(a.dial_endpoint().unwrap(), ("proxy.local".to_string(), 3128));

        let t = key("https://a.example/", &s);
        assert_eq!(t.kind, ConnectionKind::SslProxyTunnel);
        assert_ne!(t, key("https://b.example/", &s));
        assert_eq!(key("ws://a.example/", &s).kind, ConnectionKind::ProxyTunnel);

        assert_eq!(key("http://db.internal/", &s).kind, ConnectionKind::Http);

        let c = ConnectionKey::proxy_connect(&Url::parse("http://proxy.local:3128").unwrap());
        assert_eq!(c.kind, ConnectionKind::ProxyConnect);
        assert_eq!(c.dial_endpoint().unwrap(), ("proxy.local".to_string(), 3128));
    }

    #[test]
    fn proxy_disabled_goes_direct() {
        let mut s = proxied();
        s.use_proxy = false;
        assert_eq!(key("http://a.example/", &s).kind, ConnectionKind::Http);
    }
}

/*
 * net.rs
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

//! Socket establishment: TCP connect and rustls client handshakes.
//!
//! The TLS handshake itself belongs to rustls; this module only builds the client config
//! (native roots first, Mozilla roots as fallback) and wraps any stream.

use std::io;
use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;

use crate::error::HttpError;

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

static DEFAULT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

/// TLS client config for HTTP/1.1 with ALPN `http/1.1`. Built once per process.
pub fn http_client_config() -> Arc<ClientConfig> {
    DEFAULT_CONFIG
        .get_or_init(|| {
            let mut config = ClientConfig::builder()
                .with_root_certificates(build_root_store())
                .with_no_client_auth();
            config.alpn_protocols = vec![b"http/1.1".to_vec()];
            Arc::new(config)
        })
        .clone()
}

/// TCP connect with Nagle disabled.
pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, HttpError> {
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|source| HttpError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
    let _ = tcp.set_nodelay(true);
    Ok(tcp)
}

/// Run a client TLS handshake over `io` for `server_name`.
pub async fn tls_handshake<IO>(
    io: IO,
    server_name: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<IO>, HttpError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let name = ServerName::try_from(server_name.to_string()).map_err(|_| HttpError::Tls {
        host: server_name.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"),
    })?;
    TlsConnector::from(config)
        .connect(name, io)
        .await
        .map_err(|source| HttpError::Tls {
            host: server_name.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_offers_http11_only() {
        let config = http_client_config();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
        assert!(Arc::ptr_eq(&config, &http_client_config()));
    }

    #[tokio::test]
    async fn connect_refused_is_wrapped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        match connect_tcp("127.0.0.1", port).await {
            Err(HttpError::Connect { port: p, .. }) => assert_eq!(p, port),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}

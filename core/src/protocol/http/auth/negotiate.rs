/*
 * negotiate.rs
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

//! NTLM and Negotiate: the token exchange is delegated to a security context supplied by
//! the application (SSPI, GSSAPI, or a pure implementation). This module only moves
//! base64 blobs between headers and the context.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::Url;

use super::challenge::AuthScheme;
use super::credentials::Credential;
use crate::uri;

/// Failure inside a security context.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("security context error: {0}")]
    Context(String),
    #[error("challenge token is not valid base64")]
    InvalidToken,
}

/// One client-side authentication exchange.
pub trait SecurityContext: Send {
    /// Produce the next token from the server's last token (`None` on the first leg).
    /// `Ok(None)` means there is nothing more to send.
    fn next_token(&mut self, incoming: Option<&[u8]>) -> Result<Option<Vec<u8>>, AuthError>;

    /// The exchange is finished and the server's identity (if any) was verified.
    fn is_complete(&self) -> bool;
}

/// Creates security contexts. Without a provider NTLM and Negotiate are never selected.
pub trait SecurityContextProvider: Send + Sync {
    fn create_context(
        &self,
        scheme: AuthScheme,
        credential: &Credential,
        target_name: &str,
    ) -> Option<Box<dyn SecurityContext>>;
}

/// `HTTP/host`, with `:port` for non-default ports.
pub(crate) fn service_principal_name(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) if port != uri::default_port(url.scheme()) => format!("HTTP/{}:{}", host, port),
        _ => format!("HTTP/{}", host),
    }
}

/// Decode a challenge payload. An empty payload is the initial, token-less challenge.
pub(crate) fn decode_payload(payload: &str) -> Result<Option<Vec<u8>>, AuthError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    STANDARD
        .decode(payload)
        .map(Some)
        .map_err(|_| AuthError::InvalidToken)
}

pub(crate) fn encode_token(scheme: AuthScheme, token: &[u8]) -> String {
    format!("{} {}", scheme.name(), STANDARD.encode(token))
}

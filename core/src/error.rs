/*
 * error.rs
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

//! Request and protocol errors.
//!
//! Every variant of [`HttpError`] except [`HttpError::Cancelled`] means "the request failed";
//! the variant carries the root cause. Cancellation is kept apart so callers can tell a
//! cancelled request from a broken connection even though both interrupt socket I/O.

use std::io;

/// Errors surfaced by any stage of the client.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The caller's cancellation token fired.
    #[error("the operation was cancelled")]
    Cancelled,

    /// TCP connect (or connect timeout) to the given endpoint failed.
    #[error("error connecting to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// TLS handshake failed.
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Socket read/write failed on an established connection.
    #[error("error sending request: {0}")]
    Io(#[from] io::Error),

    /// The server sent bytes that violate HTTP/1.x grammar.
    #[error("invalid response: {0}")]
    Protocol(#[from] ProtocolError),

    /// A connection-based authentication handshake could not keep its connection.
    #[error("authentication failed because the connection could not be reused")]
    ConnectionNotReusable,

    /// The server's final authentication token did not validate.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The request cannot be sent as constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Content decoding of the response body failed.
    #[error("error decoding response body: {0}")]
    Decompression(#[source] io::Error),

    /// The pool was shut down while the request waited for a connection.
    #[error("connection pool has been disposed")]
    PoolDisposed,
}

impl HttpError {
    /// True for [`HttpError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HttpError::Cancelled)
    }

    /// True for socket-level failures on an established connection.
    ///
    /// Only these are candidates for the transparent retry on a reused connection.
    pub fn is_transport(&self) -> bool {
        match self {
            HttpError::Io(_) => true,
            HttpError::Protocol(ProtocolError::PrematureEof) => true,
            _ => false,
        }
    }

    pub(crate) fn invalid_request(msg: impl Into<String>) -> Self {
        HttpError::InvalidRequest(msg.into())
    }
}

/// HTTP/1.x grammar violations. All of them are fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed status line")]
    InvalidStatusLine,

    #[error("malformed header line: {0}")]
    InvalidHeaderLine(String),

    #[error("response headers exceeded the {0} byte limit")]
    HeadersTooLarge(usize),

    #[error("malformed chunk: {0}")]
    InvalidChunk(&'static str),

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("connection closed before the response completed")]
    PrematureEof,
}

/*
 * body.rs
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

//! Response bodies.
//!
//! A body read from the network owns its connection. When the framing says the body is
//! complete the connection goes back to the pool; a body dropped early is drained in the
//! background (bounded by `max_response_drain_size` and `response_drain_timeout`) so the
//! connection can still be reused. Bodies delimited by connection close are never reused.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::timeout;
use tracing::trace;

use crate::error::{HttpError, ProtocolError};
use crate::protocol::http::connection::{HttpConnection, Upgraded};
use crate::protocol::http::decompression::ContentDecoder;
use crate::protocol::http::h1::{ChunkEvent, ChunkedDecoder};
use crate::protocol::http::headers::Headers;

/// How the end of a response body is found on the wire.
pub(crate) enum Framing {
    /// No more body bytes.
    Complete,
    /// Bytes still owed under `Content-Length`.
    ContentLength(u64),
    Chunked(ChunkedDecoder),
    /// Read until the server closes the connection.
    UntilClose,
    /// Upgraded or tunneled stream: the rest of the connection belongs to the caller.
    Raw,
}

impl Framing {
    pub(crate) fn chunked(line_limit: usize) -> Self {
        Framing::Chunked(ChunkedDecoder::new(line_limit))
    }
}

impl fmt::Debug for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Complete => f.write_str("Complete"),
            Framing::ContentLength(n) => write!(f, "ContentLength({})", n),
            Framing::Chunked(d) => write!(f, "Chunked({:?})", d.state()),
            Framing::UntilClose => f.write_str("UntilClose"),
            Framing::Raw => f.write_str("Raw"),
        }
    }
}

/// Body bound to the connection it is read from.
pub(crate) struct ConnectionBody {
    conn: Option<HttpConnection>,
    framing: Framing,
    trailers: Option<Headers>,
    /// Keep the connection after completion instead of returning it to the pool.
    retain: bool,
}

impl ConnectionBody {
    fn new(conn: HttpConnection, framing: Framing) -> Self {
        Self {
            conn: Some(conn),
            framing,
            trailers: None,
            retain: false,
        }
    }

    /// Body is complete: release the connection, unless it is being retained.
    fn finish(&mut self) {
        self.framing = Framing::Complete;
        if let Some(conn) = self.conn.as_mut() {
            if !conn.read_buf.is_empty() {
                trace!(
                    connection_id = conn.id(),
                    extra = conn.read_buf.len(),
                    "data after end of response body"
                );
                conn.connection_close = true;
            }
            if self.retain {
                return;
            }
        }
        if let Some(conn) = self.conn.take() {
            conn.return_to_pool();
        }
    }

    /// Dispose the connection and pass the error through.
    fn fail(&mut self, error: HttpError) -> HttpError {
        self.conn = None;
        self.framing = Framing::Complete;
        error
    }

    async fn chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        loop {
            let conn = match self.conn.as_mut() {
                Some(c) => c,
                None => return Ok(None),
            };
            let need_more = match &mut self.framing {
                Framing::Complete => {
                    self.finish();
                    return Ok(None);
                }
                Framing::ContentLength(remaining) => {
                    if conn.read_buf.is_empty() {
                        true
                    } else {
                        let take = (*remaining).min(conn.read_buf.len() as u64) as usize;
                        let data = conn.read_buf.split_to(take).freeze();
                        *remaining -= take as u64;
                        if *remaining == 0 {
                            self.finish();
                        }
                        return Ok(Some(data));
                    }
                }
                Framing::Chunked(decoder) => match decoder.decode(&mut conn.read_buf) {
                    Ok(ChunkEvent::Data(data)) => return Ok(Some(data)),
                    Ok(ChunkEvent::Done) => {
                        let trailers = decoder.trailers().clone();
                        if !trailers.is_empty() {
                            self.trailers = Some(trailers);
                        }
                        self.finish();
                        return Ok(None);
                    }
                    Ok(ChunkEvent::NeedMore) => true,
                    Err(e) => return Err(self.fail(e.into())),
                },
                Framing::UntilClose | Framing::Raw => {
                    if conn.read_buf.is_empty() {
                        true
                    } else {
                        return Ok(Some(conn.read_buf.split().freeze()));
                    }
                }
            };
            if need_more {
                let until_close = matches!(self.framing, Framing::UntilClose | Framing::Raw);
                let filled = match self.conn.as_mut() {
                    Some(conn) => conn.fill().await,
                    None => return Ok(None),
                };
                match filled {
                    Ok(0) if until_close => {
                        self.conn = None;
                        self.framing = Framing::Complete;
                        return Ok(None);
                    }
                    Ok(0) => return Err(self.fail(ProtocolError::PrematureEof.into())),
                    Ok(_) => {}
                    Err(e) => return Err(self.fail(e.into())),
                }
            }
        }
    }

    /// Read and discard the rest of the body. True if the connection came out reusable
    /// (returned to the pool, or retained).
    async fn drain(&mut self, max_bytes: usize, max_time: Duration) -> bool {
        let conn_id = match self.conn.as_ref() {
            Some(c) => c.id(),
            None => return false,
        };
        match self.framing {
            Framing::Complete => {
                self.finish();
                return true;
            }
            Framing::UntilClose | Framing::Raw => {
                self.conn = None;
                return false;
            }
            Framing::ContentLength(remaining) if remaining > max_bytes as u64 => {
                trace!(connection_id = conn_id, remaining, "body too large to drain");
                self.conn = None;
                return false;
            }
            _ => {}
        }
        let drained = timeout(max_time, async {
            let mut total = 0usize;
            loop {
                match self.chunk().await {
                    Ok(Some(data)) => {
                        total += data.len();
                        if total > max_bytes {
                            return false;
                        }
                    }
                    Ok(None) => return true,
                    Err(_) => return false,
                }
            }
        })
        .await;
        match drained {
            Ok(true) if !self.retain || self.conn.is_some() => {
                trace!(connection_id = conn_id, "response drained");
                true
            }
            _ => {
                trace!(connection_id = conn_id, "drain failed, disposing connection");
                self.conn = None;
                false
            }
        }
    }
}

impl Drop for ConnectionBody {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(c) => c,
            None => return,
        };
        match std::mem::replace(&mut self.framing, Framing::Complete) {
            Framing::Complete => {
                let mut conn = conn;
                if !conn.read_buf.is_empty() {
                    conn.connection_close = true;
                }
                conn.return_to_pool();
            }
            framing @ (Framing::ContentLength(_) | Framing::Chunked(_)) => {
                let handle = match tokio::runtime::Handle::try_current() {
                    Ok(h) => h,
                    Err(_) => return,
                };
                let max_bytes = conn.settings().max_response_drain_size;
                let max_time = conn.settings().response_drain_timeout;
                let mut body = ConnectionBody::new(conn, framing);
                handle.spawn(async move {
                    body.drain(max_bytes, max_time).await;
                });
            }
            Framing::UntilClose | Framing::Raw => drop(conn),
        }
    }
}

enum RawBody {
    Empty,
    Full(Option<Bytes>),
    Connection(ConnectionBody),
}

impl RawBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        match self {
            RawBody::Empty => Ok(None),
            RawBody::Full(data) => Ok(data.take().filter(|d| !d.is_empty())),
            RawBody::Connection(body) => body.chunk().await,
        }
    }
}

/// A response body, read incrementally with [`Body::chunk`].
pub struct Body {
    raw: RawBody,
    decoder: Option<ContentDecoder>,
    decoder_finished: bool,
}

impl Body {
    pub fn empty() -> Self {
        Self::with_raw(RawBody::Empty)
    }

    fn with_raw(raw: RawBody) -> Self {
        Self {
            raw,
            decoder: None,
            decoder_finished: false,
        }
    }

    pub(crate) fn from_connection(conn: HttpConnection, framing: Framing) -> Self {
        Self::with_raw(RawBody::Connection(ConnectionBody::new(conn, framing)))
    }

    /// Decode the content coding of everything read from here on.
    pub(crate) fn set_decoder(&mut self, decoder: ContentDecoder) {
        self.decoder = Some(decoder);
    }

    /// Next piece of the body, or `None` once it is complete.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        let decoder = match self.decoder.as_mut() {
            Some(d) => d,
            None => return self.raw.chunk().await,
        };
        loop {
            if self.decoder_finished {
                return Ok(None);
            }
            match self.raw.chunk().await? {
                Some(data) => {
                    let out = decoder.decode(&data).map_err(HttpError::Decompression)?;
                    if !out.is_empty() {
                        return Ok(Some(out));
                    }
                }
                None => {
                    self.decoder_finished = true;
                    let out = decoder.finish().map_err(HttpError::Decompression)?;
                    return Ok(Some(out).filter(|o| !o.is_empty()));
                }
            }
        }
    }

    /// Read the whole body.
    pub async fn bytes(mut self) -> Result<Bytes, HttpError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Trailer fields of a chunked body, available once the body is complete.
    pub fn trailers(&self) -> Option<&Headers> {
        match &self.raw {
            RawBody::Connection(body) => body.trailers.as_ref(),
            _ => None,
        }
    }

    /// Take over the connection after `101 Switching Protocols` or a successful CONNECT.
    pub fn into_upgraded(mut self) -> Result<Upgraded, HttpError> {
        if let RawBody::Connection(body) = &mut self.raw {
            if matches!(body.framing, Framing::Raw) {
                if let Some(conn) = body.conn.take() {
                    body.framing = Framing::Complete;
                    return Ok(Upgraded::new(conn));
                }
            }
        }
        Err(HttpError::invalid_request("response is not a protocol upgrade"))
    }

    /// True if the connection behind this body will be closed rather than reused.
    pub(crate) fn connection_will_close(&self) -> bool {
        match &self.raw {
            RawBody::Connection(body) => body
                .conn
                .as_ref()
                .map(|c| c.connection_close)
                .unwrap_or(true),
            _ => true,
        }
    }

    /// Take the connection without reading the rest of the body. Used when the server
    /// announced it will close the connection anyway.
    pub(crate) fn detach_connection(mut self) -> Option<HttpConnection> {
        match &mut self.raw {
            RawBody::Connection(body) => {
                body.framing = Framing::Complete;
                body.conn.take()
            }
            _ => None,
        }
    }

    /// Drain the body and take back its connection for another request on the same
    /// connection. Fails if the body cannot be drained within the configured budget or the
    /// connection is not reusable.
    pub(crate) async fn reclaim_connection(mut self) -> Result<HttpConnection, HttpError> {
        let body = match (&mut self.raw, &self.decoder) {
            (RawBody::Connection(body), None) => body,
            _ => return Err(HttpError::ConnectionNotReusable),
        };
        let (max_bytes, max_time) = match body.conn.as_ref() {
            Some(conn) => (
                conn.settings().max_response_drain_size,
                conn.settings().response_drain_timeout,
            ),
            None => return Err(HttpError::ConnectionNotReusable),
        };
        body.retain = true;
        if !body.drain(max_bytes, max_time).await {
            return Err(HttpError::ConnectionNotReusable);
        }
        match body.conn.take() {
            Some(conn) if !conn.connection_close => Ok(conn),
            _ => Err(HttpError::ConnectionNotReusable),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self::with_raw(RawBody::Full(Some(data)))
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Body::from(Bytes::from(data))
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Body::from(Bytes::from_static(data.as_bytes()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            RawBody::Empty => f.write_str("Body::Empty"),
            RawBody::Full(d) => write!(f, "Body::Full({} bytes)", d.as_ref().map(|d| d.len()).unwrap_or(0)),
            RawBody::Connection(b) => write!(f, "Body::Connection({:?})", b.framing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_body_reads_once() {
        let mut body = Body::from("hello");
        assert_eq!(body.chunk().await.unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(body.chunk().await.unwrap().is_none());
        assert!(Body::empty().bytes().await.unwrap().is_empty());
    }

    #[test]
    fn non_connection_body_cannot_upgrade() {
        assert!(Body::from("x").into_upgraded().is_err());
        assert!(Body::empty().connection_will_close());
    }
}

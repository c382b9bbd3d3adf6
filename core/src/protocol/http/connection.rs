/*
 * connection.rs
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

//! HTTP/1.1 connection: one TCP, TLS or tunneled stream, a read buffer, and the
//! request/response exchange.
//!
//! A connection is moved, never shared: `send` consumes it and the returned response body
//! owns it until the body completes, at which point it goes back to its pool. Dropping a
//! connection that belongs to a pool frees its admission slot.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::HttpSettings;
use crate::error::{HttpError, ProtocolError};
use crate::protocol::http::body::{Body, Framing};
use crate::protocol::http::h1::{
    encode_chunked_body, encode_request_head, ResponseHead, ResponseHeadParser, WRITE_CHUNK_SIZE,
};
use crate::protocol::http::pool::{ConnectionKind, HttpConnectionPool};
use crate::protocol::http::request::{Method, Request, Version};
use crate::protocol::http::response::Response;
use crate::uri;

const READ_BUFFER_SIZE: usize = 8192;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unified stream: plain TCP, TLS, or either one inside a proxy CONNECT tunnel.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Tunnel(Box<Upgraded>),
    TunnelTls(Box<TlsStream<Upgraded>>),
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            HttpStream::Tunnel(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            HttpStream::TunnelTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            HttpStream::Tunnel(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            HttpStream::TunnelTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            HttpStream::Tunnel(s) => Pin::new(s.as_mut()).poll_flush(cx),
            HttpStream::TunnelTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            HttpStream::Tunnel(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            HttpStream::TunnelTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Raw duplex stream taken over from a connection after `101 Switching Protocols` or a
/// successful CONNECT. Bytes already buffered by the parser are read first.
///
/// The connection (and its pool slot, if any) lives as long as this value.
pub struct Upgraded {
    conn: HttpConnection,
}

impl Upgraded {
    pub(crate) fn new(conn: HttpConnection) -> Self {
        Self { conn }
    }

    pub fn connection_id(&self) -> u64 {
        self.conn.id
    }
}

impl AsyncRead for Upgraded {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let conn = &mut self.conn;
        if !conn.read_buf.is_empty() {
            let n = conn.read_buf.len().min(buf.remaining());
            buf.put_slice(&conn.read_buf[..n]);
            conn.read_buf.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut conn.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Upgraded {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.conn.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.conn.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.conn.stream).poll_shutdown(cx)
    }
}

/// A failed exchange, plus whether it may be replayed on another connection.
#[derive(Debug)]
pub(crate) struct SendError {
    pub error: HttpError,
    pub can_retry: bool,
}

impl From<HttpError> for SendError {
    fn from(error: HttpError) -> Self {
        SendError {
            error,
            can_retry: false,
        }
    }
}

/// One HTTP/1.1 connection.
pub struct HttpConnection {
    id: u64,
    stream: HttpStream,
    kind: ConnectionKind,
    settings: Arc<HttpSettings>,
    pool: Option<Arc<HttpConnectionPool>>,
    pub(crate) read_buf: BytesMut,
    created_at: Instant,
    reused: bool,
    /// No request body byte has been written and no response byte read for the current request.
    can_retry: bool,
    /// The server or the framing requires this connection to be closed after the response.
    pub(crate) connection_close: bool,
}

impl HttpConnection {
    /// Wrap an established stream. `pool` is the pool whose admission slot this connection holds.
    pub(crate) fn new(
        stream: HttpStream,
        kind: ConnectionKind,
        settings: Arc<HttpSettings>,
        pool: Option<Arc<HttpConnectionPool>>,
    ) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = id, ?kind, "connection established");
        Self {
            id,
            stream,
            kind,
            settings,
            pool,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            created_at: Instant::now(),
            reused: false,
            can_retry: false,
            connection_close: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether this connection already served a request before the current one.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    pub(crate) fn settings(&self) -> &Arc<HttpSettings> {
        &self.settings
    }

    /// True once the connection has outlived `pooled_connection_lifetime`.
    pub fn lifetime_expired(&self) -> bool {
        match self.settings.pooled_connection_lifetime {
            Some(lifetime) => self.created_at.elapsed() >= lifetime,
            None => false,
        }
    }

    /// Detach from the pool so that dropping this connection does not free a slot.
    /// The caller becomes responsible for that slot.
    pub(crate) fn detach_pool(&mut self) -> Option<Arc<HttpConnectionPool>> {
        self.pool.take()
    }

    /// Zero-timeout read probe on an idle connection. An idle HTTP/1.1 connection must have
    /// nothing to read; EOF, an error, or stray bytes all make it unusable. When the stream
    /// is not ready the probe reports usable.
    pub(crate) fn poll_usable(&mut self) -> bool {
        if self.connection_close || !self.read_buf.is_empty() {
            return false;
        }
        self.read_buf.reserve(1);
        match self.stream.read_buf(&mut self.read_buf).now_or_never() {
            None => true,
            Some(Ok(0)) => {
                trace!(connection_id = self.id, "idle connection closed by peer");
                false
            }
            Some(Ok(n)) => {
                trace!(connection_id = self.id, bytes = n, "unexpected data on idle connection");
                false
            }
            Some(Err(e)) => {
                trace!(connection_id = self.id, error = %e, "idle connection failed");
                false
            }
        }
    }

    /// Hand the connection back to its pool, or dispose it if it must not be reused.
    pub(crate) fn return_to_pool(mut self) {
        if self.connection_close {
            trace!(connection_id = self.id, "disposing non-reusable connection");
            return;
        }
        match self.pool.clone() {
            Some(pool) => {
                self.reused = true;
                pool.return_connection(self);
            }
            None => trace!(connection_id = self.id, "disposing unpooled connection"),
        }
    }

    /// Read more bytes into the read buffer. Returns 0 on EOF.
    pub(crate) async fn fill(&mut self) -> io::Result<usize> {
        self.read_buf.reserve(READ_BUFFER_SIZE);
        let n = self.stream.read_buf(&mut self.read_buf).await?;
        if n > 0 {
            self.can_retry = false;
        }
        Ok(n)
    }

    /// Send the request and read the response head. The returned response body owns the
    /// connection. On failure or cancellation the connection is disposed.
    pub async fn send(self, request: &Request, cancel: &CancellationToken) -> Result<Response, HttpError> {
        self.send_retryable(request, cancel).await.map_err(|e| e.error)
    }

    pub(crate) async fn send_retryable(
        mut self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, SendError> {
        self.can_retry = true;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HttpError::Cancelled),
            r = self.exchange(request) => r,
        };
        match result {
            Ok((head, framing)) => Ok(self.into_response(request, head, framing)),
            Err(error) => {
                let can_retry = self.can_retry && !error.is_cancelled();
                debug!(connection_id = self.id, error = %error, can_retry, "request failed, disposing connection");
                Err(SendError { error, can_retry })
            }
        }
    }

    async fn exchange(&mut self, request: &Request) -> Result<(ResponseHead, Framing), HttpError> {
        if !self.read_buf.is_empty() {
            // Leftover bytes from an earlier response: the connection is out of sync.
            self.can_retry = true;
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "unexpected data on pooled connection",
            )));
        }

        let target = self.request_target(request);
        let cookie = match (&self.settings.cookie_store, self.settings.use_cookies) {
            (Some(store), true) => store.cookie_header(&request.url),
            _ => None,
        };
        let mut out = BytesMut::new();
        encode_request_head(request, &target, cookie.as_deref(), &mut out)?;
        trace!(
            connection_id = self.id,
            method = request.method.as_str(),
            target = %target,
            "sending request"
        );

        let expect_continue = request.expects_continue();
        let mut body_pending = request.body.is_some() || request.is_chunked();
        if body_pending && !expect_continue {
            self.stream.write_all(&out).await?;
            self.write_body(request).await?;
            body_pending = false;
        } else {
            self.stream.write_all(&out).await?;
            self.stream.flush().await?;
        }

        if body_pending {
            // Wait for the first response bytes or the timer, whichever comes first.
            match timeout(self.settings.expect_100_continue_timeout, self.wait_readable()).await {
                Err(_elapsed) => {
                    trace!(connection_id = self.id, "no 100 Continue, sending body after timeout");
                    self.write_body(request).await?;
                    body_pending = false;
                }
                Ok(r) => r?,
            }
        }

        let mut parser = ResponseHeadParser::new(self.settings.max_response_headers_length);
        let head = loop {
            let head = self.read_head(&mut parser).await?;
            match head.code {
                100 => {
                    if body_pending {
                        self.write_body(request).await?;
                        body_pending = false;
                    }
                    parser.reset();
                }
                101 => break head,
                102..=199 => parser.reset(),
                _ => break head,
            }
        };

        if body_pending {
            if head.code >= 300 {
                // Final status before the body was sent: skip it, the server may still expect it.
                self.connection_close = true;
            } else {
                self.write_body(request).await?;
            }
        }

        let framing = self.framing(request, &head)?;
        if head.headers.has_token("Connection", "close")
            || request.headers.has_token("Connection", "close")
            || (head.version == Version::Http10 && !head.headers.has_token("Connection", "keep-alive"))
            || matches!(framing, Framing::UntilClose | Framing::Raw)
        {
            self.connection_close = true;
        }
        Ok((head, framing))
    }

    fn request_target(&self, request: &Request) -> String {
        if request.method == Method::Connect {
            uri::authority_form(&uri::connect_host(&request.url), uri::port_or_default(&request.url))
        } else if self.kind == ConnectionKind::Proxy {
            uri::absolute_form(&request.url)
        } else {
            uri::origin_form(&request.url)
        }
    }

    async fn write_body(&mut self, request: &Request) -> Result<(), HttpError> {
        let chunked = request.is_chunked();
        let body: &[u8] = match &request.body {
            Some(b) => b,
            // A chunked request without content still needs its terminal chunk.
            None if chunked => &[],
            None => return Ok(()),
        };
        self.can_retry = false;
        if chunked {
            let mut out = BytesMut::with_capacity(body.len() + 64);
            encode_chunked_body(body, WRITE_CHUNK_SIZE, &mut out);
            self.stream.write_all(&out).await?;
        } else {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn wait_readable(&mut self) -> Result<(), HttpError> {
        if self.read_buf.is_empty() && self.fill().await? == 0 {
            return Err(ProtocolError::PrematureEof.into());
        }
        Ok(())
    }

    async fn read_head(&mut self, parser: &mut ResponseHeadParser) -> Result<ResponseHead, HttpError> {
        loop {
            if let Some(head) = parser.receive(&mut self.read_buf)? {
                return Ok(head);
            }
            if self.fill().await? == 0 {
                return Err(ProtocolError::PrematureEof.into());
            }
        }
    }

    /// Body framing, in priority order: no body, raw duplex, chunked, Content-Length, until close.
    fn framing(&self, request: &Request, head: &ResponseHead) -> Result<Framing, HttpError> {
        if request.method == Method::Head || head.code == 204 || head.code == 304 {
            return Ok(Framing::Complete);
        }
        if head.code == 101 || (request.method == Method::Connect && (200..300).contains(&head.code)) {
            return Ok(Framing::Raw);
        }
        if head.headers.contains("Transfer-Encoding") {
            let last = head
                .headers
                .get_all("Transfer-Encoding")
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .last();
            if last.map(|t| t.eq_ignore_ascii_case("chunked")).unwrap_or(false) {
                return Ok(Framing::chunked(self.settings.max_response_headers_length));
            }
            return Ok(Framing::UntilClose);
        }
        if head.headers.contains("Content-Length") {
            let length = parse_content_length(&head.headers)?;
            return Ok(if length == 0 {
                Framing::Complete
            } else {
                Framing::ContentLength(length)
            });
        }
        Ok(Framing::UntilClose)
    }

    fn into_response(self, request: &Request, head: ResponseHead, framing: Framing) -> Response {
        if self.settings.use_cookies {
            if let Some(store) = &self.settings.cookie_store {
                let values: Vec<&str> = head.headers.get_all("Set-Cookie").collect();
                if !values.is_empty() {
                    store.set_cookies(&request.url, &values);
                }
            }
        }
        trace!(connection_id = self.id, status = head.code, ?framing, "response head received");
        Response {
            status: head.code,
            reason: head.reason,
            version: head.version,
            headers: head.headers,
            url: request.url.clone(),
            body: Body::from_connection(self, framing),
        }
    }
}

/// All Content-Length values (comma lists included) must agree.
fn parse_content_length(headers: &crate::protocol::http::headers::Headers) -> Result<u64, HttpError> {
    let mut length: Option<u64> = None;
    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidContentLength(value.to_string()).into());
        }
        let n: u64 = value
            .parse()
            .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
        match length {
            Some(prev) if prev != n => {
                return Err(ProtocolError::InvalidContentLength(format!("{} and {}", prev, n)).into())
            }
            _ => length = Some(n),
        }
    }
    length.ok_or_else(|| ProtocolError::InvalidContentLength(String::new()).into())
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        trace!(connection_id = self.id, "connection disposed");
        if let Some(pool) = self.pool.take() {
            pool.decrement_connection_count();
        }
    }
}

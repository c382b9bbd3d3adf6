/*
 * mod.rs
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

//! Per-destination connection pool.
//!
//! - Idle connections are reused most-recently-returned first, after a liveness probe.
//! - At most `max_connections_per_server` connections are associated with the pool at once.
//!   Requests beyond that wait in FIFO order; a returned connection goes to the oldest waiter
//!   before the idle list, and a freed slot becomes a creation attempt for the oldest waiter.
//! - The state mutex is never held across an await, and connections are only dropped with
//!   it released (dropping one re-enters the pool through `decrement_connection_count`).

mod key;
pub mod manager;
mod waiters;

pub use key::{ConnectionKey, ConnectionKind};
pub use manager::HttpConnectionPoolManager;

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::HttpSettings;
use crate::error::HttpError;
use crate::net;
use crate::protocol::http::auth::{self, Credential, CredentialCache, Credentials};
use crate::protocol::http::connection::{HttpConnection, HttpStream, SendError};
use crate::protocol::http::request::Request;
use crate::protocol::http::response::Response;
use crate::uri;

use manager::ManagerShared;
use waiters::{WaiterId, WaiterQueue};

/// Result of acquiring: a connection, or a response produced while establishing one
/// (a proxy refusing CONNECT).
pub enum Acquired {
    Connection(HttpConnection),
    Response(Response),
}

struct IdleConnection {
    conn: HttpConnection,
    returned_at: Instant,
}

struct Waiter {
    tx: oneshot::Sender<Result<Acquired, HttpError>>,
    user_agent: Option<String>,
    cancel: CancellationToken,
}

struct PoolState {
    /// Most recently returned last.
    idle: Vec<IdleConnection>,
    waiters: WaiterQueue<Waiter>,
    /// Connections that exist (or are being created) for this pool, in use or idle.
    associated: usize,
    disposed: bool,
    used_since_cleanup: bool,
}

enum Next {
    Idle(IdleConnection),
    Create,
    Wait(oneshot::Receiver<Result<Acquired, HttpError>>, WaiterId),
}

pub struct HttpConnectionPool {
    key: ConnectionKey,
    settings: Arc<HttpSettings>,
    manager: Weak<ManagerShared>,
    max_connections: usize,
    proxy_credentials: Option<Arc<dyn Credentials>>,
    state: Mutex<PoolState>,
    preauth: Mutex<CredentialCache>,
}

impl HttpConnectionPool {
    pub(crate) fn new(key: ConnectionKey, settings: Arc<HttpSettings>, manager: Weak<ManagerShared>) -> Arc<Self> {
        let proxy_credentials = if matches!(key.kind, ConnectionKind::Proxy | ConnectionKind::ProxyConnect) {
            settings
                .active_proxy()
                .and_then(|p| p.credentials.clone())
                .or_else(|| {
                    key.proxy_uri
                        .as_ref()
                        .and_then(uri::userinfo)
                        .map(|(user, pass)| Arc::new(Credential::new(user, pass)) as Arc<dyn Credentials>)
                })
        } else {
            None
        };
        debug!(key = %key, "creating connection pool");
        Arc::new(Self {
            max_connections: settings.max_connections_per_server.max(1),
            key,
            settings,
            manager,
            proxy_credentials,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                waiters: WaiterQueue::new(),
                associated: 0,
                disposed: false,
                used_since_cleanup: false,
            }),
            preauth: Mutex::new(CredentialCache::new()),
        })
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub(crate) fn settings(&self) -> &Arc<HttpSettings> {
        &self.settings
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn preauth(&self) -> MutexGuard<'_, CredentialCache> {
        self.preauth.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn proxy_credentials(&self) -> Option<&Arc<dyn Credentials>> {
        self.proxy_credentials.as_ref()
    }

    /// Connections currently associated with the pool.
    pub fn connection_count(&self) -> usize {
        self.state().associated
    }

    pub fn idle_count(&self) -> usize {
        self.state().idle.len()
    }

    pub fn waiter_count(&self) -> usize {
        self.state().waiters.len()
    }

    fn is_usable(&self, idle: &mut IdleConnection, now: Instant) -> bool {
        if idle.conn.lifetime_expired() {
            trace!(connection_id = idle.conn.id(), "connection exceeded its lifetime");
            return false;
        }
        if let Some(limit) = self.settings.pooled_connection_idle_timeout {
            if now.saturating_duration_since(idle.returned_at) >= limit {
                trace!(connection_id = idle.conn.id(), "connection exceeded idle timeout");
                return false;
            }
        }
        idle.conn.poll_usable()
    }

    /// Get a connection for a request: an idle one, a new one if under the cap, or the next
    /// one freed up. Cancelling `cancel` abandons the wait.
    pub async fn acquire(
        self: &Arc<Self>,
        user_agent: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Acquired, HttpError> {
        loop {
            if cancel.is_cancelled() {
                return Err(HttpError::Cancelled);
            }
            let next = {
                let mut st = self.state();
                st.used_since_cleanup = true;
                if let Some(idle) = st.idle.pop() {
                    Next::Idle(idle)
                } else if st.associated < self.max_connections {
                    st.associated += 1;
                    Next::Create
                } else {
                    let (tx, rx) = oneshot::channel();
                    let id = st.waiters.push_back(Waiter {
                        tx,
                        user_agent: user_agent.map(str::to_string),
                        cancel: cancel.clone(),
                    });
                    trace!(key = %self.key, waiters = st.waiters.len(), "waiting for a connection");
                    Next::Wait(rx, id)
                }
            };
            match next {
                Next::Idle(mut idle) => {
                    if self.is_usable(&mut idle, Instant::now()) {
                        trace!(connection_id = idle.conn.id(), "reusing idle connection");
                        return Ok(Acquired::Connection(idle.conn));
                    }
                    drop(idle);
                }
                Next::Create => return self.create_for_caller(user_agent, cancel).await,
                Next::Wait(rx, id) => return self.wait(rx, id, cancel).await,
            }
        }
    }

    async fn wait(
        self: &Arc<Self>,
        mut rx: oneshot::Receiver<Result<Acquired, HttpError>>,
        id: WaiterId,
        cancel: &CancellationToken,
    ) -> Result<Acquired, HttpError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let removed = self.state().waiters.remove(id);
                if removed.is_none() {
                    // Already dequeued: something may have been delivered, pass it on.
                    rx.close();
                    if let Ok(Ok(Acquired::Connection(conn))) = rx.try_recv() {
                        conn.return_to_pool();
                    }
                }
                drop(removed);
                Err(HttpError::Cancelled)
            }
            delivered = &mut rx => match delivered {
                Ok(result) => result,
                Err(_) => Err(HttpError::PoolDisposed),
            },
        }
    }

    async fn create_for_caller(
        self: &Arc<Self>,
        user_agent: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Acquired, HttpError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HttpError::Cancelled),
            r = self.establish(user_agent, cancel) => r,
        };
        self.settle_creation(result)
    }

    /// A creation that produced no connection gives its slot back.
    fn settle_creation(self: &Arc<Self>, result: Result<Acquired, HttpError>) -> Result<Acquired, HttpError> {
        match result {
            Ok(Acquired::Connection(conn)) => Ok(Acquired::Connection(conn)),
            Ok(Acquired::Response(response)) => {
                self.decrement_connection_count();
                Ok(Acquired::Response(response))
            }
            Err(e) => {
                debug!(key = %self.key, error = %e, "connection establishment failed");
                self.decrement_connection_count();
                Err(e)
            }
        }
    }

    async fn create_for_waiter(self: Arc<Self>, waiter: Waiter) {
        let result = tokio::select! {
            biased;
            _ = waiter.cancel.cancelled() => Err(HttpError::Cancelled),
            r = self.establish(waiter.user_agent.as_deref(), &waiter.cancel) => r,
        };
        let result = self.settle_creation(result);
        if let Err(Ok(Acquired::Connection(conn))) = waiter.tx.send(result) {
            // The waiter gave up; offer the connection to the others.
            conn.return_to_pool();
        }
    }

    /// Open a new connection of this pool's kind, bounded by the connect timeout.
    async fn establish(self: &Arc<Self>, user_agent: Option<&str>, cancel: &CancellationToken) -> Result<Acquired, HttpError> {
        match timeout(self.settings.connect_timeout, self.establish_stream(user_agent, cancel)).await {
            Ok(result) => result,
            Err(_) => {
                let (host, port) = self.key.dial_endpoint()?;
                Err(HttpError::Connect {
                    host,
                    port,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out"),
                })
            }
        }
    }

    async fn establish_stream(
        self: &Arc<Self>,
        user_agent: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Acquired, HttpError> {
        let tls_config = || self.settings.tls_config.clone().unwrap_or_else(net::http_client_config);
        let server_name = || self.key.server_name().unwrap_or("").to_string();
        let stream = match self.key.kind {
            ConnectionKind::Http | ConnectionKind::Proxy | ConnectionKind::ProxyConnect => {
                let (host, port) = self.key.dial_endpoint()?;
                HttpStream::Plain(net::connect_tcp(&host, port).await?)
            }
            ConnectionKind::Https => {
                let (host, port) = self.key.dial_endpoint()?;
                let tcp = net::connect_tcp(&host, port).await?;
                HttpStream::Tls(Box::new(net::tls_handshake(tcp, &server_name(), tls_config()).await?))
            }
            ConnectionKind::ProxyTunnel | ConnectionKind::SslProxyTunnel => {
                let manager = self.manager.upgrade().ok_or(HttpError::PoolDisposed)?;
                let tunnel = match manager.establish_tunnel(&self.key, user_agent, cancel).await? {
                    Ok(tunnel) => tunnel,
                    Err(response) => return Ok(Acquired::Response(response)),
                };
                if self.key.kind == ConnectionKind::SslProxyTunnel {
                    HttpStream::TunnelTls(Box::new(
                        net::tls_handshake(tunnel, &server_name(), tls_config()).await?,
                    ))
                } else {
                    HttpStream::Tunnel(Box::new(tunnel))
                }
            }
        };
        Ok(Acquired::Connection(HttpConnection::new(
            stream,
            self.key.kind,
            self.settings.clone(),
            Some(self.clone()),
        )))
    }

    /// Replace a connection the server is closing with a new one in the same admission slot.
    pub(crate) async fn replace_connection(
        self: &Arc<Self>,
        mut old: HttpConnection,
        user_agent: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<HttpConnection, HttpError> {
        trace!(connection_id = old.id(), "replacing connection");
        // The slot passes from the old connection to the new one.
        old.detach_pool();
        drop(old);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HttpError::Cancelled),
            r = self.establish(user_agent, cancel) => r,
        };
        match self.settle_creation(result)? {
            Acquired::Connection(conn) => Ok(conn),
            Acquired::Response(_) => Err(HttpError::ConnectionNotReusable),
        }
    }

    /// Give back a connection whose response completed. The oldest waiter gets it first.
    pub(crate) fn return_connection(self: &Arc<Self>, mut conn: HttpConnection) {
        if conn.lifetime_expired() || self.settings.pooling_disabled() {
            trace!(connection_id = conn.id(), "not pooling connection");
            return;
        }
        // Dropping an unusable connection frees its slot for the oldest waiter instead.
        if !conn.poll_usable() {
            trace!(connection_id = conn.id(), "returned connection is no longer usable");
            return;
        }
        loop {
            let waiter = {
                let mut st = self.state();
                if st.disposed {
                    None
                } else {
                    match st.waiters.pop_front() {
                        Some(w) => Some(w),
                        None => {
                            trace!(connection_id = conn.id(), idle = st.idle.len() + 1, "connection returned to idle list");
                            st.idle.push(IdleConnection {
                                conn,
                                returned_at: Instant::now(),
                            });
                            return;
                        }
                    }
                }
            };
            let waiter = match waiter {
                Some(w) => w,
                None => {
                    trace!(connection_id = conn.id(), "pool disposed, closing returned connection");
                    return;
                }
            };
            if waiter.cancel.is_cancelled() {
                continue;
            }
            trace!(connection_id = conn.id(), "handing connection to waiter");
            match waiter.tx.send(Ok(Acquired::Connection(conn))) {
                Ok(()) => return,
                Err(Ok(Acquired::Connection(back))) => conn = back,
                Err(_) => return,
            }
        }
    }

    /// A connection of this pool was disposed. Its slot becomes a creation attempt for the
    /// oldest waiter, if any.
    pub(crate) fn decrement_connection_count(self: &Arc<Self>) {
        let waiter = {
            let mut st = self.state();
            st.associated = st.associated.saturating_sub(1);
            let mut next = None;
            if !st.disposed {
                while let Some(w) = st.waiters.pop_front() {
                    if !w.cancel.is_cancelled() {
                        st.associated += 1;
                        next = Some(w);
                        break;
                    }
                }
            }
            next
        };
        if let Some(waiter) = waiter {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    trace!(key = %self.key, "creating connection for waiter");
                    handle.spawn(self.clone().create_for_waiter(waiter));
                }
                Err(_) => {
                    self.state().associated -= 1;
                    drop(waiter);
                }
            }
        }
    }

    /// Sweep idle connections that expired or fail the liveness probe. Returns true when
    /// the pool had no connections and no use since the previous sweep; it is then disposed
    /// and should be removed by the manager.
    pub(crate) fn cleanup(&self) -> bool {
        let now = Instant::now();
        let (expired, removable) = {
            let mut st = self.state();
            let idle = std::mem::take(&mut st.idle);
            let mut expired = Vec::new();
            for mut entry in idle {
                if self.is_usable(&mut entry, now) {
                    st.idle.push(entry);
                } else {
                    expired.push(entry);
                }
            }
            let remaining = st.associated.saturating_sub(expired.len());
            let removable = remaining == 0 && st.waiters.is_empty() && !st.used_since_cleanup;
            st.used_since_cleanup = false;
            if removable {
                st.disposed = true;
            }
            (expired, removable)
        };
        if !expired.is_empty() {
            debug!(key = %self.key, count = expired.len(), "closing expired idle connections");
        }
        drop(expired);
        removable
    }

    /// Close idle connections and fail all waiters. Connections in use are closed when returned.
    pub(crate) fn dispose(&self) {
        let (idle, waiters) = {
            let mut st = self.state();
            st.disposed = true;
            let idle = std::mem::take(&mut st.idle);
            let mut waiters = Vec::new();
            while let Some(w) = st.waiters.pop_front() {
                waiters.push(w);
            }
            (idle, waiters)
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(HttpError::PoolDisposed));
        }
        drop(idle);
    }

    /// Send on a pooled connection, with proxy authentication when this pool talks to a
    /// proxy that has credentials.
    pub(crate) async fn send(
        self: &Arc<Self>,
        request: &mut Request,
        do_request_auth: bool,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpError> {
        if self.proxy_credentials.is_some() {
            auth::send_with_proxy_auth(self, request, do_request_auth, cancel).await
        } else {
            self.send_with_retry(request, do_request_auth, cancel).await
        }
    }

    /// Acquire and send. A transport failure on a reused connection before any body byte
    /// was written or response byte read is retried once on another connection.
    pub(crate) async fn send_with_retry(
        self: &Arc<Self>,
        request: &mut Request,
        do_request_auth: bool,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpError> {
        let user_agent = request.headers.get("User-Agent").map(str::to_string);
        let mut retried = false;
        loop {
            let conn = match self.acquire(user_agent.as_deref(), cancel).await? {
                Acquired::Connection(conn) => conn,
                Acquired::Response(response) => return Ok(response),
            };
            let reused = conn.is_reused();
            match self.send_on_connection(conn, request, do_request_auth, cancel).await {
                Ok(response) => return Ok(response),
                Err(SendError { error, can_retry }) if can_retry && reused && !retried && error.is_transport() => {
                    debug!(key = %self.key, error = %error, "retrying request on another connection");
                    retried = true;
                }
                Err(e) => return Err(e.error),
            }
        }
    }

    async fn send_on_connection(
        self: &Arc<Self>,
        conn: HttpConnection,
        request: &mut Request,
        do_request_auth: bool,
        cancel: &CancellationToken,
    ) -> Result<Response, SendError> {
        let server_nt = do_request_auth
            && self.settings.credentials.is_some()
            && self.settings.security_context_provider.is_some();
        if server_nt {
            auth::send_with_nt_connection_auth(self, conn, request, cancel).await
        } else {
            self.send_with_nt_proxy_auth(conn, request, cancel).await
        }
    }

    /// Send on `conn`, running a connection-based proxy handshake if the proxy asks for one.
    pub(crate) async fn send_with_nt_proxy_auth(
        self: &Arc<Self>,
        conn: HttpConnection,
        request: &mut Request,
        cancel: &CancellationToken,
    ) -> Result<Response, SendError> {
        if self.proxy_credentials.is_some() && self.settings.security_context_provider.is_some() {
            auth::send_with_nt_proxy_auth(self, conn, request, cancel).await
        } else {
            conn.send_retryable(request, cancel).await
        }
    }
}

impl Drop for HttpConnectionPool {
    fn drop(&mut self) {
        trace!(key = %self.key, "connection pool dropped");
    }
}

#[cfg(test)]
mod tests;

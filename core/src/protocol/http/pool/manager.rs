/*
 * manager.rs
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

//! Routes requests to pools by [`ConnectionKey`] and reaps idle pools.
//!
//! The reaping task holds only a weak reference: it exits when the manager is dropped, and
//! also when the last pool has been removed. Creating the next pool starts it again.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use super::{ConnectionKey, HttpConnectionPool};
use crate::config::HttpSettings;
use crate::error::HttpError;
use crate::protocol::http::connection::Upgraded;
use crate::protocol::http::handler::HttpHandler;
use crate::protocol::http::request::{Method, Request};
use crate::protocol::http::response::Response;
use crate::uri;

struct PoolMap {
    pools: HashMap<ConnectionKey, Arc<HttpConnectionPool>>,
    reaper_running: bool,
}

/// State shared between the manager handle, its pools and the reaping task.
pub(crate) struct ManagerShared {
    settings: Arc<HttpSettings>,
    map: RwLock<PoolMap>,
}

impl ManagerShared {
    fn get_pool(self: &Arc<Self>, key: ConnectionKey) -> Arc<HttpConnectionPool> {
        {
            let map = self.map.read().unwrap_or_else(|e| e.into_inner());
            if let Some(pool) = map.pools.get(&key) {
                return pool.clone();
            }
        }
        let (pool, start_reaper) = {
            let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
            if let Some(pool) = map.pools.get(&key) {
                return pool.clone();
            }
            let pool = HttpConnectionPool::new(key.clone(), self.settings.clone(), Arc::downgrade(self));
            map.pools.insert(key, pool.clone());
            let start = !map.reaper_running;
            map.reaper_running = true;
            (pool, start)
        };
        if start_reaper {
            self.start_reaper();
        }
        pool
    }

    fn start_reaper(self: &Arc<Self>) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                self.map.write().unwrap_or_else(|e| e.into_inner()).reaper_running = false;
                return;
            }
        };
        let interval = self.settings.cleanup_interval();
        let weak = Arc::downgrade(self);
        trace!(?interval, "starting pool reaper");
        handle.spawn(reap(weak, interval));
    }

    /// One sweep over all pools. With `from_reaper`, returns false once no pools remain,
    /// marking the reaper stopped.
    fn sweep(&self, from_reaper: bool) -> bool {
        let pools: Vec<Arc<HttpConnectionPool>> = {
            let map = self.map.read().unwrap_or_else(|e| e.into_inner());
            map.pools.values().cloned().collect()
        };
        let removable: Vec<ConnectionKey> = pools
            .iter()
            .filter(|p| p.cleanup())
            .map(|p| p.key().clone())
            .collect();
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        for key in removable {
            debug!(key = %key, "removing unused connection pool");
            map.pools.remove(&key);
        }
        if from_reaper && map.pools.is_empty() {
            map.reaper_running = false;
            return false;
        }
        true
    }

    fn dispose(&self) {
        let pools: Vec<Arc<HttpConnectionPool>> = {
            let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
            map.pools.drain().map(|(_, p)| p).collect()
        };
        for pool in pools {
            pool.dispose();
        }
    }

    /// Open a CONNECT tunnel to the key's destination through its proxy. A non-2xx answer
    /// from the proxy is returned as `Err(response)` for the caller to see.
    pub(crate) fn establish_tunnel<'a>(
        self: &'a Arc<Self>,
        key: &'a ConnectionKey,
        user_agent: Option<&'a str>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Result<Upgraded, Response>, HttpError>> {
        async move {
            let proxy_uri = key
                .proxy_uri
                .as_ref()
                .ok_or_else(|| HttpError::invalid_request("tunnel without proxy"))?;
            let host = key
                .host
                .as_deref()
                .ok_or_else(|| HttpError::invalid_request("tunnel without destination"))?;
            let authority = uri::authority_form(host, key.port);
            let target = Url::parse(&format!("http://{}/", authority))
                .map_err(|e| HttpError::invalid_request(format!("{}: {}", authority, e)))?;
            let mut request = Request::new(Method::Connect, target);
            request.header("Host", authority.as_str());
            if let Some(ua) = user_agent {
                request.header("User-Agent", ua);
            }
            let pool = self.get_pool(ConnectionKey::proxy_connect(proxy_uri));
            trace!(target = %authority, proxy = %proxy_uri, "establishing tunnel");
            let response = pool.send(&mut request, false, cancel).await?;
            if !response.is_success() {
                debug!(target = %authority, status = response.status, "proxy refused tunnel");
                return Ok(Err(response));
            }
            Ok(Ok(response.body.into_upgraded()?))
        }
        .boxed()
    }
}

async fn reap(weak: Weak<ManagerShared>, interval: std::time::Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let shared = match weak.upgrade() {
            Some(s) => s,
            None => return,
        };
        if !shared.sweep(true) {
            trace!("pool reaper stopped, no pools left");
            return;
        }
    }
}

/// Entry point below the authentication stage: finds the pool for each request and sends
/// through it, answering proxy challenges.
pub struct HttpConnectionPoolManager {
    shared: Arc<ManagerShared>,
}

impl HttpConnectionPoolManager {
    pub fn new(settings: Arc<HttpSettings>) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                settings,
                map: RwLock::new(PoolMap {
                    pools: HashMap::new(),
                    reaper_running: false,
                }),
            }),
        }
    }

    pub fn settings(&self) -> &Arc<HttpSettings> {
        &self.shared.settings
    }

    pub fn connection_key(&self, request: &Request) -> Result<ConnectionKey, HttpError> {
        ConnectionKey::for_request(request, &self.shared.settings)
    }

    /// The pool for `key`, created on first use.
    pub fn pool(&self, key: ConnectionKey) -> Arc<HttpConnectionPool> {
        self.shared.get_pool(key)
    }

    pub fn pool_for(&self, request: &Request) -> Result<Arc<HttpConnectionPool>, HttpError> {
        Ok(self.pool(self.connection_key(request)?))
    }

    pub fn pool_count(&self) -> usize {
        self.shared
            .map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pools
            .len()
    }

    /// Whether the idle reaper task is currently scheduled.
    pub fn reaper_running(&self) -> bool {
        self.shared
            .map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .reaper_running
    }

    /// Run one reaping sweep now.
    pub fn cleanup(&self) {
        self.shared.sweep(false);
    }
}

#[async_trait]
impl HttpHandler for HttpConnectionPoolManager {
    async fn send(&self, mut request: Request, cancel: &CancellationToken) -> Result<Response, HttpError> {
        let pool = self.pool_for(&request)?;
        pool.send(&mut request, false, cancel).await
    }
}

impl Drop for HttpConnectionPoolManager {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

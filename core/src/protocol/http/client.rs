/*
 * client.rs
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

//! HTTP client: builds the stage chain from settings and sends requests through it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::HttpSettings;
use crate::error::HttpError;
use crate::protocol::http::auth::AuthenticationHandler;
use crate::protocol::http::decompression::DecompressionHandler;
use crate::protocol::http::handler::HttpHandler;
use crate::protocol::http::pool::HttpConnectionPoolManager;
use crate::protocol::http::redirect::RedirectHandler;
use crate::protocol::http::request::{Method, Request};
use crate::protocol::http::response::Response;

/// HTTP client. Create once with [`HttpClient::new`] and share it; connections are pooled
/// per destination for the life of the client.
///
/// Stages are only present when their settings ask for them: authentication when
/// credentials are set, decompression when a coding is enabled, redirects when
/// `allow_auto_redirect` is on.
pub struct HttpClient {
    settings: Arc<HttpSettings>,
    manager: Arc<HttpConnectionPoolManager>,
    handler: Arc<dyn HttpHandler>,
}

impl HttpClient {
    pub fn new(settings: HttpSettings) -> Self {
        let settings = Arc::new(settings);
        let manager = Arc::new(HttpConnectionPoolManager::new(settings.clone()));
        let mut handler: Arc<dyn HttpHandler> = manager.clone();
        if settings.credentials.is_some() {
            handler = Arc::new(AuthenticationHandler::new(manager.clone()));
        }
        if !settings.automatic_decompression.is_empty() {
            handler = Arc::new(DecompressionHandler::new(handler, settings.automatic_decompression));
        }
        if settings.allow_auto_redirect {
            handler = Arc::new(RedirectHandler::new(handler, settings.max_automatic_redirections));
        }
        debug!(settings = ?settings, "http client created");
        Self {
            settings,
            manager,
            handler,
        }
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// The pool manager at the bottom of the chain, for inspecting or reaping pools.
    pub fn manager(&self) -> &Arc<HttpConnectionPoolManager> {
        &self.manager
    }

    /// Send `request`. The returned response's body streams from the connection; the
    /// connection goes back to its pool once the body is read to the end or dropped.
    pub async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response, HttpError> {
        self.handler.send(request, cancel).await
    }

    /// GET `url` without cancellation.
    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        let request = Request::parse(Method::Get, url)?;
        self.send(request, &CancellationToken::new()).await
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(HttpSettings::default())
    }
}

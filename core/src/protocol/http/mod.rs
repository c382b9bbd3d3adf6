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

//! HTTP/1.1 client transport.
//!
//! Design:
//! - A chain of [`HttpHandler`] stages: redirect → decompression → authentication → pool manager.
//! - Pools keyed by [`ConnectionKey`] (kind, host, port, TLS name, proxy). Idle connections are
//!   reused most-recent first; beyond `max_connections_per_server`, requests queue FIFO.
//! - Responses stream from the connection through [`Body`]; a body read to the end or dropped
//!   hands the connection back to its pool.
//! - Buffers: `bytes` crate (BytesMut for the read buffer, Bytes for body chunks).

mod cookies;
mod decompression;
mod handler;
mod headers;
mod redirect;
mod request;
mod response;

pub mod auth;
pub mod body;
pub mod client;
pub mod connection;
pub mod h1;
pub mod pool;

#[cfg(test)]
pub(crate) mod test_server;

pub use auth::{AuthScheme, AuthenticationHandler, Credential, CredentialCache, Credentials};
pub use body::Body;
pub use client::HttpClient;
pub use connection::{HttpConnection, HttpStream, Upgraded};
pub use cookies::{CookieStore, HostCookieStore};
pub use decompression::DecompressionHandler;
pub use handler::HttpHandler;
pub use headers::Headers;
pub use pool::{ConnectionKey, ConnectionKind, HttpConnectionPool, HttpConnectionPoolManager};
pub use redirect::RedirectHandler;
pub use request::{Method, Request, Version};
pub use response::Response;

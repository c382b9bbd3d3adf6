/*
 * lib.rs
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

//! Poolwire: a connection-pooled HTTP/1.1 client transport.
//!
//! Start with [`HttpClient`]: it owns the pool manager and the stage chain built from
//! [`HttpSettings`]. Everything below it (pools, connections, the wire codec) is public for
//! callers that want to assemble their own chain.

pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod uri;

pub use config::{DecompressionMethods, HttpSettings, ProxySettings};
pub use error::{HttpError, ProtocolError};
pub use protocol::http::{Body, HttpClient, Method, Request, Response};

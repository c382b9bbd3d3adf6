/*
 * handler.rs
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

//! Pipeline stage trait.
//!
//! The client is a chain of stages, outermost first:
//! redirect → decompression → authentication → pool manager.
//! Each stage owns the next one and may rewrite the request, resend it, or wrap the response.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HttpError;
use crate::protocol::http::request::Request;
use crate::protocol::http::response::Response;

/// One stage of the send pipeline.
///
/// Cancelling `cancel` aborts whatever the stage is waiting on (a pool slot, a connect,
/// socket I/O) and the call returns [`HttpError::Cancelled`].
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response, HttpError>;
}

/*
 * response.rs
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

use bytes::Bytes;
use url::Url;

use crate::error::HttpError;
use crate::protocol::http::body::Body;
use crate::protocol::http::headers::Headers;
use crate::protocol::http::request::Version;

/// A response: status, headers, and a body that may still be streaming from the connection.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub version: Version,
    pub headers: Headers,
    /// URL of the request that produced this response (after redirects, the last hop).
    pub url: Url,
    pub body: Body,
}

impl Response {
    /// Synthetic response with an in-memory body.
    pub fn new(status: u16, url: Url, body: impl Into<Body>) -> Self {
        Self {
            status,
            reason: String::new(),
            version: Version::Http11,
            headers: Headers::new(),
            url,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        self.body.bytes().await
    }

    /// Body as text. Invalid UTF-8 is replaced.
    pub async fn text(self) -> Result<String, HttpError> {
        let bytes = self.body.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_response() {
        let url = Url::parse("http://example.com/").unwrap();
        let r = Response::new(204, url.clone(), Body::empty());
        assert!(r.is_success());
        assert!(!r.is_redirect());
        assert_eq!(r.text().await.unwrap(), "");
        let r = Response::new(308, url, "moved");
        assert!(r.is_redirect());
        assert_eq!(r.bytes().await.unwrap(), Bytes::from_static(b"moved"));
    }
}

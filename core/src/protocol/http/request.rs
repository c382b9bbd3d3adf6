/*
 * request.rs
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

//! HTTP request: method, target URL, version, headers, optional body.
//!
//! The body is a fully buffered `Bytes` so a request can be cloned cheaply and re-sent by
//! the retry, authentication and redirect stages.

use bytes::Bytes;
use url::Url;

use crate::error::HttpError;
use crate::protocol::http::headers::Headers;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
    Connect,
    Other(&'static str),
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Other(s) => s,
        }
    }

    /// Methods whose requests carry a body by definition; without one we send `Content-Length: 0`.
    pub fn must_have_request_body(&self) -> bool {
        !matches!(
            self,
            Method::Get | Method::Head | Method::Connect | Method::Options | Method::Delete
        )
    }
}

/// Protocol version written on the request line and parsed from the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub version: Version,
    pub headers: Headers,
    /// If set, sent with `Content-Length` unless the headers ask for chunked transfer-coding.
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: Version::Http11,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Parse `url` and build a request. Only http, https, ws and wss URLs are accepted.
    pub fn parse(method: Method, url: &str) -> Result<Self, HttpError> {
        let url = Url::parse(url).map_err(|e| HttpError::invalid_request(format!("{}: {}", url, e)))?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => {
                return Err(HttpError::invalid_request(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(HttpError::invalid_request("URL has no host"));
        }
        Ok(Self::new(method, url))
    }

    pub fn get(url: &str) -> Result<Self, HttpError> {
        Self::parse(Method::Get, url)
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self, HttpError> {
        let mut req = Self::parse(Method::Post, url)?;
        req.body = Some(body.into());
        Ok(req)
    }

    /// Append a header value.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// Set request body.
    pub fn body(&mut self, data: impl Into<Bytes>) -> &mut Self {
        self.body = Some(data.into());
        self
    }

    pub fn is_chunked(&self) -> bool {
        self.headers.has_token("Transfer-Encoding", "chunked")
    }

    pub fn expects_continue(&self) -> bool {
        self.body.is_some() && self.headers.has_token("Expect", "100-continue")
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.url.scheme(), "https" | "wss")
    }

    /// Drop the body and the headers that describe it.
    pub(crate) fn clear_content(&mut self) {
        self.body = None;
        for name in crate::protocol::http::headers::CONTENT_HEADERS {
            self.headers.remove(name);
        }
    }
}

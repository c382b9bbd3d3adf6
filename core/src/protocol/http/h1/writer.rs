/*
 * writer.rs
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

//! HTTP/1.x request serialization into a `BytesMut`: request line, headers, chunk framing.

use bytes::{BufMut, BytesMut};

use crate::error::HttpError;
use crate::protocol::http::request::{Request, Version};
use crate::uri;

/// Terminal chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Largest chunk written for a chunked request body.
pub const WRITE_CHUNK_SIZE: usize = 16 * 1024;

fn check_header(name: &str, value: &str) -> Result<(), HttpError> {
    if name.is_empty() || name.bytes().any(|b| !b.is_ascii_graphic() || b == b':') {
        return Err(HttpError::invalid_request(format!("invalid header name '{}'", name)));
    }
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(HttpError::invalid_request(format!("invalid value for header '{}'", name)));
    }
    Ok(())
}

fn put_header(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(b"\r\n");
}

/// Serialize the request line and header section.
///
/// `target` is the already chosen request-target (origin, absolute or authority form).
/// `cookie` is an extra `Cookie` header value from the cookie store.
pub fn encode_request_head(
    request: &Request,
    target: &str,
    cookie: Option<&str>,
    out: &mut BytesMut,
) -> Result<(), HttpError> {
    let chunked = request.is_chunked();
    if chunked && request.version == Version::Http10 {
        return Err(HttpError::invalid_request(
            "chunked transfer-coding is not available with HTTP/1.0",
        ));
    }

    out.reserve(256);
    out.put_slice(request.method.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(target.as_bytes());
    out.put_u8(b' ');
    out.put_slice(request.version.as_str().as_bytes());
    out.put_slice(b"\r\n");

    if !request.headers.contains("Host") {
        put_header(out, "Host", &uri::host_header(&request.url));
    }

    for (name, value) in request.headers.grouped() {
        check_header(name, &value)?;
        put_header(out, name, &value);
    }

    if let Some(cookie) = cookie.filter(|c| !c.is_empty()) {
        check_header("Cookie", cookie)?;
        put_header(out, "Cookie", cookie);
    }

    match &request.body {
        Some(body) => {
            if !chunked && !request.headers.contains("Content-Length") {
                put_header(out, "Content-Length", &body.len().to_string());
            }
        }
        None => {
            if !chunked && request.method.must_have_request_body() && !request.headers.contains("Content-Length") {
                put_header(out, "Content-Length", "0");
            }
        }
    }

    out.put_slice(b"\r\n");
    Ok(())
}

/// Append one `hex-size CRLF data CRLF` chunk. Empty data writes nothing, since a
/// zero-size chunk would end the body.
pub fn encode_chunk(data: &[u8], out: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    out.reserve(data.len() + 20);
    out.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

/// Whole chunked body: chunks of at most `max_chunk` bytes, then the terminal chunk.
pub fn encode_chunked_body(body: &[u8], max_chunk: usize, out: &mut BytesMut) {
    for chunk in body.chunks(max_chunk.max(1)) {
        encode_chunk(chunk, out);
    }
    out.put_slice(LAST_CHUNK);
}

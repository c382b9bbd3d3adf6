/*
 * decompression.rs
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

//! Automatic gzip/deflate response decoding.

use std::io::{self, Write};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::DecompressionMethods;
use crate::error::HttpError;
use crate::protocol::http::handler::HttpHandler;
use crate::protocol::http::request::{Method, Request};
use crate::protocol::http::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentCoding {
    Gzip,
    Deflate,
}

enum DecoderState {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    RawDeflate(DeflateDecoder<Vec<u8>>),
    /// `deflate` is zlib-wrapped per RFC 9110, but raw deflate is common: wait for the
    /// first two bytes to tell them apart.
    Sniffing(Vec<u8>),
}

/// Incremental decoder for one response body.
pub(crate) struct ContentDecoder {
    state: DecoderState,
    fed: bool,
}

fn is_zlib_header(b: &[u8]) -> bool {
    b.len() >= 2 && b[0] & 0x0f == 8 && (u16::from(b[0]) << 8 | u16::from(b[1])) % 31 == 0
}

impl ContentDecoder {
    pub(crate) fn new(coding: ContentCoding) -> Self {
        let state = match coding {
            ContentCoding::Gzip => DecoderState::Gzip(GzDecoder::new(Vec::new())),
            ContentCoding::Deflate => DecoderState::Sniffing(Vec::new()),
        };
        Self { state, fed: false }
    }

    fn settle(&mut self, pending: Vec<u8>) -> io::Result<()> {
        self.state = if is_zlib_header(&pending) {
            DecoderState::Zlib(ZlibDecoder::new(Vec::new()))
        } else {
            DecoderState::RawDeflate(DeflateDecoder::new(Vec::new()))
        };
        self.write(&pending)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.state {
            DecoderState::Gzip(d) => d.write_all(data),
            DecoderState::Zlib(d) => d.write_all(data),
            DecoderState::RawDeflate(d) => d.write_all(data),
            DecoderState::Sniffing(pending) => {
                pending.extend_from_slice(data);
                if pending.len() < 2 {
                    return Ok(());
                }
                let pending = std::mem::take(pending);
                self.settle(pending)
            }
        }
    }

    fn take_output(&mut self) -> Bytes {
        let out = match &mut self.state {
            DecoderState::Gzip(d) => std::mem::take(d.get_mut()),
            DecoderState::Zlib(d) => std::mem::take(d.get_mut()),
            DecoderState::RawDeflate(d) => std::mem::take(d.get_mut()),
            DecoderState::Sniffing(_) => Vec::new(),
        };
        Bytes::from(out)
    }

    /// Feed compressed bytes, return whatever decoded output is available.
    pub(crate) fn decode(&mut self, data: &[u8]) -> io::Result<Bytes> {
        self.fed |= !data.is_empty();
        self.write(data)?;
        Ok(self.take_output())
    }

    /// End of input: flush the decoder and return the remaining output.
    /// An empty body decodes to nothing for every coding.
    pub(crate) fn finish(&mut self) -> io::Result<Bytes> {
        if !self.fed {
            return Ok(Bytes::new());
        }
        if let DecoderState::Sniffing(pending) = &mut self.state {
            let pending = std::mem::take(pending);
            self.settle(pending)?;
        }
        match &mut self.state {
            DecoderState::Gzip(d) => d.try_finish()?,
            DecoderState::Zlib(d) => d.try_finish()?,
            DecoderState::RawDeflate(d) => d.try_finish()?,
            DecoderState::Sniffing(_) => {}
        }
        Ok(self.take_output())
    }
}

/// Stage that advertises and undoes gzip/deflate content coding.
pub struct DecompressionHandler {
    inner: Arc<dyn HttpHandler>,
    methods: DecompressionMethods,
}

impl DecompressionHandler {
    pub fn new(inner: Arc<dyn HttpHandler>, methods: DecompressionMethods) -> Self {
        Self { inner, methods }
    }

    fn coding_for(&self, token: &str) -> Option<ContentCoding> {
        if self.methods.gzip && token.eq_ignore_ascii_case("gzip") {
            Some(ContentCoding::Gzip)
        } else if self.methods.deflate && token.eq_ignore_ascii_case("deflate") {
            Some(ContentCoding::Deflate)
        } else {
            None
        }
    }
}

fn encoding_tokens<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[async_trait]
impl HttpHandler for DecompressionHandler {
    async fn send(&self, mut request: Request, cancel: &CancellationToken) -> Result<Response, HttpError> {
        if self.methods.gzip && !request.headers.has_token("Accept-Encoding", "gzip") {
            request.header("Accept-Encoding", "gzip");
        }
        if self.methods.deflate && !request.headers.has_token("Accept-Encoding", "deflate") {
            request.header("Accept-Encoding", "deflate");
        }

        let method = request.method;
        let mut response = self.inner.send(request, cancel).await?;
        // Content-Encoding on HEAD, 204 and 304 describes a body that is not sent.
        if method == Method::Head || matches!(response.status, 204 | 304) {
            return Ok(response);
        }

        let mut codings = encoding_tokens(response.headers.get_all("Content-Encoding"));
        let coding = match codings.last().and_then(|t| self.coding_for(t)) {
            Some(c) => c,
            None => return Ok(response),
        };
        trace!(?coding, "decoding response body");
        codings.pop();
        response.headers.remove("Content-Encoding");
        if !codings.is_empty() {
            response.headers.insert("Content-Encoding", codings.join(", "));
        }
        response.headers.remove("Content-Length");
        response.body.set_decoder(ContentDecoder::new(coding));
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use url::Url;

    const TEXT: &[u8] = b"the quick brown fox jumps over the lazy dog, again and again and again";

    fn decode_in_pieces(coding: ContentCoding, data: &[u8]) -> Vec<u8> {
        let mut d = ContentDecoder::new(coding);
        let mut out = Vec::new();
        for piece in data.chunks(1) {
            out.extend_from_slice(&d.decode(piece).unwrap());
        }
        out.extend_from_slice(&d.finish().unwrap());
        out
    }

    #[test]
    fn gzip_byte_at_a_time() {
        let mut e = GzEncoder::new(Vec::new(), Compression::default());
        e.write_all(TEXT).unwrap();
        assert_eq!(decode_in_pieces(ContentCoding::Gzip, &e.finish().unwrap()), TEXT);
    }

    #[test]
    fn deflate_accepts_zlib_and_raw() {
        let mut z = ZlibEncoder::new(Vec::new(), Compression::default());
        z.write_all(TEXT).unwrap();
        assert_eq!(decode_in_pieces(ContentCoding::Deflate, &z.finish().unwrap()), TEXT);
        let mut r = DeflateEncoder::new(Vec::new(), Compression::default());
        r.write_all(TEXT).unwrap();
        assert_eq!(decode_in_pieces(ContentCoding::Deflate, &r.finish().unwrap()), TEXT);
        assert!(ContentDecoder::new(ContentCoding::Deflate).finish().unwrap().is_empty());
    }

    #[test]
    fn empty_gzip_body_finishes_cleanly() {
        let mut d = ContentDecoder::new(ContentCoding::Gzip);
        assert!(d.decode(b"").unwrap().is_empty());
        assert!(d.finish().unwrap().is_empty());
    }

    struct Gzipped;

    #[async_trait]
    impl HttpHandler for Gzipped {
        async fn send(&self, request: Request, _: &CancellationToken) -> Result<Response, HttpError> {
            assert!(request.headers.has_token("Accept-Encoding", "gzip"));
            assert!(!request.headers.has_token("Accept-Encoding", "deflate"));
            let mut e = GzEncoder::new(Vec::new(), Compression::default());
            e.write_all(TEXT).unwrap();
            let data = e.finish().unwrap();
            let mut r = Response::new(200, request.url.clone(), data.clone());
            r.headers.append("Content-Encoding", "gzip");
            r.headers.append("Content-Length", data.len().to_string());
            Ok(r)
        }
    }

    #[tokio::test]
    async fn handler_decodes_and_strips_headers() {
        let methods = DecompressionMethods {
            gzip: true,
            deflate: false,
        };
        let handler = DecompressionHandler::new(Arc::new(Gzipped), methods);
        let request = Request::new(Method::Get, Url::parse("http://h/").unwrap());
        let response = handler.send(request, &CancellationToken::new()).await.unwrap();
        assert!(!response.headers.contains("Content-Encoding"));
        assert!(!response.headers.contains("Content-Length"));
        assert_eq!(&response.bytes().await.unwrap()[..], TEXT);
    }
}

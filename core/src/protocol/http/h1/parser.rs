/*
 * parser.rs
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

//! HTTP/1.x response push parsers: response head (status line + headers) and chunked body.
//!
//! Both parsers are fed from the connection's read buffer. They consume only complete
//! tokens; partial data stays in the buffer and the caller reads more and calls again.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::http::headers::Headers;
use crate::protocol::http::request::Version;

/// "HTTP/1.1 200" is the shortest valid status line.
const MIN_STATUS_LINE_LENGTH: usize = 12;

/// Parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Version,
    pub code: u16,
    pub reason: String,
}

/// Status line and headers of one response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
}

/// Find CRLF in buf starting at `from`; return the index of the CR.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        // Header text outside UTF-8 is treated as ISO-8859-1.
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Parse a status line (without CRLF) by fixed offsets: `HTTP/1.x SP ddd [SP reason]`.
pub fn parse_status_line(line: &[u8]) -> Result<StatusLine, ProtocolError> {
    if line.len() < MIN_STATUS_LINE_LENGTH || &line[..7] != b"HTTP/1." {
        return Err(ProtocolError::InvalidStatusLine);
    }
    let version = match line[7] {
        b'0' => Version::Http10,
        b'1'..=b'9' => Version::Http11,
        _ => return Err(ProtocolError::InvalidStatusLine),
    };
    if line[8] != b' ' {
        return Err(ProtocolError::InvalidStatusLine);
    }
    let mut code: u16 = 0;
    for &b in &line[9..12] {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidStatusLine);
        }
        code = code * 10 + (b - b'0') as u16;
    }
    if code < 100 {
        return Err(ProtocolError::InvalidStatusLine);
    }
    let reason = if line.len() == MIN_STATUS_LINE_LENGTH {
        String::new()
    } else if line[12] == b' ' {
        decode_text(&line[13..]).trim().to_string()
    } else {
        return Err(ProtocolError::InvalidStatusLine);
    };
    Ok(StatusLine { version, code, reason })
}

/// Parse one logical header line (without its final CRLF). Folded continuation lines are
/// still embedded as `CRLF WSP…` and are spliced into a single space.
pub fn parse_header_line(line: &[u8]) -> Result<(String, String), ProtocolError> {
    let invalid = || ProtocolError::InvalidHeaderLine(decode_text(line));
    let pos = line
        .iter()
        .position(|&b| b == b':' || b == b' ' || b == b'\t')
        .ok_or_else(invalid)?;
    // Whitespace between the name and the colon is not allowed.
    if pos == 0 || line[pos] != b':' {
        return Err(invalid());
    }
    let name = &line[..pos];
    if name.iter().any(|b| !b.is_ascii_graphic()) {
        return Err(invalid());
    }

    let mut value: Vec<u8> = Vec::with_capacity(line.len() - pos);
    for segment in split_folds(&line[pos + 1..]) {
        let segment = trim_wsp(segment);
        if segment.is_empty() {
            continue;
        }
        if !value.is_empty() {
            value.push(b' ');
        }
        value.extend_from_slice(segment);
    }
    if value.iter().any(|&b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(invalid());
    }
    Ok((decode_text(name), decode_text(&value)))
}

fn split_folds(value: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(crlf) = find_crlf(value, start) {
        out.push(&value[start..crlf]);
        start = crlf + 2;
    }
    out.push(&value[start..]);
    out
}

fn trim_wsp(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
    StatusLine,
    Headers,
    Complete,
}

/// Push parser for a response head. Enforces the cumulative header byte limit.
pub struct ResponseHeadParser {
    state: HeadState,
    limit: usize,
    consumed: usize,
    status: Option<StatusLine>,
    headers: Headers,
}

impl ResponseHeadParser {
    pub fn new(limit: usize) -> Self {
        Self {
            state: HeadState::StatusLine,
            limit,
            consumed: 0,
            status: None,
            headers: Headers::new(),
        }
    }

    pub fn state(&self) -> HeadState {
        self.state
    }

    /// Restart for the next head on the same connection, e.g. after a 1xx response.
    /// The byte limit stays cumulative across informational responses.
    pub fn reset(&mut self) {
        self.state = HeadState::StatusLine;
        self.status = None;
        self.headers = Headers::new();
    }

    fn check_limit(&self, pending: usize) -> Result<(), ProtocolError> {
        if self.consumed + pending > self.limit {
            Err(ProtocolError::HeadersTooLarge(self.limit))
        } else {
            Ok(())
        }
    }

    /// Consume as much of `buf` as possible. Returns the head once the empty line is seen.
    pub fn receive(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseHead>, ProtocolError> {
        loop {
            match self.state {
                HeadState::StatusLine => {
                    let line_end = match find_crlf(buf, 0) {
                        Some(n) => n,
                        None => {
                            self.check_limit(buf.len())?;
                            return Ok(None);
                        }
                    };
                    self.check_limit(line_end + 2)?;
                    let line = buf.split_to(line_end + 2);
                    self.consumed += line.len();
                    self.status = Some(parse_status_line(&line[..line_end])?);
                    self.state = HeadState::Headers;
                }
                HeadState::Headers => {
                    let line_end = match self.find_logical_line_end(buf)? {
                        Some(n) => n,
                        None => return Ok(None),
                    };
                    self.check_limit(line_end + 2)?;
                    let line = buf.split_to(line_end + 2);
                    self.consumed += line.len();
                    if line_end == 0 {
                        self.state = HeadState::Complete;
                        let status = self.status.take().ok_or(ProtocolError::InvalidStatusLine)?;
                        return Ok(Some(ResponseHead {
                            version: status.version,
                            code: status.code,
                            reason: status.reason,
                            headers: std::mem::take(&mut self.headers),
                        }));
                    }
                    let (name, value) = parse_header_line(&line[..line_end])?;
                    self.headers.append(name, value);
                }
                HeadState::Complete => return Ok(None),
            }
        }
    }

    /// End of a header line, looking past folded continuation lines. `None` means more
    /// bytes are needed, including when the byte after a CRLF is not yet known.
    fn find_logical_line_end(&self, buf: &BytesMut) -> Result<Option<usize>, ProtocolError> {
        let mut from = 0;
        loop {
            let crlf = match find_crlf(buf, from) {
                Some(n) => n,
                None => {
                    self.check_limit(buf.len())?;
                    return Ok(None);
                }
            };
            if crlf == 0 {
                return Ok(Some(0));
            }
            match buf.get(crlf + 2) {
                None => {
                    self.check_limit(buf.len())?;
                    return Ok(None);
                }
                Some(b' ') | Some(b'\t') => from = crlf + 2,
                Some(_) => return Ok(Some(crlf)),
            }
        }
    }
}

/// States of the chunked transfer-coding decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    ExpectChunkHeader,
    ExpectChunkData(u64),
    ExpectChunkTerminator,
    ConsumeTrailers,
    Done,
}

/// One step of chunked decoding.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkEvent {
    Data(Bytes),
    NeedMore,
    Done,
}

/// Push decoder for `Transfer-Encoding: chunked` bodies.
pub struct ChunkedDecoder {
    state: ChunkState,
    line_limit: usize,
    trailer_bytes: usize,
    trailers: Headers,
}

impl ChunkedDecoder {
    /// `line_limit` bounds a chunk-size line and the whole trailer section.
    pub fn new(line_limit: usize) -> Self {
        Self {
            state: ChunkState::ExpectChunkHeader,
            line_limit,
            trailer_bytes: 0,
            trailers: Headers::new(),
        }
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<ChunkEvent, ProtocolError> {
        loop {
            match self.state {
                ChunkState::ExpectChunkHeader => {
                    let line_end = match find_crlf(buf, 0) {
                        Some(n) => n,
                        None => {
                            if buf.len() > self.line_limit {
                                return Err(ProtocolError::InvalidChunk("chunk size line too long"));
                            }
                            return Ok(ChunkEvent::NeedMore);
                        }
                    };
                    let line = buf.split_to(line_end + 2);
                    let size = parse_chunk_size(&line[..line_end])?;
                    self.state = if size == 0 {
                        ChunkState::ConsumeTrailers
                    } else {
                        ChunkState::ExpectChunkData(size)
                    };
                }
                ChunkState::ExpectChunkData(remaining) => {
                    if buf.is_empty() {
                        return Ok(ChunkEvent::NeedMore);
                    }
                    let take = (remaining.min(buf.len() as u64)) as usize;
                    let data = buf.split_to(take).freeze();
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        ChunkState::ExpectChunkTerminator
                    } else {
                        ChunkState::ExpectChunkData(left)
                    };
                    return Ok(ChunkEvent::Data(data));
                }
                ChunkState::ExpectChunkTerminator => {
                    if buf.len() < 2 {
                        return Ok(ChunkEvent::NeedMore);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ProtocolError::InvalidChunk("missing CRLF after chunk data"));
                    }
                    buf.advance(2);
                    self.state = ChunkState::ExpectChunkHeader;
                }
                ChunkState::ConsumeTrailers => {
                    let line_end = match find_crlf(buf, 0) {
                        Some(n) => n,
                        None => {
                            if self.trailer_bytes + buf.len() > self.line_limit {
                                return Err(ProtocolError::InvalidChunk("trailer section too long"));
                            }
                            return Ok(ChunkEvent::NeedMore);
                        }
                    };
                    let line = buf.split_to(line_end + 2);
                    self.trailer_bytes += line.len();
                    if self.trailer_bytes > self.line_limit {
                        return Err(ProtocolError::InvalidChunk("trailer section too long"));
                    }
                    if line_end == 0 {
                        self.state = ChunkState::Done;
                        return Ok(ChunkEvent::Done);
                    }
                    let (name, value) = parse_header_line(&line[..line_end])
                        .map_err(|_| ProtocolError::InvalidChunk("malformed trailer"))?;
                    self.trailers.append(name, value);
                }
                ChunkState::Done => return Ok(ChunkEvent::Done),
            }
        }
    }
}

/// `1*HEXDIG *WSP [";" chunk-ext]`.
fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let digits = line.iter().take_while(|b| b.is_ascii_hexdigit()).count();
    if digits == 0 {
        return Err(ProtocolError::InvalidChunk("missing chunk size"));
    }
    if digits > 16 {
        return Err(ProtocolError::InvalidChunk("chunk size overflow"));
    }
    let mut size: u64 = 0;
    for &b in &line[..digits] {
        let v = (b as char).to_digit(16).unwrap_or(0) as u64;
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(v))
            .ok_or(ProtocolError::InvalidChunk("chunk size overflow"))?;
    }
    let rest = trim_wsp(&line[digits..]);
    if !rest.is_empty() && rest[0] != b';' {
        return Err(ProtocolError::InvalidChunk("invalid characters after chunk size"));
    }
    if rest.iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(ProtocolError::InvalidChunk("invalid chunk extension"));
    }
    Ok(size)
}

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

//! HTTP/1.x wire codec.

pub mod parser;
pub mod writer;

pub use parser::{
    ChunkEvent, ChunkState, ChunkedDecoder, HeadState, ResponseHead, ResponseHeadParser, StatusLine,
};
pub use writer::{encode_chunk, encode_chunked_body, encode_request_head, LAST_CHUNK, WRITE_CHUNK_SIZE};

/*
 * basic.rs
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

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::credentials::Credential;

/// `base64([domain\]username:password)` for a `Basic` authorization header.
pub(crate) fn basic_token(credential: &Credential) -> String {
    let plain = if credential.domain.is_empty() {
        format!("{}:{}", credential.username, credential.password)
    } else {
        format!("{}\\{}:{}", credential.domain, credential.username, credential.password)
    };
    STANDARD.encode(plain.as_bytes())
}

//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Imapsift.
//
// Imapsift is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Imapsift is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Imapsift. If not, see <http://www.gnu.org/licenses/>.

//! Transcoding of search literals declared with `CHARSET`.

use std::borrow::Cow;
use std::str;

use encoding_rs::{Encoding, UTF_8};
use log::warn;

use super::log_prefix::LogPrefix;

/// The charset assumed for literals when the command declares none.
pub const DEFAULT_CHARSET: &Encoding = UTF_8;

/// Looks the charset label up the way MIME labels are resolved.
///
/// The "replacement" pseudo-encoding is not accepted, since it would turn
/// every literal into a single U+FFFD.
pub fn lookup(label: &[u8]) -> Option<&'static Encoding> {
    Encoding::for_label_no_replacement(label)
}

/// Decodes a raw literal from `encoding` into a needle of at most `max_len`
/// bytes.
///
/// Malformed input is not an error: it is logged and decoded lossily so that
/// the search still runs, just possibly without matches.
pub fn decode_needle(
    log_prefix: &LogPrefix,
    encoding: &'static Encoding,
    raw: &[u8],
    max_len: usize,
) -> String {
    let decoded = encoding
        .decode_without_bom_handling_and_without_replacement(raw)
        .unwrap_or_else(|| {
            warn!(
                "{} Search literal is not valid {}; using it as-is",
                log_prefix,
                encoding.name(),
            );
            String::from_utf8_lossy(raw)
        });

    truncate(decoded, max_len).into_owned()
}

/// Truncates `s` to at most `max_len` bytes without splitting a character.
pub fn truncate(s: Cow<'_, str>, max_len: usize) -> Cow<'_, str> {
    if s.len() <= max_len {
        return s;
    }

    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }

    match s {
        Cow::Borrowed(b) => Cow::Borrowed(&b[..end]),
        Cow::Owned(mut o) => {
            o.truncate(end);
            Cow::Owned(o)
        }
    }
}

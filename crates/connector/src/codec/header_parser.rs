//! Header-field parsing.
//!
//! [`parse_header`] handles exactly one field per call, or the empty line that
//! terminates the header block. Like the request-line parser it is sans-IO and
//! returns `Ok(None)` when more bytes are needed.
//!
//! Normalization applied to every field:
//!
//! - the name is lowercased
//! - leading whitespace of the value is dropped
//! - interior runs of SP/HT collapse to a single SP
//! - a following line that starts with SP or HT continues the value (folding)
//! - trailing whitespace is dropped
//!
//! Because of folding, a field is only complete once the first byte of the
//! next line has been seen.

use bytes::Bytes;
use tracing::trace;

use crate::protocol::ParseError;
use crate::utils::ensure;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderLine {
    Field { name: Bytes, value: Bytes },
    /// The empty line closing the header block.
    End,
}

#[inline]
fn is_separator(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

pub fn parse_header(buf: &[u8]) -> Result<Option<(HeaderLine, usize)>, ParseError> {
    let len = buf.len();
    match buf.first() {
        None => return Ok(None),
        Some(&LF) => return Ok(Some((HeaderLine::End, 1))),
        Some(&CR) => {
            return match buf.get(1) {
                None => Ok(None),
                Some(&LF) => Ok(Some((HeaderLine::End, 2))),
                Some(_) => Err(ParseError::invalid_header("CR not followed by LF")),
            };
        }
        Some(_) => {}
    }

    // field name, lowercased while copying
    let mut i = 0;
    while i < len && buf[i] != b':' {
        ensure!(buf[i] != CR && buf[i] != LF, ParseError::invalid_header("header line without colon"));
        i += 1;
    }
    if i == len {
        return Ok(None);
    }
    ensure!(i > 0, ParseError::invalid_header("empty header name"));
    let name = buf[..i].to_ascii_lowercase();
    i += 1;

    let mut value = Vec::new();
    let mut pending_space = false;
    loop {
        while i < len && buf[i] != CR && buf[i] != LF {
            let b = buf[i];
            if is_separator(b) {
                pending_space = true;
            } else {
                if pending_space && !value.is_empty() {
                    value.push(b' ');
                }
                pending_space = false;
                value.push(b);
            }
            i += 1;
        }
        if i == len {
            return Ok(None);
        }

        if buf[i] == CR {
            if i + 1 == len {
                return Ok(None);
            }
            ensure!(buf[i + 1] == LF, ParseError::invalid_header("CR not followed by LF"));
            i += 2;
        } else {
            i += 1;
        }

        // a continuation line can only be told apart by its first byte
        match buf.get(i) {
            None => return Ok(None),
            Some(&b) if is_separator(b) => {
                trace!(name = %String::from_utf8_lossy(&name), "folded header line");
                pending_space = true;
            }
            Some(_) => break,
        }
    }

    Ok(Some((HeaderLine::Field { name: Bytes::from(name), value: Bytes::from(value) }, i)))
}

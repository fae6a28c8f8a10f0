//! Request-line parsing.
//!
//! The parser is sans-IO: it looks at the bytes currently buffered and either
//! returns a complete [`RequestLine`] together with the number of bytes it
//! spans, or `Ok(None)` when the line is not complete yet. The caller refills
//! and retries from the same position.
//!
//! The grammar is lenient in the usual places: leading empty lines are
//! skipped, tokens may be separated by runs of SP or HT, a bare LF ends the
//! line as well as CRLF, and a line that stops right after the target is an
//! HTTP/0.9 request with an empty protocol.

use crate::protocol::ParseError;
use crate::utils::ensure;
use tracing::trace;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// A request line borrowed from the input window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a [u8],
    /// The full request target, query included.
    pub target: &'a [u8],
    pub path: &'a [u8],
    pub query: Option<&'a [u8]>,
    /// Empty for HTTP/0.9.
    pub protocol: &'a [u8],
}

impl RequestLine<'_> {
    pub fn is_http09(&self) -> bool {
        self.protocol.is_empty()
    }
}

#[inline]
fn is_separator(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

#[inline]
fn is_line_end(b: u8) -> bool {
    b == CR || b == LF
}

/// Parses one request line from the start of `buf`.
///
/// Returns the line and the number of bytes consumed, line terminator and
/// skipped leading blank lines included.
pub fn parse_request_line(buf: &[u8]) -> Result<Option<(RequestLine<'_>, usize)>, ParseError> {
    let len = buf.len();
    let mut i = 0;

    while i < len && is_line_end(buf[i]) {
        i += 1;
    }
    if i == len {
        return Ok(None);
    }

    // method
    let method_start = i;
    while i < len && !is_separator(buf[i]) {
        ensure!(!is_line_end(buf[i]), ParseError::invalid_request_line("missing request target"));
        i += 1;
    }
    if i == len {
        return Ok(None);
    }
    let method = &buf[method_start..i];

    while i < len && is_separator(buf[i]) {
        i += 1;
    }
    if i == len {
        return Ok(None);
    }

    // request target
    let target_start = i;
    let mut question = None;
    while i < len && !is_separator(buf[i]) && !is_line_end(buf[i]) {
        if buf[i] == b'?' && question.is_none() {
            question = Some(i);
        }
        i += 1;
    }
    if i == len {
        return Ok(None);
    }
    let target = &buf[target_start..i];
    ensure!(!target.is_empty(), ParseError::invalid_request_line("missing request target"));

    let (path, query) = match question {
        Some(q) => (&buf[target_start..q], Some(&buf[q + 1..i])),
        None => (target, None),
    };

    while i < len && is_separator(buf[i]) {
        i += 1;
    }
    if i == len {
        return Ok(None);
    }

    // protocol, empty for HTTP/0.9
    let protocol_start = i;
    while i < len && !is_line_end(buf[i]) {
        i += 1;
    }
    if i == len {
        return Ok(None);
    }
    let mut protocol_end = i;
    while protocol_end > protocol_start && is_separator(buf[protocol_end - 1]) {
        protocol_end -= 1;
    }
    let protocol = &buf[protocol_start..protocol_end];

    let consumed = if buf[i] == CR {
        if i + 1 == len {
            return Ok(None);
        }
        ensure!(buf[i + 1] == LF, ParseError::invalid_request_line("CR not followed by LF"));
        i + 2
    } else {
        i + 1
    };

    trace!(consumed, http09 = protocol.is_empty(), "parsed request line");
    Ok(Some((RequestLine { method, target, path, query, protocol }, consumed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_simple_line() {
        let buf = b"GET /a?x=1 HTTP/1.1\r\nHost: h\r\n\r\n";
        let (line, consumed) = parse_request_line(buf).unwrap().unwrap();

        assert_eq!(line.method, b"GET");
        assert_eq!(line.target, b"/a?x=1");
        assert_eq!(line.path, b"/a");
        assert_eq!(line.query, Some(&b"x=1"[..]));
        assert_eq!(line.protocol, b"HTTP/1.1");
        assert_eq!(&buf[consumed..], b"Host: h\r\n\r\n");
    }

    #[test]
    fn test_separator_tolerance() {
        let single = parse_request_line(b"POST /upload?id=7 HTTP/1.0\r\n").unwrap().unwrap().0;

        for line in [
            &b"POST  /upload?id=7  HTTP/1.0\r\n"[..],
            b"POST\t/upload?id=7\tHTTP/1.0\r\n",
            b"POST \t \t/upload?id=7 \t  HTTP/1.0\r\n",
            b"\r\n\r\nPOST /upload?id=7 HTTP/1.0\r\n",
            b"POST /upload?id=7 HTTP/1.0\n",
        ] {
            let parsed = parse_request_line(line).unwrap().unwrap().0;
            assert_eq!(parsed, single, "line: {:?}", String::from_utf8_lossy(line));
        }
    }

    #[test]
    fn test_http09() {
        let (line, consumed) = parse_request_line(b"GET /index.html\r\n").unwrap().unwrap();
        assert!(line.is_http09());
        assert_eq!(line.path, b"/index.html");
        assert_eq!(consumed, 17);
    }

    #[test]
    fn test_incomplete() {
        let full = indoc! {"
            GET /path?q HTTP/1.1\r
        "}
        .as_bytes();
        for end in 0..full.len() {
            assert!(parse_request_line(&full[..end]).unwrap().is_none(), "prefix {end}");
        }
        assert!(parse_request_line(full).unwrap().is_some());
    }

    #[test]
    fn test_only_first_question_mark_splits() {
        let (line, _) = parse_request_line(b"GET /a?b?c HTTP/1.1\r\n").unwrap().unwrap();
        assert_eq!(line.path, b"/a");
        assert_eq!(line.query, Some(&b"b?c"[..]));
    }

    #[test]
    fn test_invalid_lines() {
        assert!(parse_request_line(b"GET\r\n").is_err());
        assert!(parse_request_line(b"GET /a HTTP/1.1\rX").is_err());
    }
}

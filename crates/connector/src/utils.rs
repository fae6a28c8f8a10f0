//! Utility macros and functions for the connector crate.
//!
//! This module provides helper macros and functions that are used internally
//! by the parsers, buffers and the connection processor.

use std::future::Future;
use std::io;
use std::time::Duration;

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(!method.is_empty(), ParseError::invalid_request_line("empty method"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Runs an I/O future under an optional deadline.
///
/// Expiry is reported as [`io::ErrorKind::TimedOut`], so callers treat it
/// like any other transport failure.
pub(crate) async fn with_timeout<T, F>(duration: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match duration {
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "socket operation timed out")),
        },
        None => fut.await,
    }
}

/// Decodes `%XX` escapes in a request path.
///
/// Malformed escapes are kept verbatim and `+` is not treated as a space,
/// since this is a path and not a form body.
pub(crate) fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) = (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode(b"/a%20b"), b"/a b");
        assert_eq!(percent_decode(b"/a%2"), b"/a%2");
        assert_eq!(percent_decode(b"/%zz/%41"), b"/%zz/A");
        assert_eq!(percent_decode(b"/a+b"), b"/a+b");
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: io::Result<()> =
            with_timeout(Some(Duration::from_millis(5)), std::future::pending::<io::Result<()>>()).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }
}

//! HTTP response value and its wire serialization.

use crate::http::types::{Headers, StatusCode, Version};
use std::io::Write;

/// HTTP response populated by handlers and middleware.
///
/// Unlike a one-shot writer, the response stays structured until the
/// connection serializes it, so `after` middleware hooks can still add or
/// replace headers once the handler is done.
///
/// # Serialization
///
/// ```text
/// [VERSION] SP [CODE] SP [REASON] CRLF
/// Connection: close | Keep-Alive CRLF
/// [NAME]: [VALUE] CRLF        (user headers, insertion order)
/// Content-Length: [LEN] CRLF  (always computed from the body)
/// CRLF
/// [BODY]
/// ```
///
/// `Connection` and `Content-Length` headers set by hand are ignored:
/// the first follows [`close()`](Response::close), the second is always
/// the exact body length. Statuses that cannot carry a body
/// (`204`, `304`) are written without `Content-Length`.
///
/// # Examples
/// ```
/// use wirehttp::{Response, StatusCode, Version};
///
/// let mut resp = Response::new(Version::Http11);
/// resp.status(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .body("Hello World!");
///
/// assert!(resp.to_bytes().ends_with(b"\r\n\r\nHello World!"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    version: Version,
    status: StatusCode,
    close: bool,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    /// Creates a `200 OK` keep-alive response with no headers and an empty body.
    #[inline]
    pub fn new(version: Version) -> Self {
        Self {
            version,
            status: StatusCode::Ok,
            close: false,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Discards everything a handler wrote and starts over with `status`.
    ///
    /// The close flag is kept: a request that asked for `Connection: close`
    /// still gets it on an error response.
    pub(crate) fn reset(&mut self, status: StatusCode) {
        self.status = status;
        self.headers.clear();
        self.body.clear();
    }
}

// Builder-style setters
impl Response {
    /// Sets the status code.
    ///
    /// # Examples
    /// ```
    /// use wirehttp::{Response, StatusCode, Version};
    ///
    /// let mut resp = Response::new(Version::Http11);
    /// resp.status(StatusCode::NotFound)
    ///     .body(r#"{"status": "not found", "code": 404}"#);
    /// assert_eq!(resp.status_code(), StatusCode::NotFound);
    /// ```
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Forces the connection to close after this response.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.close = true;
        self
    }

    /// Sets or clears the close flag explicitly.
    #[inline]
    pub fn set_close(&mut self, close: bool) -> &mut Self {
        self.close = close;
        self
    }

    /// Adds a header, replacing any previous value with the same name.
    ///
    /// CR and LF are stripped from both name and value, so echoed user
    /// input cannot start a new header line.
    #[inline]
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(strip_line_breaks(name.into()), strip_line_breaks(value.into()));
        self
    }

    /// Shorthand for `header("Content-Type", value)`.
    #[inline]
    pub fn content_type(&mut self, value: impl Into<String>) -> &mut Self {
        self.header("Content-Type", value)
    }

    /// Replaces the body.
    #[inline]
    pub fn body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = body.into();
        self
    }

    /// Appends formatted output to the body.
    ///
    /// ```
    /// use wirehttp::{Response, Version};
    /// use std::io::Write;
    ///
    /// let mut resp = Response::new(Version::Http11);
    /// resp.body_with(|w| {
    ///     let _ = write!(w, r#"{{"sum": {}}}"#, 2 + 2);
    /// });
    /// assert_eq!(resp.body_bytes(), br#"{"sum": 4}"#);
    /// ```
    #[inline]
    pub fn body_with<F: FnOnce(&mut Vec<u8>)>(&mut self, f: F) -> &mut Self {
        f(&mut self.body);
        self
    }

    /// Removes a header and returns its value.
    #[inline]
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }
}

// Accessors
impl Response {
    #[inline]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub const fn status_code(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub const fn is_close(&self) -> bool {
        self.close
    }

    #[inline]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }
}

// Serialization
impl Response {
    #[inline]
    const fn allows_body(&self) -> bool {
        !matches!(self.status, StatusCode::NoContent | StatusCode::NotModified)
    }

    /// Appends the wire form of this response to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        // Writing into a Vec never fails.
        let _ = write!(
            buf,
            "{} {} {}\r\n",
            self.version.as_str(),
            self.status.as_u16(),
            self.status.reason()
        );

        buf.extend_from_slice(match self.close {
            true => b"Connection: close\r\n",
            false => b"Connection: Keep-Alive\r\n",
        });

        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }

            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        if self.allows_body() {
            let _ = write!(buf, "Content-Length: {}\r\n\r\n", self.body.len());
            buf.extend_from_slice(&self.body);
        } else {
            buf.extend_from_slice(b"\r\n");
        }
    }

    /// Serializes the response into a fresh buffer.
    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.body.len());
        self.write_to(&mut buf);
        buf
    }
}

fn strip_line_breaks(mut text: String) -> String {
    if text.contains(['\r', '\n']) {
        text.retain(|c| c != '\r' && c != '\n');
    }
    text
}

#[cfg(test)]
mod close_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (Version::Http11, false, "HTTP/1.1 200 OK\r\nConnection: Keep-Alive\r\n"),
            (Version::Http11, true, "HTTP/1.1 200 OK\r\nConnection: close\r\n"),
            (Version::Http10, false, "HTTP/1.0 200 OK\r\nConnection: Keep-Alive\r\n"),
            (Version::Http10, true, "HTTP/1.0 200 OK\r\nConnection: close\r\n"),
        ];

        for (version, is_close, head) in cases {
            let mut resp = Response::new(version);
            assert!(!resp.is_close());

            if is_close {
                resp.close();
                assert!(resp.is_close());
            }

            assert_eq!(
                str_op(&resp.to_bytes()),
                format!("{head}Content-Length: 0\r\n\r\n")
            );
        }
    }

    #[test]
    fn manual_connection_header_is_ignored() {
        let mut resp = Response::new(Version::Http11);
        resp.header("Connection", "close");

        let bytes = resp.to_bytes();
        assert!(!resp.is_close());
        assert_eq!(str_op(&bytes).matches("Connection").count(), 1);
        assert!(str_op(&bytes).contains("Connection: Keep-Alive\r\n"));
    }
}

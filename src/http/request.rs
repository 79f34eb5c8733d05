use crate::{
    errors::ParseError,
    http::types::{slice_to_usize, Headers, Method, Version},
    limits::ReqLimits,
    query::Query,
};
use memchr::{memchr, memmem, memrchr};
use std::{collections::HashMap, time::SystemTime};

/// A parsed HTTP request.
///
/// A `Request` handed to the application is always complete: the method is
/// one of the supported [`Method`]s, every header has been read and the
/// body holds exactly [`content_length()`](Request::content_length) bytes.
///
/// # Input data requirements
///
/// #### Character encoding
///
/// The request line and headers must be `UTF-8`; the body may be any bytes.
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: Carriage return + line feed (`"\r\n"`) - **exactly this sequence required**
///
/// ## First line
/// ```text
/// [METHOD] SP [PATH] ["?" QUERY] SP "HTTP/1." ("0" | "1") CRLF
/// ```
///
/// Empty lines before the first line are skipped. The query is split on
/// `&` and then on the first `=` (see [`Query`]).
///
/// ## Header
/// ```text
/// [NAME] ":" [OWS] [VALUE] [OWS] CRLF
/// ```
///
/// Names are matched case-insensitively and a repeated name replaces the
/// earlier value. Whitespace around the value is trimmed.
///
/// ## Body
///
/// Only bodies with an explicit `Content-Length` are supported.
/// `Transfer-Encoding` is rejected with `501 Not Implemented`.
///
/// ## Keep-alive
///
/// | Version    | Default    | Override                  |
/// |------------|------------|---------------------------|
/// | `HTTP/1.1` | keep-alive | `Connection: close`       |
/// | `HTTP/1.0` | close      | `Connection: keep-alive`  |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    path_params: HashMap<String, String>,
    version: Version,

    headers: Headers,
    content_length: usize,
    keep_alive: bool,

    body: Vec<u8>,
    receive_time: SystemTime,
}

impl Request {
    /// Creates a request for `target` (`path[?query]`) without headers or body.
    ///
    /// Mostly useful for exercising handlers and middleware directly:
    ///
    /// ```
    /// use wirehttp::{Method, Request};
    ///
    /// let req = Request::new(Method::Get, "/search?q=rust&page")
    ///     .with_header("Origin", "https://example.com");
    ///
    /// assert_eq!(req.path(), "/search");
    /// assert_eq!(req.query("q"), Some("rust"));
    /// assert_eq!(req.query("page"), Some(""));
    /// assert_eq!(req.header("origin"), Some("https://example.com"));
    /// ```
    pub fn new(method: Method, target: &str) -> Self {
        let mut request = Self::empty(SystemTime::now());
        request.method = method;
        request.set_target(target);
        request
    }

    /// Adds a header, replacing any earlier value with the same name.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);

        if name.eq_ignore_ascii_case("connection") {
            self.keep_alive = keep_alive(self.version, Some(value));
        }
        self
    }

    /// Sets the body and the matching `Content-Length`.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.content_length = self.body.len();
        self.headers
            .insert("Content-Length", self.content_length.to_string());
        self
    }

    #[inline]
    fn empty(receive_time: SystemTime) -> Self {
        Self {
            method: Method::Get,
            path: String::new(),
            query: HashMap::new(),
            path_params: HashMap::new(),
            version: Version::Http11,

            headers: Headers::new(),
            content_length: 0,
            keep_alive: true,

            body: Vec::new(),
            receive_time,
        }
    }

    #[inline]
    fn set_target(&mut self, target: &str) {
        match memchr(b'?', target.as_bytes()) {
            Some(pos) => {
                self.path = target[..pos].to_string();
                Query::parse_into(&mut self.query, &target[pos + 1..]);
            }
            None => self.path = target.to_string(),
        }
    }

    #[inline]
    pub(crate) fn set_path_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.path_params.insert(name.into(), value.into());
    }

    #[inline]
    pub(crate) fn clear_path_params(&mut self) {
        self.path_params.clear();
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Path without the query string, e.g. `/api/users/42`.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns a query parameter. Keys without `=` have an empty value.
    #[inline]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    #[inline]
    pub const fn queries(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns a path parameter captured by a pattern route.
    ///
    /// Captures are stored by position (`param1`, `param2`, ...) and by the
    /// `:name` used in the pattern, so both lookups work:
    ///
    /// ```
    /// # use wirehttp::{Method, Request, Response, Router, Version};
    /// let mut router = Router::new();
    /// router.add_regex_callback(Method::Get, "/users/:id", |req, resp| {
    ///     assert_eq!(req.path_param("param1"), req.path_param("id"));
    ///     resp.body(req.path_param("id").unwrap_or_default().to_string());
    ///     Ok(())
    /// })?;
    ///
    /// let mut req = Request::new(Method::Get, "/users/42");
    /// let mut resp = Response::new(Version::Http11);
    /// assert!(router.route(&mut req, &mut resp)?);
    /// assert_eq!(resp.body_bytes(), b"42");
    /// # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    /// ```
    #[inline]
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path_params.get(key).map(String::as_str)
    }

    #[inline]
    pub const fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// Returns a header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Declared `Content-Length`, `0` when absent. Always equals `body().len()`.
    #[inline(always)]
    pub const fn content_length(&self) -> usize {
        self.content_length
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Time at which the request line was received.
    #[inline(always)]
    pub const fn receive_time(&self) -> SystemTime {
        self.receive_time
    }

    /// Returns the keep-alive status of the connection.
    #[inline(always)]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }
}

#[inline]
fn keep_alive(version: Version, connection: Option<&str>) -> bool {
    let has_token = |token: &str| {
        connection.is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    };

    match version {
        Version::Http11 => !has_token("close"),
        Version::Http10 => has_token("keep-alive"),
    }
}

/// State of a [`RequestParser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    ExpectRequestLine,
    ExpectHeaders,
    ExpectBody,
    /// A complete request is ready. Terminal until the request is taken.
    Done,
}

/// Incremental HTTP/1.x request parser.
///
/// Bytes can arrive split at any point: [`feed`](Self::feed) only consumes
/// complete lines (and a body only once all of it is present), leaving the
/// rest in the caller's buffer for the next call. Feeding a request in
/// several chunks therefore gives exactly the same result as feeding it at
/// once.
///
/// ```
/// use wirehttp::{limits::ReqLimits, ParseState, RequestParser};
/// use std::time::SystemTime;
///
/// let mut parser = RequestParser::new(ReqLimits::default());
/// let mut buffer = b"POST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nab".to_vec();
///
/// assert_eq!(parser.feed(&mut buffer, SystemTime::now()), Ok(false));
/// assert_eq!(parser.state(), ParseState::ExpectBody);
/// assert_eq!(buffer, b"ab"); // body bytes wait in the buffer
///
/// buffer.extend_from_slice(b"cd");
/// assert_eq!(parser.feed(&mut buffer, SystemTime::now()), Ok(true));
///
/// let request = parser.take_request().unwrap();
/// assert_eq!(request.body(), b"abcd");
/// assert_eq!(parser.state(), ParseState::ExpectRequestLine);
/// ```
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    limits: ReqLimits,
    request: Request,
    header_lines: usize,
}

impl RequestParser {
    pub fn new(limits: ReqLimits) -> Self {
        Self {
            state: ParseState::ExpectRequestLine,
            limits,
            request: Request::empty(SystemTime::UNIX_EPOCH),
            header_lines: 0,
        }
    }

    #[inline]
    pub const fn state(&self) -> ParseState {
        self.state
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Drops any partial request and starts over.
    #[inline]
    pub fn reset(&mut self) {
        self.state = ParseState::ExpectRequestLine;
        self.request = Request::empty(SystemTime::UNIX_EPOCH);
        self.header_lines = 0;
    }

    /// Takes the completed request and resets the parser for the next one.
    ///
    /// Returns `None` unless the parser is in [`ParseState::Done`].
    pub fn take_request(&mut self) -> Option<Request> {
        if !self.is_done() {
            return None;
        }

        let request = std::mem::replace(&mut self.request, Request::empty(SystemTime::UNIX_EPOCH));
        self.reset();
        Some(request)
    }

    /// Consumes as much of `buffer` as possible.
    ///
    /// Returns `Ok(true)` once a full request is available (see
    /// [`take_request`](Self::take_request)) and `Ok(false)` when more bytes
    /// are needed. Consumed bytes are removed from the front of `buffer`;
    /// anything after a completed request (a pipelined request) stays.
    ///
    /// Errors are final for the connection: the parser must not be fed again
    /// without a [`reset`](Self::reset).
    pub fn feed(&mut self, buffer: &mut Vec<u8>, now: SystemTime) -> Result<bool, ParseError> {
        let mut consumed = 0;
        let result = self.advance(buffer, &mut consumed, now);
        buffer.drain(..consumed);
        result
    }

    fn advance(
        &mut self,
        buffer: &[u8],
        consumed: &mut usize,
        now: SystemTime,
    ) -> Result<bool, ParseError> {
        loop {
            let pending = &buffer[*consumed..];

            match self.state {
                ParseState::ExpectRequestLine => {
                    let Some(end) = find_crlf(pending) else {
                        if unterminated_len(pending) > self.limits.request_line_size {
                            return Err(ParseError::UriTooLong);
                        }
                        return Ok(false);
                    };

                    // Tolerate empty lines between pipelined requests
                    if end == 0 {
                        *consumed += 2;
                        continue;
                    }

                    if end > self.limits.request_line_size {
                        return Err(ParseError::UriTooLong);
                    }

                    self.parse_request_line(&pending[..end], now)?;
                    *consumed += end + 2;
                    self.state = ParseState::ExpectHeaders;
                }
                ParseState::ExpectHeaders => {
                    let Some(end) = find_crlf(pending) else {
                        if unterminated_len(pending) > self.limits.header_line_size {
                            return Err(ParseError::HeaderTooLarge);
                        }
                        return Ok(false);
                    };

                    *consumed += end + 2;

                    if end == 0 {
                        self.finish_headers()?;
                        continue;
                    }

                    if end > self.limits.header_line_size {
                        return Err(ParseError::HeaderTooLarge);
                    }

                    self.header_lines += 1;
                    if self.header_lines > self.limits.header_count {
                        return Err(ParseError::HeaderTooLarge);
                    }

                    self.parse_header(&pending[..end])?;
                }
                ParseState::ExpectBody => {
                    let length = self.request.content_length;
                    if pending.len() < length {
                        return Ok(false);
                    }

                    self.request.body = pending[..length].to_vec();
                    *consumed += length;
                    self.state = ParseState::Done;
                }
                ParseState::Done => return Ok(true),
            }
        }
    }
}

#[inline]
fn find_crlf(data: &[u8]) -> Option<usize> {
    memmem::find(data, b"\r\n")
}

/// Length of a line still waiting for its CRLF. A trailing `\r` may be the
/// first half of the terminator and is not counted.
#[inline]
fn unterminated_len(pending: &[u8]) -> usize {
    match pending.last() {
        Some(b'\r') => pending.len() - 1,
        _ => pending.len(),
    }
}

#[inline]
fn to_str(data: &[u8]) -> Result<&str, ParseError> {
    simdutf8::basic::from_utf8(data).map_err(|_| ParseError::InvalidEncoding)
}

// Parse first line
impl RequestParser {
    fn parse_request_line(&mut self, line: &[u8], now: SystemTime) -> Result<(), ParseError> {
        let method_end = memchr(b' ', line).ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(&line[..method_end])?;

        let version_start = memrchr(b' ', line)
            .filter(|pos| *pos > method_end)
            .ok_or(ParseError::InvalidVersion)?;
        let version = Version::from_bytes(&line[version_start + 1..])?;

        let target = to_str(&line[method_end + 1..version_start])?;
        if !target.starts_with('/') || target.contains(' ') {
            return Err(ParseError::InvalidUrl);
        }

        let request = &mut self.request;
        *request = Request::empty(now);
        request.method = method;
        request.version = version;
        request.set_target(target);

        Ok(())
    }
}

// Parse headers
impl RequestParser {
    fn parse_header(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let colon = memchr(b':', line).ok_or(ParseError::InvalidHeader)?;

        let name = to_str(&line[..colon])?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::InvalidHeader);
        }

        let value = to_str(&line[colon + 1..])?.trim_matches(|c| c == ' ' || c == '\t');

        self.request.headers.insert(name, value);
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<(), ParseError> {
        let request = &mut self.request;

        if request.headers.contains("transfer-encoding") {
            return Err(ParseError::UnsupportedTransferEncoding);
        }

        request.content_length = match request.headers.get("content-length") {
            Some(value) => slice_to_usize(value.as_bytes()).ok_or(ParseError::InvalidContentLength)?,
            None => 0,
        };

        if request.content_length > self.limits.body_size {
            return Err(ParseError::BodyTooLarge);
        }

        request.keep_alive = keep_alive(request.version, request.headers.get("connection"));

        self.state = match request.content_length {
            0 => ParseState::Done,
            _ => ParseState::ExpectBody,
        };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000)
    }

    fn parse_once(data: &[u8]) -> Result<Option<Request>, ParseError> {
        let mut parser = RequestParser::new(ReqLimits::default());
        let mut buffer = data.to_vec();

        match parser.feed(&mut buffer, now())? {
            true => Ok(parser.take_request()),
            false => Ok(None),
        }
    }

    fn parse_ok(data: &str) -> Request {
        match parse_once(data.as_bytes()) {
            Ok(Some(request)) => request,
            other => panic!("{data:?} => {other:?}"),
        }
    }

    #[test]
    fn simple_get() {
        let req = parse_ok("GET /users/42 HTTP/1.1\r\nHost: x\r\n\r\n");

        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/users/42");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header("host"), Some("x"));
        assert_eq!(req.content_length(), 0);
        assert!(req.body().is_empty());
        assert!(req.is_keep_alive());
        assert_eq!(req.receive_time(), now());
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET",     Ok(Method::Get)),
            ("POST",    Ok(Method::Post)),
            ("HEAD",    Ok(Method::Head)),
            ("PUT",     Ok(Method::Put)),
            ("DELETE",  Ok(Method::Delete)),
            ("OPTIONS", Ok(Method::Options)),

            ("PATCH",   Err(ParseError::InvalidMethod)),
            ("get",     Err(ParseError::InvalidMethod)),
            ("BREW",    Err(ParseError::InvalidMethod)),
        ];

        for (method, expected) in cases {
            let data = format!("{method} / HTTP/1.1\r\n\r\n");
            let result = parse_once(data.as_bytes()).map(|r| r.map(|r| r.method()));

            assert_eq!(result, expected.map(Some), "{method:?}");
        }
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/",                     Ok(("/", vec![]))),
            ("/?",                    Ok(("/", vec![]))),
            ("/api/find?user=qwe&id=223", Ok(("/api/find", vec![("user", "qwe"), ("id", "223")]))),
            ("/?debug&name=&=Qwe&&id=1",  Ok(("/", vec![("debug", ""), ("name", ""), ("", "Qwe"), ("id", "1")]))),
            ("/?a=1&a=2&a=3",         Ok(("/", vec![("a", "3")]))),
            ("/?very=long=value",     Ok(("/", vec![("very", "long=value")]))),

            ("qwe",     Err(ParseError::InvalidUrl)),
            ("",        Err(ParseError::InvalidUrl)),
            ("/a /b",   Err(ParseError::InvalidUrl)),
        ];

        for (url, expected) in cases {
            let data = format!("GET {url} HTTP/1.1\r\n\r\n");

            match (parse_once(data.as_bytes()), expected) {
                (Ok(Some(req)), Ok((path, query))) => {
                    assert_eq!(req.path(), path, "{url:?}");
                    assert_eq!(req.queries().len(), query.len(), "{url:?}");

                    for (key, value) in query {
                        assert_eq!(req.query(key), Some(value), "{url:?}");
                    }
                }
                (result, expected) => assert_eq!(result.map(|_| ()), expected.map(|_| ()), "{url:?}"),
            }
        }
    }

    #[test]
    fn parse_version() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",  Ok((Version::Http11, true))),
            ("GET / HTTP/1.0\r\n\r\n",  Ok((Version::Http10, false))),

            ("GET / HTTP/1.1\r\nConnection: close\r\n\r\n",      Ok((Version::Http11, false))),
            ("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n", Ok((Version::Http10, true))),
            ("GET / HTTP/1.1\r\nConnection: upgrade, close\r\n\r\n", Ok((Version::Http11, false))),

            ("GET / HTTP/2.0\r\n\r\n",  Err(ParseError::UnsupportedVersion)),
            ("GET / HTTP/0.9\r\n\r\n",  Err(ParseError::UnsupportedVersion)),
            ("GET / http/1.1\r\n\r\n",  Err(ParseError::InvalidVersion)),
            ("GET / HTTP/1.15\r\n\r\n", Err(ParseError::InvalidVersion)),
            ("GET /\r\n\r\n",           Err(ParseError::InvalidVersion)),
        ];

        for (data, expected) in cases {
            let result = parse_once(data.as_bytes())
                .map(|r| r.map(|r| (r.version(), r.is_keep_alive())));

            assert_eq!(result, expected.map(Some), "{data:?}");
        }
    }

    #[test]
    fn parse_header() {
        #[rustfmt::skip]
        let cases = [
            ("HEADER: value\r\n",      Ok(("header", "value"))),
            ("Header:value\r\n",       Ok(("header", "value"))),
            ("header:   value  \r\n",  Ok(("header", "value"))),
            ("header: \r\n",           Ok(("header", ""))),
            ("header: a: b\r\n",       Ok(("header", "a: b"))),

            ("header value\r\n",       Err(ParseError::InvalidHeader)),
            (": value\r\n",            Err(ParseError::InvalidHeader)),
            ("bad name: value\r\n",    Err(ParseError::InvalidHeader)),
        ];

        for (line, expected) in cases {
            let data = format!("GET / HTTP/1.1\r\n{line}\r\n");

            match (parse_once(data.as_bytes()), expected) {
                (Ok(Some(req)), Ok((name, value))) => {
                    assert_eq!(req.header(name), Some(value), "{line:?}");
                }
                (result, expected) => assert_eq!(result.map(|_| ()), expected.map(|_| ()), "{line:?}"),
            }
        }
    }

    #[test]
    fn duplicate_headers_last_wins() {
        let req = parse_ok("GET / HTTP/1.1\r\nX-Id: 1\r\nx-id: 2\r\nX-ID: 3\r\n\r\n");

        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.header("X-Id"), Some("3"));
    }

    #[test]
    fn content_length() {
        #[rustfmt::skip]
        let cases = [
            ("Content-Length: 0\r\n",    Ok(0)),
            ("Content-Length: 5\r\n",    Ok(5)),
            ("content-length:  5 \r\n",  Ok(5)),

            ("Content-Length: abc\r\n",  Err(ParseError::InvalidContentLength)),
            ("Content-Length: -1\r\n",   Err(ParseError::InvalidContentLength)),
            ("Content-Length: \r\n",     Err(ParseError::InvalidContentLength)),
            ("Content-Length: 99999999\r\n", Err(ParseError::BodyTooLarge)),
            ("Transfer-Encoding: chunked\r\n", Err(ParseError::UnsupportedTransferEncoding)),
        ];

        for (header, expected) in cases {
            let data = format!("POST / HTTP/1.1\r\n{header}\r\nhello");

            let result = parse_once(data.as_bytes()).map(|r| r.map(|r| r.content_length()));
            assert_eq!(result, expected.map(Some), "{header:?}");
        }
    }

    #[test]
    fn body_waits_for_all_bytes() {
        let mut parser = RequestParser::new(ReqLimits::default());
        let mut buffer = b"POST /upload HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcdef".to_vec();

        assert_eq!(parser.feed(&mut buffer, now()), Ok(false));
        assert_eq!(parser.state(), ParseState::ExpectBody);
        assert_eq!(buffer, b"abcdef");
        assert!(parser.take_request().is_none());

        buffer.extend_from_slice(b"ghij");
        assert_eq!(parser.feed(&mut buffer, now()), Ok(true));
        assert_eq!(parser.state(), ParseState::Done);
        assert!(buffer.is_empty());

        let req = parser.take_request().unwrap();
        assert_eq!(req.body(), b"abcdefghij");
        assert_eq!(req.content_length(), 10);
    }

    #[test]
    fn two_chunks_equal_one() {
        let mut parser = RequestParser::new(ReqLimits::default());
        let mut buffer = b"GET / HTTP/1.1\r\n".to_vec();

        assert_eq!(parser.feed(&mut buffer, now()), Ok(false));
        assert_eq!(parser.state(), ParseState::ExpectHeaders);

        buffer.extend_from_slice(b"Host: a\r\n\r\n");
        assert_eq!(parser.feed(&mut buffer, now()), Ok(true));

        assert_eq!(
            parser.take_request(),
            Some(parse_ok("GET / HTTP/1.1\r\nHost: a\r\n\r\n"))
        );
    }

    #[test]
    fn any_split_point() {
        let data = b"POST /api/items?tag=a&tag=b HTTP/1.1\r\n\
                     Host: example.com\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: 13\r\n\
                     \r\n\
                     {\"id\": 12345}";
        let expected = parse_once(data).unwrap().unwrap();

        for split in 0..=data.len() {
            let mut parser = RequestParser::new(ReqLimits::default());
            let mut buffer = data[..split].to_vec();

            let first = parser.feed(&mut buffer, now()).unwrap();
            assert_eq!(first, split == data.len(), "split at {split}");

            buffer.extend_from_slice(&data[split..]);
            assert_eq!(parser.feed(&mut buffer, now()), Ok(true), "split at {split}");
            assert_eq!(parser.take_request().as_ref(), Some(&expected), "split at {split}");
        }
    }

    #[test]
    fn split_at_limit() {
        let limits = ReqLimits {
            request_line_size: 15,
            header_line_size: 7,
            ..ReqLimits::default()
        };
        // Both lines are exactly at their limit
        let data = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n";

        for split in 0..=data.len() {
            let mut parser = RequestParser::new(limits.clone());
            let mut buffer = data[..split].to_vec();

            assert_eq!(
                parser.feed(&mut buffer, now()),
                Ok(split == data.len()),
                "split at {split}"
            );

            buffer.extend_from_slice(&data[split..]);
            assert_eq!(parser.feed(&mut buffer, now()), Ok(true), "split at {split}");
            assert_eq!(parser.take_request().unwrap().header("host"), Some("x"));
        }
    }

    #[test]
    fn byte_by_byte() {
        let data = b"PUT /a HTTP/1.0\r\nContent-Length: 3\r\nConnection: keep-alive\r\n\r\nxyz";
        let mut parser = RequestParser::new(ReqLimits::default());
        let mut buffer = Vec::new();

        for (i, byte) in data.iter().enumerate() {
            buffer.push(*byte);
            let done = parser.feed(&mut buffer, now()).unwrap();
            assert_eq!(done, i == data.len() - 1);
        }

        let req = parser.take_request().unwrap();
        assert_eq!(req.method(), Method::Put);
        assert_eq!(req.body(), b"xyz");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn pipelined_requests() {
        let mut parser = RequestParser::new(ReqLimits::default());
        let mut buffer = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c".to_vec();

        assert_eq!(parser.feed(&mut buffer, now()), Ok(true));
        assert_eq!(parser.take_request().unwrap().path(), "/a");

        assert_eq!(parser.feed(&mut buffer, now()), Ok(true));
        assert_eq!(parser.take_request().unwrap().path(), "/b");

        assert_eq!(parser.feed(&mut buffer, now()), Ok(false));
        assert_eq!(buffer, b"GET /c");
    }

    #[test]
    fn leading_empty_lines() {
        let req = parse_ok("\r\n\r\nGET /x HTTP/1.1\r\n\r\n");
        assert_eq!(req.path(), "/x");
    }

    #[test]
    fn limits() {
        let limits = ReqLimits {
            request_line_size: 32,
            header_line_size: 24,
            header_count: 2,
            body_size: 4,
            ..ReqLimits::default()
        };

        #[rustfmt::skip]
        let cases: [(&[u8], Result<bool, ParseError>); 8] = [
            (b"GET /0123456789 HTTP/1.1\r\n\r\n",  Ok(true)),
            (b"GET /0123456789012345678901 HTTP/1.1\r\n", Err(ParseError::UriTooLong)),
            // No CRLF yet, but already too long
            (b"GET /0123456789012345678901234567890",     Err(ParseError::UriTooLong)),

            (b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n",          Ok(true)),
            (b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n",  Err(ParseError::HeaderTooLarge)),
            (b"GET / HTTP/1.1\r\nX-Long: 01234567890123456789\r\n", Err(ParseError::HeaderTooLarge)),
            (b"GET / HTTP/1.1\r\nX-Long: 01234567890123456789", Err(ParseError::HeaderTooLarge)),

            (b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n", Err(ParseError::BodyTooLarge)),
        ];

        for (data, expected) in cases {
            let mut parser = RequestParser::new(limits.clone());
            let mut buffer = data.to_vec();

            assert_eq!(
                parser.feed(&mut buffer, now()),
                expected,
                "{:?}",
                String::from_utf8_lossy(data)
            );
        }
    }

    #[test]
    fn invalid_utf8() {
        let cases: [&[u8]; 2] = [
            b"GET /\xff HTTP/1.1\r\n\r\n",
            b"GET / HTTP/1.1\r\nX-Bin: \xc3\x28\r\n\r\n",
        ];

        for data in cases {
            assert_eq!(parse_once(data), Err(ParseError::InvalidEncoding));
        }

        // Binary bodies are fine
        let req = parse_once(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\n\xff\x00")
            .unwrap()
            .unwrap();
        assert_eq!(req.body(), b"\xff\x00");
    }

    #[test]
    fn builder_api() {
        let req = Request::new(Method::Post, "/items?x=1")
            .with_header("Connection", "close")
            .with_body("data");

        assert_eq!(req.path(), "/items");
        assert_eq!(req.query("x"), Some("1"));
        assert_eq!(req.content_length(), 4);
        assert_eq!(req.header("content-length"), Some("4"));
        assert!(!req.is_keep_alive());
    }
}

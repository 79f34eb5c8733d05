use crate::{
    errors::{BoxError, HandlerResult, ParseError},
    http::{
        request::{Request, RequestParser},
        response::Response,
        types::{StatusCode, Version},
    },
    limits::{ConnLimits, ReqLimits, RespLimits},
    middleware::{Flow, MiddlewareChain},
    router::{Callback, Router},
    tls::TlsConnection,
};
use std::{
    any::Any,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Instant, SystemTime},
};

/// Output side of the reactor: where a connection's bytes go.
///
/// The tokio driver implements it with an [`Outbox`] flushed to the socket
/// after every read; tests use the same `Outbox` to inspect the wire.
pub trait Transport {
    /// Queues bytes for the peer. Already encrypted when TLS is on.
    fn send(&mut self, bytes: &[u8]);

    /// Asks the reactor to close the connection once queued bytes are written.
    fn shutdown(&mut self);
}

/// In-memory [`Transport`].
#[derive(Debug, Default)]
pub struct Outbox {
    data: Vec<u8>,
    shutdown: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn take(&mut self) -> Vec<u8> {
        mem::take(&mut self.data)
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.shutdown = false;
    }
}

impl Transport for Outbox {
    #[inline]
    fn send(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    #[inline]
    fn shutdown(&mut self) {
        self.shutdown = true;
    }
}

//

/// The request pipeline shared by every connection: middleware, router and
/// the fallback for unmatched requests.
///
/// Immutable once built; connections hold it through an `Arc`.
pub struct Service {
    router: Router,
    middleware: MiddlewareChain,
    fallback: Option<Callback>,
    json_errors: bool,
}

impl Service {
    pub fn new(router: Router, middleware: MiddlewareChain) -> Self {
        Self {
            router,
            middleware,
            fallback: None,
            json_errors: true,
        }
    }

    /// Replaces the built-in `404 Not Found` for requests no route matched.
    pub fn with_fallback(mut self, fallback: Callback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Whether error responses carry a `{"error":..,"code":..}` body.
    pub fn with_json_errors(mut self, json_errors: bool) -> Self {
        self.json_errors = json_errors;
        self
    }

    #[inline]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[inline]
    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    #[inline]
    pub fn json_errors(&self) -> bool {
        self.json_errors
    }

    /// Runs one request through the pipeline:
    /// `before` hooks, then the route (unless a hook halted), then the
    /// `after` hooks of every middleware that was entered, in reverse.
    ///
    /// A handler that fails or panics yields `500 Internal Server Error`;
    /// the fault never escapes this call.
    pub fn dispatch(&self, req: &mut Request, resp: &mut Response) {
        let (flow, entered) = self.middleware.process_before(req, resp);

        if flow == Flow::Continue {
            if let Err(err) = self.handle(req, resp) {
                tracing::error!(
                    method = %req.method(),
                    path = req.path(),
                    error = %err,
                    "handler failed"
                );
                error_body(resp, StatusCode::InternalServerError, "HANDLER_FAULT", self.json_errors);
            }
        }

        self.middleware.process_after(entered, req, resp);
    }

    fn handle(&self, req: &mut Request, resp: &mut Response) -> HandlerResult {
        if guarded(|| self.router.route(req, resp))? {
            return Ok(());
        }

        match &self.fallback {
            Some(fallback) => guarded(|| fallback(req, resp)),
            None => {
                error_body(resp, StatusCode::NotFound, "NOT_FOUND", self.json_errors);
                Ok(())
            }
        }
    }
}

/// Replaces whatever `resp` holds with an error status and, with `json`,
/// a `{"error":..,"code":..}` body.
pub(crate) fn error_body(resp: &mut Response, status: StatusCode, code: &str, json: bool) {
    resp.reset(status);

    if json {
        resp.header("Content-Type", "application/json").body(format!(
            r#"{{"error":"{}","code":"{code}"}}"#,
            status.reason()
        ));
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("router", &self.router)
            .field("middleware", &self.middleware)
            .field("fallback", &self.fallback.is_some())
            .field("json_errors", &self.json_errors)
            .finish()
    }
}

/// Runs handler code, turning a panic into an ordinary error.
fn guarded<T>(f: impl FnOnce() -> Result<T, BoxError>) -> Result<T, BoxError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(format!("handler panicked: {}", panic_message(&*payload)).into()))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

//

/// Per-connection HTTP state: optional TLS session, parser and the
/// plaintext not parsed yet.
///
/// The reactor calls [`on_established`](Self::on_established) once, then
/// [`on_message`](Self::on_message) for every chunk read from the socket,
/// then [`on_destroyed`](Self::on_destroyed). Requests are answered in
/// order; pipelined requests in one chunk all get answered.
///
/// ```
/// use std::{sync::Arc, time::SystemTime};
/// use wirehttp::{HttpConnection, Method, MiddlewareChain, Outbox, Router, Service};
///
/// let mut router = Router::new();
/// router.register_callback(Method::Get, "/ping", |_, resp| {
///     resp.body("pong");
///     Ok(())
/// });
///
/// let service = Arc::new(Service::new(router, MiddlewareChain::new()));
/// let mut conn = HttpConnection::new(1, service);
/// let mut outbox = Outbox::new();
///
/// conn.on_established();
/// conn.on_message(b"GET /ping HTTP/1.1\r\n\r\n", SystemTime::now(), &mut outbox);
///
/// assert!(outbox.data().ends_with(b"\r\n\r\npong"));
/// assert!(!outbox.is_shutdown());
/// ```
#[derive(Debug)]
pub struct HttpConnection {
    id: u64,
    service: Arc<Service>,
    tls: Option<TlsConnection>,

    parser: RequestParser,
    inbound: Vec<u8>,
    outbound: Vec<u8>,

    conn_limits: ConnLimits,
    resp_limits: RespLimits,

    created: Instant,
    request_count: usize,
    closed: bool,
}

impl HttpConnection {
    pub fn new(id: u64, service: Arc<Service>) -> Self {
        Self::with_limits(id, service, ConnLimits::default(), ReqLimits::default(), RespLimits::default())
    }

    pub fn with_limits(
        id: u64,
        service: Arc<Service>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
    ) -> Self {
        Self {
            id,
            service,
            tls: None,

            parser: RequestParser::new(req_limits),
            inbound: Vec::new(),
            outbound: Vec::with_capacity(resp_limits.default_capacity),

            conn_limits,
            resp_limits,

            created: Instant::now(),
            request_count: 0,
            closed: false,
        }
    }

    /// Runs this connection over TLS.
    pub fn with_tls(mut self, tls: TlsConnection) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Reuses the allocated buffers for a new peer.
    pub(crate) fn rebind(&mut self, id: u64, tls: Option<TlsConnection>) {
        self.id = id;
        self.tls = tls;
        self.parser.reset();
        self.inbound.clear();
        self.resp_limits.recycle(&mut self.outbound);
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn request_count(&self) -> usize {
        self.request_count
    }

    #[inline]
    pub fn tls(&self) -> Option<&TlsConnection> {
        self.tls.as_ref()
    }

    pub fn on_established(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
        self.closed = false;

        if let Some(tls) = &mut self.tls {
            tls.start_handshake();
        }
        tracing::debug!(conn = self.id, tls = self.tls.is_some(), "connection established");
    }

    /// Handles bytes read from the socket at `now`.
    pub fn on_message<T: Transport>(&mut self, data: &[u8], now: SystemTime, transport: &mut T) {
        if self.closed {
            return;
        }

        let peer_closed = match &mut self.tls {
            Some(tls) => {
                let result = tls.on_read(data);

                // Handshake records and alerts go out even when the read failed
                let pending = tls.take_outgoing();
                if !pending.is_empty() {
                    transport.send(&pending);
                }

                if let Err(err) = result {
                    tracing::warn!(conn = self.id, error = %err, "TLS failure");
                    self.close(transport);
                    return;
                }

                self.inbound.append(tls.decrypted_mut());
                tls.is_peer_closed()
            }
            None => {
                self.inbound.extend_from_slice(data);
                false
            }
        };

        self.process(now, transport);

        if peer_closed {
            self.close(transport);
        }
    }

    /// Drops all per-connection state. Nothing more is sent.
    pub fn on_destroyed(&mut self) {
        self.tls = None;
        self.parser.reset();
        self.inbound.clear();
        self.closed = true;

        tracing::debug!(conn = self.id, requests = self.request_count, "connection destroyed");
    }

    fn process<T: Transport>(&mut self, now: SystemTime, transport: &mut T) {
        while !self.closed {
            match self.parser.feed(&mut self.inbound, now) {
                Ok(false) => break,
                Ok(true) => {
                    let Some(mut req) = self.parser.take_request() else {
                        break;
                    };

                    if self.respond(&mut req, transport) {
                        self.close(transport);
                    }
                }
                Err(err) => {
                    self.reject(&err, transport);
                    self.close(transport);
                }
            }
        }
    }

    /// Answers one request. Returns `true` when the connection must close.
    fn respond<T: Transport>(&mut self, req: &mut Request, transport: &mut T) -> bool {
        self.request_count += 1;

        let mut resp = Response::new(req.version());
        resp.set_close(!req.is_keep_alive() || self.is_expired());

        self.service.dispatch(req, &mut resp);

        tracing::debug!(
            conn = self.id,
            method = %req.method(),
            path = req.path(),
            status = resp.status_code().as_u16(),
            "request handled"
        );

        !self.write(&resp, transport) || resp.is_close()
    }

    fn reject<T: Transport>(&mut self, err: &ParseError, transport: &mut T) {
        tracing::warn!(
            conn = self.id,
            error = %err,
            status = err.status().as_u16(),
            "malformed request"
        );

        let resp = err.to_response(Version::Http11, self.service.json_errors());
        self.write(&resp, transport);
    }

    /// Request or lifetime budget used up; the current response is the last.
    fn is_expired(&self) -> bool {
        self.request_count >= self.conn_limits.max_requests_per_connection
            || self.created.elapsed() >= self.conn_limits.connection_lifetime
    }

    /// Serializes `resp` and hands it to the transport. Returns `false`
    /// when TLS refused the data.
    fn write<T: Transport>(&mut self, resp: &Response, transport: &mut T) -> bool {
        self.outbound.clear();
        resp.write_to(&mut self.outbound);

        let written = match &mut self.tls {
            Some(tls) => match tls.send(&self.outbound) {
                Ok(()) => {
                    transport.send(&tls.take_outgoing());
                    true
                }
                Err(err) => {
                    tracing::warn!(conn = self.id, error = %err, "cannot encrypt response");
                    false
                }
            },
            None => {
                transport.send(&self.outbound);
                true
            }
        };

        self.resp_limits.recycle(&mut self.outbound);
        written
    }

    fn close<T: Transport>(&mut self, transport: &mut T) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(tls) = &mut self.tls {
            let last = tls.close();
            if !last.is_empty() {
                transport.send(&last);
            }
        }

        self.parser.reset();
        self.inbound.clear();
        transport.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::types::Method,
        middleware::{cors::CorsConfig, cors::CorsMiddleware},
        tls::{TlsContext, TlsState},
        tools::*,
    };
    use std::io::{Read, Write};

    fn service() -> Service {
        let mut router = Router::new();

        router.register_callback(Method::Get, "/status", |_, resp| {
            resp.body("exact");
            Ok(())
        });
        router
            .add_regex_callback(Method::Get, "/:anything", |req, resp| {
                resp.body(format!("pattern {}", req.path_param("param1").unwrap_or("")));
                Ok(())
            })
            .unwrap();
        router
            .add_regex_callback(Method::Get, "/users/:id", |req, resp| {
                resp.body(format!("user {}", req.path_param("param1").unwrap_or("")));
                Ok(())
            })
            .unwrap();
        router.register_callback(Method::Post, "/echo", |req, resp| {
            resp.body(req.body().to_vec());
            Ok(())
        });
        router.register_callback(Method::Get, "/panic", |_, _| panic!("boom"));
        router.register_callback(Method::Get, "/fail", |_, _| Err("database is down".into()));

        Service::new(router, MiddlewareChain::new())
    }

    fn connection(service: Service) -> HttpConnection {
        let mut conn = HttpConnection::new(7, Arc::new(service));
        conn.on_established();
        conn
    }

    fn send(conn: &mut HttpConnection, bytes: &[u8]) -> Outbox {
        let mut outbox = Outbox::new();
        conn.on_message(bytes, SystemTime::now(), &mut outbox);
        outbox
    }

    fn responses(outbox: &Outbox) -> Vec<&str> {
        str_op(outbox.data())
            .split("HTTP/1.")
            .filter(|part| !part.is_empty())
            .collect()
    }

    #[test]
    fn pattern_route_params() {
        let mut conn = connection(service());
        let outbox = send(&mut conn, b"GET /users/42 HTTP/1.1\r\nHost: x\r\n\r\n");

        assert!(str_op(outbox.data()).starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(str_op(outbox.data()).ends_with("\r\n\r\nuser 42"));
    }

    #[test]
    fn exact_beats_pattern() {
        let mut conn = connection(service());

        let outbox = send(&mut conn, b"GET /status HTTP/1.1\r\n\r\n");
        assert!(str_op(outbox.data()).ends_with("\r\n\r\nexact"));

        let outbox = send(&mut conn, b"GET /other HTTP/1.1\r\n\r\n");
        assert!(str_op(outbox.data()).ends_with("\r\n\r\npattern other"));
    }

    #[test]
    fn fragmented_body() {
        let mut conn = connection(service());

        let outbox = send(&mut conn, b"POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcdef");
        assert!(outbox.data().is_empty());

        let outbox = send(&mut conn, b"ghij");
        assert!(str_op(outbox.data()).ends_with("Content-Length: 10\r\n\r\nabcdefghij"));
    }

    #[test]
    fn pipelined_requests() {
        let mut conn = connection(service());
        let outbox = send(
            &mut conn,
            b"GET /status HTTP/1.1\r\n\r\nGET /users/1 HTTP/1.1\r\n\r\nGET /users/2 HTTP/1.1\r\n\r\n",
        );

        let parts = responses(&outbox);
        assert_eq!(parts.len(), 3);
        assert!(parts[0].ends_with("exact"));
        assert!(parts[1].ends_with("user 1"));
        assert!(parts[2].ends_with("user 2"));
        assert_eq!(conn.request_count(), 3);
        assert!(!outbox.is_shutdown());
    }

    #[test]
    fn not_found_keeps_connection() {
        let mut conn = connection(service());
        let outbox = send(&mut conn, b"DELETE /status HTTP/1.1\r\n\r\n");

        assert!(str_op(outbox.data()).starts_with("HTTP/1.1 404 Not Found\r\nConnection: Keep-Alive\r\n"));
        assert!(str_op(outbox.data()).ends_with(r#"{"error":"Not Found","code":"NOT_FOUND"}"#));
        assert!(!conn.is_closed());
    }

    #[test]
    fn fallback_replaces_not_found() {
        let service = service().with_fallback(Arc::new(|req: &Request, resp: &mut Response| -> HandlerResult {
            resp.status(StatusCode::Found).header("Location", format!("/#{}", req.path()));
            Ok(())
        }));
        let mut conn = connection(service);
        let outbox = send(&mut conn, b"PUT /x HTTP/1.1\r\n\r\n");

        assert!(str_op(outbox.data()).starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(str_op(outbox.data()).contains("Location: /#/x\r\n"));
    }

    #[test]
    fn handler_faults_are_isolated() {
        let mut conn = connection(service().with_json_errors(false));

        let outbox = send(&mut conn, b"GET /panic HTTP/1.1\r\n\r\nGET /fail HTTP/1.1\r\n\r\n");
        let parts = responses(&outbox);
        assert_eq!(parts.len(), 2);
        for part in parts {
            assert!(part.starts_with("1 500 Internal Server Error\r\n"), "{part}");
            assert!(part.ends_with("Content-Length: 0\r\n\r\n"));
        }

        // Still serving
        let outbox = send(&mut conn, b"GET /status HTTP/1.1\r\n\r\n");
        assert!(str_op(outbox.data()).ends_with("exact"));
    }

    #[test]
    fn malformed_request_closes() {
        let mut conn = connection(service());
        let outbox = send(&mut conn, b"BREW /pot HTTP/1.1\r\n\r\nGET /status HTTP/1.1\r\n\r\n");

        let parts = responses(&outbox);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].starts_with("1 400 Bad Request\r\nConnection: close\r\n"));
        assert!(outbox.is_shutdown());
        assert!(conn.is_closed());

        // Ignored after close
        assert!(send(&mut conn, b"GET /status HTTP/1.1\r\n\r\n").data().is_empty());
    }

    #[test]
    fn connection_close_and_http10() {
        #[rustfmt::skip]
        let cases: [(&[u8], bool); 4] = [
            (b"GET /status HTTP/1.1\r\n\r\n",                         false),
            (b"GET /status HTTP/1.1\r\nConnection: close\r\n\r\n",    true),
            (b"GET /status HTTP/1.0\r\n\r\n",                         true),
            (b"GET /status HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", false),
        ];

        for (request, closes) in cases {
            let mut conn = connection(service());
            let outbox = send(&mut conn, request);
            assert_eq!(outbox.is_shutdown(), closes, "{}", str_op(request));
            assert_eq!(str_op(outbox.data()).contains("Connection: close\r\n"), closes);
        }
    }

    #[test]
    fn request_budget() {
        let mut conn = HttpConnection::with_limits(
            1,
            Arc::new(service()),
            ConnLimits {
                max_requests_per_connection: 2,
                ..ConnLimits::default()
            },
            ReqLimits::default(),
            RespLimits::default(),
        );
        conn.on_established();

        let outbox = send(&mut conn, b"GET /status HTTP/1.1\r\n\r\nGET /status HTTP/1.1\r\n\r\nGET /status HTTP/1.1\r\n\r\n");
        let parts = responses(&outbox);

        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("Connection: Keep-Alive"));
        assert!(parts[1].contains("Connection: close"));
        assert!(outbox.is_shutdown());
    }

    #[test]
    fn cors_preflight_through_pipeline() {
        let mut chain = MiddlewareChain::new();
        chain.add_middleware(Arc::new(CorsMiddleware::new(CorsConfig {
            allowed_origins: vec!["https://good.example".to_string()],
            ..CorsConfig::default()
        })));
        let service = Service::new(service().router, chain);
        let mut conn = connection(service);

        let outbox = send(
            &mut conn,
            b"OPTIONS /status HTTP/1.1\r\nOrigin: https://evil.example\r\n\r\n",
        );
        assert!(!str_op(outbox.data()).contains("Access-Control-Allow-Origin"));

        let outbox = send(
            &mut conn,
            b"OPTIONS /status HTTP/1.1\r\nOrigin: https://good.example\r\n\r\n",
        );
        assert!(str_op(outbox.data()).starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(str_op(outbox.data()).contains("Access-Control-Allow-Origin: https://good.example\r\n"));
    }

    /// One client flight to the server and the reply back; plaintext lands in `received`.
    fn pump(
        client: &mut rustls::ClientConnection,
        conn: &mut HttpConnection,
        outbox: &mut Outbox,
        received: &mut Vec<u8>,
    ) {
        let mut wire = Vec::new();
        while client.wants_write() {
            client.write_tls(&mut wire).unwrap();
        }
        if !wire.is_empty() {
            conn.on_message(&wire, SystemTime::now(), outbox);
        }

        let reply = outbox.take();
        let mut unread = &reply[..];
        while !unread.is_empty() {
            client.read_tls(&mut unread).unwrap();
            client.process_new_packets().unwrap();
            let _ = client.reader().read_to_end(received);
        }
    }

    #[test]
    fn https_round_trip() {
        let context = TlsContext::from_pem(CERT, KEY).unwrap();
        let mut conn = HttpConnection::new(3, Arc::new(service()))
            .with_tls(TlsConnection::new(&context).unwrap());
        conn.on_established();

        let mut client = tls_client();
        let mut outbox = Outbox::new();
        let mut received = Vec::new();

        for _ in 0..5 {
            pump(&mut client, &mut conn, &mut outbox, &mut received);
        }
        assert_eq!(conn.tls().map(TlsConnection::state), Some(TlsState::Established));
        assert!(received.is_empty());

        client
            .writer()
            .write_all(b"GET /users/9 HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        pump(&mut client, &mut conn, &mut outbox, &mut received);

        assert!(str_op(&received).starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(str_op(&received).ends_with("\r\n\r\nuser 9"));
    }

    #[test]
    fn plaintext_on_tls_port() {
        let context = TlsContext::from_pem(CERT, KEY).unwrap();
        let mut conn = HttpConnection::new(4, Arc::new(service()))
            .with_tls(TlsConnection::new(&context).unwrap());
        conn.on_established();

        let outbox = send(&mut conn, b"GET /status HTTP/1.1\r\n\r\n");

        assert!(outbox.is_shutdown());
        assert!(!String::from_utf8_lossy(outbox.data()).contains("exact"));
        assert_eq!(conn.request_count(), 0);
    }
}

use crate::{
    config::ServerConfig,
    errors::{Error, HandlerResult, Result},
    http::{
        request::Request,
        response::Response,
        types::{Method, StatusCode, Version},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    middleware::{cors::CorsMiddleware, Middleware, MiddlewareChain},
    router::{Callback, RouteTarget, Router, RouterHandler},
    server::connection::{error_body, HttpConnection, Outbox, Service},
    session::{MemorySessionStorage, SessionManager},
    tls::{TlsConnection, TlsContext},
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::SystemTime,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::{sleep as tokio_sleep, timeout},
};
use tracing::Instrument;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// An HTTP/1.x server running on tokio.
///
/// A fixed pool of worker tasks is spawned at launch. The accept loop hands
/// connections to the pool through a lock-free queue; when more than
/// [`max_pending_connections`](ServerLimits::max_pending_connections) are
/// waiting, new connections get `503 Service Unavailable` instead.
///
/// # Examples
///
/// ```no_run
/// use wirehttp::HttpServer;
///
/// #[tokio::main]
/// async fn main() -> wirehttp::Result<()> {
///     HttpServer::builder()
///         .bind("127.0.0.1:8080")
///         .get("/", |_, resp| {
///             resp.body("Hello world!");
///             Ok(())
///         })
///         .get("/users/:id", |req, resp| {
///             resp.body(format!("user {}", req.path_param("id").unwrap_or("?")));
///             Ok(())
///         })
///         .build()?
///         .launch()
///         .await
/// }
/// ```
pub struct HttpServer {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    service: Arc<Service>,
    tls: Option<TlsContext>,
    sessions: Option<Arc<SessionManager>>,

    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl HttpServer {
    /// Creates a builder with the default [`ServerConfig`].
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            config: ServerConfig::default(),
            listener: None,
            router: Router::new(),
            middleware: Vec::new(),
            fallback: None,
            tls: None,
            sessions: None,
            error: None,
        }
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The session manager swept by this server, if sessions are enabled.
    #[inline]
    pub fn session_manager(&self) -> Option<&Arc<SessionManager>> {
        self.sessions.as_ref()
    }

    /// Starts the worker pool and accepts connections until the task is
    /// dropped. Only fails if the listener cannot be registered with the
    /// runtime.
    pub async fn launch(self) -> Result<()> {
        let listener = TcpListener::from_std(self.listener)?;

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        let error_queue: TcpQueue = Arc::new(SegQueue::new());
        let next_id = Arc::new(AtomicU64::new(1));

        for _ in 0..self.server_limits.max_connections {
            spawn_worker(
                &stream_queue,
                &next_id,
                HttpConnection::with_limits(
                    0,
                    self.service.clone(),
                    self.conn_limits.clone(),
                    self.req_limits.clone(),
                    self.resp_limits.clone(),
                ),
                self.tls.clone(),
                self.server_limits.wait_strategy.clone(),
                self.conn_limits.clone(),
            );
        }

        // A TLS client cannot read a plaintext 503, so overflow is just dropped
        if self.server_limits.count_503_handlers != 0 && self.tls.is_none() {
            for _ in 0..self.server_limits.count_503_handlers {
                spawn_alarmist(&error_queue, &self.server_limits, &self.conn_limits);
            }
        } else {
            spawn_quiet_alarmist(&error_queue, &self.server_limits);
        }

        let _sweeper = self.sessions.clone().map(SessionManager::spawn_sweeper);

        tracing::info!(
            addr = %self.local_addr,
            tls = self.tls.is_some(),
            workers = self.server_limits.max_connections,
            "listening"
        );

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };

            match stream_queue.len() < self.server_limits.max_pending_connections {
                true => stream_queue.push((stream, addr)),
                false => {
                    tracing::debug!(%addr, "connection queue full");
                    error_queue.push((stream, addr));
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("local_addr", &self.local_addr)
            .field("service", &self.service)
            .field("tls", &self.tls.is_some())
            .field("sessions", &self.sessions.is_some())
            .finish_non_exhaustive()
    }
}

async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
    loop {
        if let Some(value) = queue.pop() {
            return value;
        }

        match wait {
            WaitStrategy::Yield => yield_now().await,
            WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
        }
    }
}

fn spawn_worker(
    queue: &TcpQueue,
    next_id: &Arc<AtomicU64>,
    mut conn: HttpConnection,
    tls: Option<TlsContext>,
    wait: WaitStrategy,
    limits: ConnLimits,
) {
    let queue = queue.clone();
    let next_id = next_id.clone();

    tokio::spawn(async move {
        let mut outbox = Outbox::new();
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let (stream, addr) = get_stream(&queue, &wait).await;
            let id = next_id.fetch_add(1, Ordering::Relaxed);

            let session = match &tls {
                Some(context) => match TlsConnection::new(context) {
                    Ok(session) => Some(session),
                    Err(err) => {
                        tracing::warn!(conn = id, error = %err, "cannot create TLS session");
                        continue;
                    }
                },
                None => None,
            };
            conn.rebind(id, session);

            let span = tracing::info_span!("conn", id, %addr);
            if let Err(err) = serve(&mut conn, stream, &mut outbox, &mut buffer, &limits)
                .instrument(span)
                .await
            {
                tracing::debug!(conn = id, error = %err, "connection ended with I/O error");
            }
        }
    });
}

/// Answers overflow connections with `503 Service Unavailable`.
fn spawn_alarmist(queue: &TcpQueue, server_limits: &ServerLimits, conn_limits: &ConnLimits) {
    let queue = queue.clone();
    let wait = server_limits.wait_strategy.clone();
    let write_timeout = conn_limits.socket_write_timeout;

    let mut response = Response::new(Version::Http11);
    response.close();
    error_body(
        &mut response,
        StatusCode::ServiceUnavailable,
        "SERVICE_UNAVAILABLE",
        server_limits.json_errors,
    );
    let bytes = response.to_bytes();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = get_stream(&queue, &wait).await;
            let _ = timeout(write_timeout, stream.write_all(&bytes)).await;
        }
    });
}

fn spawn_quiet_alarmist(queue: &TcpQueue, server_limits: &ServerLimits) {
    let queue = queue.clone();
    let wait = server_limits.wait_strategy.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = get_stream(&queue, &wait).await;
            drop(stream);
        }
    });
}

async fn serve(
    conn: &mut HttpConnection,
    mut stream: TcpStream,
    outbox: &mut Outbox,
    buffer: &mut [u8],
    limits: &ConnLimits,
) -> io::Result<()> {
    outbox.reset();
    conn.on_established();

    let result = drive(conn, &mut stream, outbox, buffer, limits).await;

    conn.on_destroyed();
    result
}

async fn drive(
    conn: &mut HttpConnection,
    stream: &mut TcpStream,
    outbox: &mut Outbox,
    buffer: &mut [u8],
    limits: &ConnLimits,
) -> io::Result<()> {
    loop {
        let Ok(read) = timeout(limits.socket_read_timeout, stream.read(buffer)).await else {
            tracing::debug!("read timeout");
            return Ok(());
        };

        let n = read?;
        if n == 0 {
            return Ok(());
        }

        conn.on_message(&buffer[..n], SystemTime::now(), outbox);

        if !outbox.data().is_empty() {
            timeout(limits.socket_write_timeout, stream.write_all(outbox.data())).await??;
        }

        let shutdown = outbox.is_shutdown();
        outbox.reset();

        if shutdown {
            let _ = stream.shutdown().await;
            return Ok(());
        }
    }
}

fn bind_listener(config: &ServerConfig) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(config.bind), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if config.reuse_port {
        socket.set_reuse_port(true)?;
    }
    #[cfg(not(unix))]
    if config.reuse_port {
        tracing::warn!("reuse_port is not supported on this platform");
    }

    socket.set_nonblocking(true)?;
    socket.bind(&config.bind.into())?;
    socket.listen(config.backlog)?;

    Ok(socket.into())
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;

//

/// Builder for [`HttpServer`].
///
/// Settings come from a [`ServerConfig`] (see [`config`](Self::config));
/// the `*_limits` methods and [`bind`](Self::bind) override single parts
/// of it. Routes whose path contains a `:name` segment are pattern routes,
/// all others are exact.
///
/// Registration problems (a bad pattern, an unresolvable address) are
/// reported by [`build`](Self::build).
pub struct ServerBuilder {
    config: ServerConfig,
    listener: Option<TcpListener>,
    router: Router,
    middleware: Vec<Arc<dyn Middleware>>,
    fallback: Option<Callback>,
    tls: Option<TlsContext>,
    sessions: Option<Arc<SessionManager>>,
    error: Option<Error>,
}

impl ServerBuilder {
    /// Replaces the whole configuration, typically one read with
    /// [`ServerConfig::load`].
    ///
    /// Call it first: it overrides earlier `bind` and `*_limits` calls.
    #[inline]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the listen address.
    pub fn bind(mut self, addr: impl ToSocketAddrs) -> Self {
        match addr.to_socket_addrs().map(|mut addrs| addrs.next()) {
            Ok(Some(addr)) => self.config.bind = addr,
            Ok(None) => self.fail(Error::Config("bind address resolved to nothing".into())),
            Err(err) => self.fail(err.into()),
        }
        self
    }

    /// Uses an already bound listener instead of binding `config.bind`.
    #[inline]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Registers `callback` for `method` on `path`.
    pub fn route<F>(mut self, method: Method, path: &str, callback: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(method, path, RouteTarget::Callback(Arc::new(callback)));
        self
    }

    /// Registers a handler object for `method` on `path`.
    pub fn handler(mut self, method: Method, path: &str, handler: Arc<dyn RouterHandler>) -> Self {
        self.add_route(method, path, RouteTarget::Handler(handler));
        self
    }

    pub fn get<F>(self, path: &str, callback: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Get, path, callback)
    }

    pub fn post<F>(self, path: &str, callback: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Post, path, callback)
    }

    pub fn put<F>(self, path: &str, callback: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Put, path, callback)
    }

    pub fn delete<F>(self, path: &str, callback: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Delete, path, callback)
    }

    /// Replaces the routes registered so far with a prepared router.
    #[inline]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Appends a middleware. `before` hooks run in the order added.
    ///
    /// CORS from the config file, if any, always runs first.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Answers requests no route matched (instead of `404 Not Found`).
    pub fn fallback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(callback));
        self
    }

    /// Serves HTTPS with `context`, overriding the `[tls]` config table.
    #[inline]
    pub fn tls(mut self, context: TlsContext) -> Self {
        self.tls = Some(context);
        self
    }

    /// Sweeps expired sessions of `manager` in the background.
    ///
    /// Handlers that use sessions capture a clone of the same `Arc`.
    #[inline]
    pub fn session_manager(mut self, manager: Arc<SessionManager>) -> Self {
        self.sessions = Some(manager);
        self
    }

    /// Configures the worker pool and overflow handling.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wirehttp::{HttpServer, limits::ServerLimits};
    ///
    /// let server = HttpServer::builder()
    ///     .bind("127.0.0.1:8080")
    ///     .server_limits(ServerLimits {
    ///         max_connections: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default()
    ///     })
    ///     .build();
    /// ```
    #[inline]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.config.limits.server = limits;
        self
    }

    /// Configures timeouts and per-connection budgets.
    #[inline]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.config.limits.connection = limits;
        self
    }

    /// Configures request size limits.
    #[inline]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.config.limits.request = limits;
        self
    }

    /// Configures response buffer reuse.
    #[inline]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.config.limits.response = limits;
        self
    }

    /// Validates the configuration, loads TLS material and binds the
    /// listener.
    ///
    /// # Errors
    ///
    /// The first route registration error, an invalid configuration, an
    /// unreadable certificate or key, or a bind failure.
    pub fn build(self) -> Result<HttpServer> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.config.validate()?;

        let tls = match (self.tls, &self.config.tls) {
            (Some(context), _) => Some(context),
            (None, Some(config)) => Some(TlsContext::from_config(config)?),
            (None, None) => None,
        };

        let sessions = self.sessions.or_else(|| {
            let config = self.config.session.clone()?;
            Some(Arc::new(SessionManager::new(
                Box::new(MemorySessionStorage::new()),
                config,
            )))
        });

        let mut chain = MiddlewareChain::new();
        if let Some(cors) = &self.config.cors {
            chain.add_middleware(Arc::new(CorsMiddleware::new(cors.clone())));
        }
        for middleware in self.middleware {
            chain.add_middleware(middleware);
        }

        let mut service = Service::new(self.router, chain)
            .with_json_errors(self.config.limits.server.json_errors);
        if let Some(fallback) = self.fallback {
            service = service.with_fallback(fallback);
        }

        let listener = match self.listener {
            Some(listener) => listener.into_std()?,
            None => bind_listener(&self.config)?,
        };
        let local_addr = listener.local_addr()?;

        let limits = self.config.limits;
        Ok(HttpServer {
            listener,
            local_addr,
            service: Arc::new(service),
            tls,
            sessions,

            server_limits: limits.server,
            conn_limits: limits.connection,
            req_limits: limits.request,
            resp_limits: limits.response,
        })
    }

    fn add_route(&mut self, method: Method, path: &str, target: RouteTarget) {
        if is_pattern(path) {
            if let Err(err) = self.router.push_pattern(method, path, target) {
                self.fail(err);
            }
        } else {
            self.router.insert_exact(method, path, target);
        }
    }

    fn fail(&mut self, err: Error) {
        self.error.get_or_insert(err);
    }
}

fn is_pattern(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with(':'))
}

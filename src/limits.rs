//! Server limits and timeouts
//!
//! Every limit struct implements [`Default`] and is meant to be used with
//! struct-update syntax, and every one of them can also be read from the
//! `[limits.*]` tables of a [config file](crate::config::ServerConfig).
//!
//! # Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Slowloris attacks
//! - Header flooding
//!
//! # Examples
//!
//! ```no_run
//! use wirehttp::{HttpServer, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! # async fn run() -> wirehttp::Result<()> {
//! HttpServer::builder()
//!     .bind("127.0.0.1:8080")
//!     .get("/", |_, resp| {
//!         resp.body("Hello world!");
//!         Ok(())
//!     })
//!     .server_limits(ServerLimits {
//!         max_connections: 5000, // Higher concurrency
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         socket_read_timeout: Duration::from_secs(5),
//!         max_requests_per_connection: 10_000,
//!         ..ConnLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         header_count: 32,      // More headers for complex APIs
//!         body_size: 64 * 1024,  // 64KB for larger payloads
//!         ..ReqLimits::default()
//!     })
//!     .build()?
//!     .launch()
//!     .await
//! # }
//! ```

use crate::config::{micros, secs};
use serde::Deserialize;
use std::time::Duration;

/// Controls server-level concurrency, queueing, and overload behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue has room? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [--------]   Yes   /-------------------------\   No   [------]
/// [ Worker ] <====== | Is there a free worker? | =====> [ Wait ]
/// [--------]         \-------------------------/        [------]
/// ```
///
/// A worker is an asynchronous task spawned once at launch. It loops
/// forever, taking connections from the shared queue and serving each one
/// until it closes, so a connection is owned by exactly one task for its
/// whole life.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerLimits {
    /// Number of worker tasks, i.e. connections served at once (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker (default: `250`).
    ///
    /// If the queue is full, new connections get an immediate
    /// `503 Service Unavailable` and are closed.
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue (default: `Sleep(50μs)`).
    pub wait_strategy: WaitStrategy,

    /// Tasks dedicated to answering overflow connections with `503` (default: `1`).
    ///
    /// Set to 0 to close overflow connections silently.
    pub count_503_handlers: usize,

    /// Format of error responses (default: `true`)
    ///
    /// If `true`, a malformed request gets:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// Connection: close\r
    /// Content-Type: application/json\r
    /// Content-Length: 55\r
    /// \r
    /// {"error":"invalid HTTP method","code":"INVALID_METHOD"}
    /// ```
    /// If `false`, the body is empty.
    pub json_errors: bool,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,

            _priv: (),
        }
    }
}

/// Strategy for worker tasks waiting when no connections are queued.
///
/// In a config file this is either `"yield"` or `{ sleep = 50 }`
/// (microseconds).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Waits with [`tokio::task::yield_now()`].
    ///
    /// Lowest latency, but keeps idle workers spinning on the CPU.
    Yield,

    /// Waits with [`tokio::time::sleep()`].
    Sleep(#[serde(deserialize_with = "micros")] Duration),
}

/// Connection-level limits and timeouts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnLimits {
    /// Maximum idle time waiting for bytes from the peer (default: `2 seconds`)
    ///
    /// The connection is closed when it expires. This is the main defense
    /// against stalled clients.
    #[serde(deserialize_with = "secs")]
    pub socket_read_timeout: Duration,

    /// Maximum duration of a single socket write (default: `3 seconds`)
    #[serde(deserialize_with = "secs")]
    pub socket_write_timeout: Duration,

    /// Maximum number of requests served on one connection (default: `100`)
    ///
    /// The response to the last allowed request carries `Connection: close`.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection (default: `2 minutes`)
    ///
    /// The first response written after this deadline carries
    /// `Connection: close`.
    #[serde(deserialize_with = "secs")]
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits
///
/// You MAY need to increase these if legitimate clients get:
/// - `413 Payload Too Large`
/// - `414 URI Too Long`
/// - `431 Request Header Fields Too Large`
///
/// Lines are checked while they are still incomplete, so a peer that never
/// sends a CRLF is rejected as soon as the line outgrows its limit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReqLimits {
    /// Maximum request line length in bytes, CRLF excluded (default: `8 KB`)
    ///
    /// Covers `METHOD SP TARGET SP VERSION`. Exceeding it yields `414`.
    pub request_line_size: usize,

    /// Maximum length of one header line in bytes, CRLF excluded (default: `8 KB`)
    ///
    /// Exceeding it yields `431`.
    pub header_line_size: usize,

    /// Maximum number of header lines (default: `64`)
    ///
    /// Counted before duplicates are merged. Exceeding it yields `431`.
    pub header_count: usize,

    /// Maximum declared `Content-Length` in bytes (default: `1 MB`)
    ///
    /// Exceeding it yields `413` before any body byte is read.
    pub body_size: usize,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            request_line_size: 8 * 1024,
            header_line_size: 8 * 1024,
            header_count: 64,
            body_size: 1024 * 1024,

            _priv: (),
        }
    }
}

/// Output buffer management.
///
/// Each connection keeps one output buffer that is reused between
/// responses:
/// ```rust
/// # use wirehttp::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<u8> = Vec::with_capacity(limits.default_capacity);
/// #
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RespLimits {
    /// Initial output buffer capacity (default: `1024 B`)
    pub default_capacity: usize,
    /// Capacity above which the buffer is reallocated after a flush (default: `8192 B`)
    pub max_capacity: usize,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}

impl RespLimits {
    #[inline]
    pub(crate) fn recycle(&self, buffer: &mut Vec<u8>) {
        if buffer.capacity() > self.max_capacity {
            *buffer = Vec::with_capacity(self.default_capacity);
        } else {
            buffer.clear();
        }
    }
}

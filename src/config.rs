//! File-based server configuration.
//!
//! Everything here can also be set in code through
//! [`HttpServer::builder()`](crate::HttpServer::builder); the TOML layer
//! only saves recompiling for deployment-specific values.
//!
//! ```toml
//! bind = "0.0.0.0:8443"
//! reuse_port = true
//! worker_threads = 4
//!
//! [limits.server]
//! max_connections = 500
//! wait_strategy = { sleep = 100 }
//!
//! [limits.connection]
//! socket_read_timeout = 5
//! connection_lifetime = 300
//!
//! [limits.request]
//! body_size = 65536
//!
//! [tls]
//! cert_file = "certs/server.crt"
//! key_file = "certs/server.key"
//! min_version = "1.3"
//!
//! [session]
//! ttl = 1800
//! secure = true
//!
//! [cors]
//! allowed_origins = ["https://app.example.com"]
//! allow_credentials = true
//! ```

use crate::{
    errors::{Error, Result},
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    middleware::cors::CorsConfig,
    session::SessionConfig,
    tls::TlsConfig,
};
use serde::{de, Deserialize, Deserializer};
use std::{fs, net::SocketAddr, path::Path, time::Duration};
use tokio::runtime::{Builder, Runtime};

/// Root of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address (default: `0.0.0.0:8080`).
    pub bind: SocketAddr,
    /// Sets `SO_REUSEPORT` on the listener so several processes can share it
    /// (default: `false`, ignored on platforms without it).
    pub reuse_port: bool,
    /// Listen backlog (default: `1024`).
    pub backlog: i32,
    /// Runtime threads; `None` means one per CPU core.
    pub worker_threads: Option<usize>,

    pub limits: Limits,

    pub tls: Option<TlsConfig>,
    pub session: Option<SessionConfig>,
    pub cors: Option<CorsConfig>,
}

/// The `[limits.*]` tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub server: ServerLimits,
    pub connection: ConnLimits,
    pub request: ReqLimits,
    pub response: RespLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            reuse_port: false,
            backlog: 1024,
            worker_threads: None,

            limits: Limits::default(),

            tls: None,
            session: None,
            cors: None,
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.limits.server;

        if server.max_connections == 0 {
            return Err(Error::Config("limits.server.max_connections must be > 0".into()));
        }
        if server.max_pending_connections == 0 {
            return Err(Error::Config("limits.server.max_pending_connections must be > 0".into()));
        }
        if self.limits.connection.max_requests_per_connection == 0 {
            return Err(Error::Config(
                "limits.connection.max_requests_per_connection must be > 0".into(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::Config("worker_threads must be > 0".into()));
        }
        if self.backlog <= 0 {
            return Err(Error::Config("backlog must be > 0".into()));
        }

        Ok(())
    }

    /// Builds the multi-threaded runtime the server is meant to run on.
    pub fn build_runtime(&self) -> Result<Runtime> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("wirehttp-worker");

        if let Some(threads) = self.worker_threads {
            builder.worker_threads(threads);
        }

        Ok(builder.build()?)
    }
}

/// Deserializes a duration given in (possibly fractional) seconds.
pub(crate) fn secs<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
}

/// Deserializes a duration given in whole microseconds.
pub(crate) fn micros<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_micros)
}

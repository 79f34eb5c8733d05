//! HTTPS on `https://localhost:8443` with the test certificate:
//!
//! ```sh
//! cargo run --example tls_server
//! curl -k https://localhost:8443/api/time -H 'Origin: https://app.example'
//! ```

use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;
use wirehttp::{config::ServerConfig, CorsConfig, HttpServer, TlsConfig, TlsVersion};

fn main() -> wirehttp::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig {
        bind: ([127, 0, 0, 1], 8443).into(),
        worker_threads: Some(2),
        tls: Some(TlsConfig {
            min_version: TlsVersion::Tls12,
            ..TlsConfig::new("testdata/localhost.crt", "testdata/localhost.key")
        }),
        cors: Some(CorsConfig {
            allowed_origins: vec!["https://app.example".to_string()],
            ..CorsConfig::default()
        }),
        ..ServerConfig::default()
    };
    let runtime = config.build_runtime()?;

    let server = HttpServer::builder()
        .config(config)
        .get("/api/time", |_, resp| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default();

            resp.content_type("application/json")
                .body(format!(r#"{{"unix": {secs}}}"#));
            Ok(())
        })
        .build()?;

    runtime.block_on(server.launch())
}

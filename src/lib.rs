//! wirehttp - embeddable HTTP/1.x server runtime
//!
//! The per-connection core is plain synchronous code over byte buffers:
//! bytes in, bytes out. A tokio driver ([`HttpServer`]) runs it on real
//! sockets, and anything else that can deliver bytes (a test, a different
//! event loop) can drive an [`HttpConnection`] through the [`Transport`]
//! trait.
//!
//! # Features
//!
//! - **Incremental parsing**: [`RequestParser`] accepts requests split at any
//!   byte boundary and pipelined requests in one buffer
//! - **Routing**: exact routes first, then `:name` patterns in registration
//!   order ([`Router`])
//! - **Middleware**: ordered `before` / `after` hooks with short-circuit
//!   ([`MiddlewareChain`]), CORS included ([`CorsMiddleware`])
//! - **Sessions**: cookie-identified, pluggable storage ([`SessionManager`])
//! - **TLS**: rustls driven over in-memory buffers ([`TlsConnection`]),
//!   so handshakes are testable without sockets
//! - **Isolation**: handler errors and panics become `500`, malformed
//!   requests get a `4xx` and a closed connection, nothing else is affected
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use wirehttp::HttpServer;
//!
//! #[tokio::main]
//! async fn main() -> wirehttp::Result<()> {
//!     HttpServer::builder()
//!         .bind("127.0.0.1:8080")
//!         .get("/", |_, resp| {
//!             resp.body("Hello World!");
//!             Ok(())
//!         })
//!         .build()?
//!         .launch()
//!         .await
//! }
//! ```
//! With a config file, HTTPS and middleware:
//! ```no_run
//! use wirehttp::{config::ServerConfig, CorsConfig, CorsMiddleware, HttpServer};
//!
//! fn main() -> wirehttp::Result<()> {
//!     let config = ServerConfig::load("server.toml")?;
//!     let runtime = config.build_runtime()?;
//!
//!     let server = HttpServer::builder()
//!         .config(config)
//!         .middleware(CorsMiddleware::new(CorsConfig::default()))
//!         .post("/api/echo", |req, resp| {
//!             resp.content_type("application/octet-stream").body(req.body().to_vec());
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     runtime.block_on(server.launch())
//! }
//! ```

pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub(crate) mod middleware;
pub(crate) mod router;
pub(crate) mod session;
pub(crate) mod tls;

pub mod config;
pub mod limits;

pub use crate::{
    errors::{BoxError, Error, HandlerResult, ParseError, Result},
    http::{
        query,
        request::{ParseState, Request, RequestParser},
        response::Response,
        types::{Headers, Method, StatusCode, Version},
    },
    middleware::{
        cors::{CorsConfig, CorsMiddleware},
        Flow, Middleware, MiddlewareChain,
    },
    router::{Callback, RouteTarget, Router, RouterHandler},
    server::{
        connection::{HttpConnection, Outbox, Service, Transport},
        server_impl::{HttpServer, ServerBuilder},
    },
    session::{MemorySessionStorage, Session, SessionConfig, SessionManager, SessionStorage},
    tls::{TlsConfig, TlsConnection, TlsContext, TlsError, TlsState, TlsVersion},
};

#[cfg(test)]
pub mod tools {
    use rustls::{
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::ring,
        pki_types::{CertificateDer, ServerName, UnixTime},
        ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme,
    };
    use std::{str::from_utf8, sync::Arc};

    pub const CERT: &[u8] = include_bytes!("../testdata/localhost.crt");
    pub const KEY: &[u8] = include_bytes!("../testdata/localhost.key");

    #[inline]
    pub fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    /// Accepts the self-signed test certificate.
    #[derive(Debug)]
    pub struct AcceptAny;

    impl ServerCertVerifier for AcceptAny {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }

    /// Client for `localhost` offering ALPN `http/1.1`.
    pub fn tls_client() -> ClientConnection {
        let mut config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAny))
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        ClientConnection::new(Arc::new(config), ServerName::try_from("localhost").unwrap()).unwrap()
    }
}

//! Cross-Origin Resource Sharing.

use super::{Flow, Middleware};
use crate::http::{
    request::Request,
    response::Response,
    types::{Method, StatusCode},
};
use serde::Deserialize;

/// CORS policy, usually read from the `[cors]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Exact origins allowed to make cross-origin requests; `"*"` allows any
    /// (default: `["*"]`).
    pub allowed_origins: Vec<String>,
    /// Sent as `Access-Control-Allow-Methods` on preflight
    /// (default: `GET, POST, PUT, DELETE, OPTIONS`).
    pub allowed_methods: Vec<String>,
    /// Sent as `Access-Control-Allow-Headers` on preflight
    /// (default: `Content-Type, Authorization`).
    pub allowed_headers: Vec<String>,
    /// Adds `Access-Control-Allow-Credentials: true` (default: `false`).
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds (default: `3600`).
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Content-Type", "Authorization"].map(String::from).to_vec(),
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

/// Adds CORS headers for allowed origins and answers preflight requests.
///
/// - No `Origin` header or an origin outside the allow-list: the request
///   passes through untouched and gets no CORS headers.
/// - `OPTIONS` from an allowed origin: answered with `204 No Content` and
///   the allow-methods / allow-headers / max-age headers; routing is skipped.
/// - Any other request from an allowed origin: routed normally, then
///   `Access-Control-Allow-Origin` (the request's origin) and `Vary: Origin`
///   are added to the response.
///
/// ```
/// use wirehttp::{CorsConfig, CorsMiddleware, Flow, Method, Middleware, Request, Response, Version};
///
/// let cors = CorsMiddleware::new(CorsConfig {
///     allowed_origins: vec!["https://app.example".into()],
///     ..CorsConfig::default()
/// });
///
/// let mut req = Request::new(Method::Options, "/api").with_header("Origin", "https://app.example");
/// let mut resp = Response::new(Version::Http11);
///
/// assert_eq!(cors.before(&mut req, &mut resp), Flow::Halt);
/// cors.after(&req, &mut resp);
/// assert_eq!(resp.header_value("Access-Control-Allow-Origin"), Some("https://app.example"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        self.config
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    fn allowed_origin<'r>(&self, req: &'r Request) -> Option<&'r str> {
        req.header("Origin").filter(|origin| self.is_origin_allowed(origin))
    }

    fn handle_preflight(&self, resp: &mut Response) {
        resp.status(StatusCode::NoContent)
            .header("Access-Control-Allow-Methods", self.config.allowed_methods.join(", "))
            .header("Access-Control-Allow-Headers", self.config.allowed_headers.join(", "));

        if let Some(max_age) = self.config.max_age {
            resp.header("Access-Control-Max-Age", max_age.to_string());
        }
    }
}

impl Middleware for CorsMiddleware {
    fn before(&self, req: &mut Request, resp: &mut Response) -> Flow {
        if req.method() != Method::Options {
            return Flow::Continue;
        }

        let Some(origin) = self.allowed_origin(req) else {
            tracing::debug!(origin = req.header("Origin"), "preflight from disallowed origin");
            return Flow::Continue;
        };

        tracing::trace!(origin, path = req.path(), "answering CORS preflight");
        self.handle_preflight(resp);
        Flow::Halt
    }

    fn after(&self, req: &Request, resp: &mut Response) {
        let Some(origin) = self.allowed_origin(req) else {
            return;
        };

        resp.header("Access-Control-Allow-Origin", origin)
            .header("Vary", "Origin");

        if self.config.allow_credentials {
            resp.header("Access-Control-Allow-Credentials", "true");
        }
    }
}

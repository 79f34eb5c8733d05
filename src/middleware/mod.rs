//! Ordered before/after hooks around routing.
//!
//! ```text
//!  request ──> A.before ──> B.before ──> router ──> B.after ──> A.after ──> response
//! ```
//!
//! A `before` hook may answer the request itself by filling in the response
//! and returning [`Flow::Halt`]. Routing and every later `before` hook are
//! skipped, but the `after` hooks of the middlewares that already ran (the
//! halting one included) still run, in reverse order.

pub mod cors;

use crate::http::{request::Request, response::Response};
use std::sync::Arc;

/// Whether processing continues after a `before` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The response is final; skip routing.
    Halt,
}

/// A request/response interceptor.
///
/// Both hooks default to doing nothing, so a middleware only implements
/// the side it cares about.
///
/// ```
/// use wirehttp::{Flow, Middleware, Request, Response, StatusCode};
///
/// struct RequireToken;
///
/// impl Middleware for RequireToken {
///     fn before(&self, req: &mut Request, resp: &mut Response) -> Flow {
///         if req.header("Authorization").is_some() {
///             return Flow::Continue;
///         }
///
///         resp.status(StatusCode::Unauthorized);
///         Flow::Halt
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    fn before(&self, _req: &mut Request, _resp: &mut Response) -> Flow {
        Flow::Continue
    }

    fn after(&self, _req: &Request, _resp: &mut Response) {}
}

/// Insertion-ordered list of middlewares.
///
/// Immutable once the server is built and shared by every connection.
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `before` hooks in insertion order until one halts.
    ///
    /// Returns the resulting flow and how many middlewares were entered;
    /// pass that count to [`process_after`](Self::process_after).
    pub fn process_before(&self, req: &mut Request, resp: &mut Response) -> (Flow, usize) {
        for (i, middleware) in self.middlewares.iter().enumerate() {
            if middleware.before(req, resp) == Flow::Halt {
                return (Flow::Halt, i + 1);
            }
        }

        (Flow::Continue, self.middlewares.len())
    }

    /// Runs `after` hooks of the first `entered` middlewares in reverse order.
    pub fn process_after(&self, entered: usize, req: &Request, resp: &mut Response) {
        let entered = entered.min(self.middlewares.len());

        for middleware in self.middlewares[..entered].iter().rev() {
            middleware.after(req, resp);
        }
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

//! Request routing: exact `(method, path)` lookup first, then pattern
//! routes in registration order.

use crate::{
    errors::{BoxError, Error, HandlerResult, Result},
    http::{request::Request, response::Response, types::Method},
};
use regex::Regex;
use std::{collections::HashMap, fmt, sync::Arc};

/// Object-style request handler.
///
/// Use it when a route needs state or several helper methods; for simple
/// routes a closure registered with
/// [`register_callback`](Router::register_callback) is enough.
///
/// ```
/// use wirehttp::{HandlerResult, Request, Response, RouterHandler};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// impl RouterHandler for Counter {
///     fn handle(&self, _: &Request, resp: &mut Response) -> HandlerResult {
///         let hits = self.0.fetch_add(1, Ordering::Relaxed) + 1;
///         resp.body(hits.to_string());
///         Ok(())
///     }
/// }
/// ```
pub trait RouterHandler: Send + Sync {
    fn handle(&self, req: &Request, resp: &mut Response) -> HandlerResult;
}

/// Closure-style request handler.
pub type Callback = Arc<dyn Fn(&Request, &mut Response) -> HandlerResult + Send + Sync>;

/// What a route is bound to.
#[derive(Clone)]
pub enum RouteTarget {
    Handler(Arc<dyn RouterHandler>),
    Callback(Callback),
}

impl RouteTarget {
    #[inline]
    pub(crate) fn invoke(&self, req: &Request, resp: &mut Response) -> HandlerResult {
        match self {
            RouteTarget::Handler(handler) => handler.handle(req, resp),
            RouteTarget::Callback(callback) => callback(req, resp),
        }
    }
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Handler(_) => f.write_str("Handler"),
            RouteTarget::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[derive(Debug)]
struct PatternRoute {
    method: Method,
    pattern: String,
    regex: Regex,
    names: Vec<String>,
    target: RouteTarget,
}

/// Maps `(method, path)` to handlers.
///
/// # Matching
///
/// 1. The exact table is checked first, so an exact route always beats a
///    pattern that would also match.
/// 2. Otherwise pattern routes are tried in registration order and the
///    first match wins.
///
/// # Patterns
///
/// A pattern is a path where a segment of the form `:name` matches any
/// non-empty segment (`[^/]+`). Everything else matches literally.
/// Captures are available through [`Request::path_param`] both as
/// `param1`, `param2`, ... (in capture order) and under their `:name`.
///
/// ```text
/// /users/:id              matches /users/42          param1 = id = "42"
/// /users/:id/posts/:post  matches /users/7/posts/9   param1 = id = "7", param2 = post = "9"
/// /files/v1.0/:name       does not match /files/v1x0/a   ('.' is literal)
/// ```
#[derive(Debug, Default)]
pub struct Router {
    exact: HashMap<Method, HashMap<String, RouteTarget>>,
    patterns: Vec<PatternRoute>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a handler object to an exact `(method, path)`. A second
    /// registration for the same key replaces the first.
    pub fn register_handler(&mut self, method: Method, path: &str, handler: Arc<dyn RouterHandler>) {
        self.insert_exact(method, path, RouteTarget::Handler(handler));
    }

    /// Binds a closure to an exact `(method, path)`.
    pub fn register_callback<F>(&mut self, method: Method, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert_exact(method, path, RouteTarget::Callback(Arc::new(callback)));
    }

    /// Appends a pattern route bound to a handler object.
    pub fn add_regex_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn RouterHandler>,
    ) -> Result<()> {
        self.push_pattern(method, pattern, RouteTarget::Handler(handler))
    }

    /// Appends a pattern route bound to a closure.
    pub fn add_regex_callback<F>(&mut self, method: Method, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.push_pattern(method, pattern, RouteTarget::Callback(Arc::new(callback)))
    }

    pub(crate) fn insert_exact(&mut self, method: Method, path: &str, target: RouteTarget) {
        self.exact
            .entry(method)
            .or_default()
            .insert(path.to_string(), target);
    }

    pub(crate) fn push_pattern(&mut self, method: Method, pattern: &str, target: RouteTarget) -> Result<()> {
        let (regex, names) = compile_pattern(pattern)?;

        self.patterns.push(PatternRoute {
            method,
            pattern: pattern.to_string(),
            regex,
            names,
            target,
        });
        Ok(())
    }

    /// Dispatches `req` to the matching route.
    ///
    /// Returns `Ok(false)` when nothing matched (the caller answers `404`)
    /// and the handler's error when it failed.
    pub fn route(&self, req: &mut Request, resp: &mut Response) -> std::result::Result<bool, BoxError> {
        if let Some(target) = self
            .exact
            .get(&req.method())
            .and_then(|paths| paths.get(req.path()))
        {
            target.invoke(req, resp)?;
            return Ok(true);
        }

        let matched = self.patterns.iter().find_map(|route| {
            if route.method != req.method() {
                return None;
            }
            route.regex.captures(req.path()).map(|caps| (route, caps))
        });

        let Some((route, captures)) = matched else {
            return Ok(false);
        };

        let values: Vec<String> = captures
            .iter()
            .skip(1)
            .map(|capture| capture.map_or_else(String::new, |m| m.as_str().to_string()))
            .collect();

        req.clear_path_params();
        for (name, value) in route.names.iter().zip(&values) {
            req.set_path_param(name.clone(), value.clone());
        }
        // Positional keys go last so a `:paramN` name cannot shadow them
        for (i, value) in values.into_iter().enumerate() {
            req.set_path_param(format!("param{}", i + 1), value);
        }

        tracing::trace!(pattern = %route.pattern, path = req.path(), "pattern route matched");

        route.target.invoke(req, resp)?;
        Ok(true)
    }

    /// Number of registered routes, exact and pattern.
    pub fn len(&self) -> usize {
        self.exact.values().map(HashMap::len).sum::<usize>() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>)> {
    let invalid = |reason: &str| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if !pattern.starts_with('/') {
        return Err(invalid("pattern must start with '/'"));
    }

    let mut names: Vec<String> = Vec::new();
    let mut source = String::with_capacity(pattern.len() * 2);
    source.push('^');

    for (i, segment) in pattern.split('/').enumerate() {
        if i > 0 {
            source.push('/');
        }

        match segment.strip_prefix(':') {
            Some("") => return Err(invalid("empty parameter name")),
            Some(name) => {
                if names.iter().any(|n| n == name) {
                    return Err(invalid("duplicate parameter name"));
                }
                names.push(name.to_string());
                source.push_str("([^/]+)");
            }
            None => source.push_str(&regex::escape(segment)),
        }
    }

    source.push('$');

    let regex = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;
    Ok((regex, names))
}

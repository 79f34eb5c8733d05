//! Cookie-identified server-side sessions.
//!
//! A [`SessionManager`] is created once, shared through an `Arc` and
//! captured by the handlers that need it:
//!
//! ```
//! use wirehttp::{Method, Request, Response, SessionManager, Version};
//! use std::sync::Arc;
//!
//! let sessions = Arc::new(SessionManager::in_memory());
//!
//! let visit = {
//!     let sessions = sessions.clone();
//!     move |req: &Request, resp: &mut Response| {
//!         let mut session = sessions.get_session(req, resp);
//!         let visits = session.get("visits").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0) + 1;
//!         session.set("visits", visits.to_string());
//!         sessions.update_session(&session);
//!         resp.body(visits.to_string());
//!     }
//! };
//!
//! let mut resp = Response::new(Version::Http11);
//! visit(&Request::new(Method::Get, "/"), &mut resp);
//! assert!(resp.header_value("Set-Cookie").unwrap().starts_with("sessionId="));
//! ```

mod storage;

pub use storage::{MemorySessionStorage, SessionStorage};

use crate::{
    config::secs,
    http::{request::Request, response::Response},
};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A session: an id plus string key/value data with a sliding expiry.
///
/// Values returned by the manager are copies. Changes become visible to
/// later requests only after [`SessionManager::update_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    created_at: Instant,
    last_accessed: Instant,
    max_age: Duration,
    data: HashMap<String, String>,
}

impl Session {
    pub fn new(id: String, max_age: Duration) -> Self {
        let now = Instant::now();

        Self {
            id,
            created_at: now,
            last_accessed: now,
            max_age,
            data: HashMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub const fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    #[inline]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    #[inline]
    pub fn set_max_age(&mut self, max_age: Duration) {
        self.max_age = max_age;
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    #[inline]
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.data.remove(key)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    #[inline]
    pub const fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    /// A session expires `max_age` after its last access.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_accessed) > self.max_age
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    pub fn refresh(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Session settings, usually read from the `[session]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Cookie carrying the session id (default: `sessionId`).
    pub cookie_name: String,
    /// Idle time after which a session expires, in seconds in the config
    /// file (default: `1 hour`).
    #[serde(deserialize_with = "secs")]
    pub ttl: Duration,
    /// How often the server purges expired sessions (default: `60 seconds`).
    #[serde(deserialize_with = "secs")]
    pub sweep_interval: Duration,
    /// Adds `Secure` to the cookie (default: `false`).
    pub secure: bool,
    /// Adds `Max-Age=<ttl>` so the cookie survives browser restarts (default: `false`).
    pub persistent: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sessionId".to_string(),
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            secure: false,
            persistent: false,
        }
    }
}

/// Resolves, creates and persists sessions over a [`SessionStorage`].
pub struct SessionManager {
    storage: Box<dyn SessionStorage>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(storage: Box<dyn SessionStorage>, config: SessionConfig) -> Self {
        Self { storage, config }
    }

    /// Manager over a fresh [`MemorySessionStorage`] with default settings.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemorySessionStorage::new()), SessionConfig::default())
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the request's session, creating one when needed.
    ///
    /// A live session named by the request cookie is refreshed, written back
    /// and returned. Otherwise (no cookie, unknown id or expired session) a
    /// new session with a random 128-bit id is stored and its cookie is set
    /// on `resp`.
    pub fn get_session(&self, req: &Request, resp: &mut Response) -> Session {
        let cookie = req
            .header("Cookie")
            .and_then(|header| cookie_value(header, &self.config.cookie_name));

        if let Some(id) = cookie {
            match self.storage.load(id) {
                Some(mut session) if !session.is_expired() => {
                    session.refresh();
                    self.storage.save(session.clone());
                    return session;
                }
                Some(_) => {
                    debug!(session = id, "session expired, replacing");
                    self.storage.remove(id);
                }
                None => debug!(session = id, "unknown session id"),
            }
        }

        let session = Session::new(generate_session_id(), self.config.ttl);
        self.storage.save(session.clone());
        self.set_session_cookie(session.id(), resp);

        session
    }

    /// Writes a modified session back to storage.
    pub fn update_session(&self, session: &Session) {
        self.storage.save(session.clone());
    }

    pub fn destroy_session(&self, id: &str) {
        self.storage.remove(id);
    }

    /// Purges expired sessions, returning how many were removed.
    pub fn clean_expired_sessions(&self) -> usize {
        let removed = self.storage.purge_expired(Instant::now());

        if removed > 0 {
            info!(removed, "expired sessions purged");
        }
        removed
    }

    /// Runs [`clean_expired_sessions`](Self::clean_expired_sessions) every
    /// `sweep_interval` on the current tokio runtime.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.sweep_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                self.clean_expired_sessions();
            }
        })
    }

    fn set_session_cookie(&self, id: &str, resp: &mut Response) {
        let mut cookie = format!("{}={id}; Path=/; HttpOnly", self.config.cookie_name);

        if self.config.persistent {
            cookie.push_str(&format!("; Max-Age={}", self.config.ttl.as_secs()));
        }
        if self.config.secure {
            cookie.push_str("; Secure");
        }

        resp.header("Set-Cookie", cookie);
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[inline]
fn generate_session_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, Version};

    fn cookie_of(resp: &Response) -> String {
        let header = resp.header_value("Set-Cookie").unwrap();
        header.split(';').next().unwrap().to_string()
    }

    #[test]
    fn new_session_sets_cookie() {
        let manager = SessionManager::in_memory();
        let mut resp = Response::new(Version::Http11);

        let session = manager.get_session(&Request::new(Method::Get, "/"), &mut resp);

        assert_eq!(session.id().len(), 32);
        assert!(session.id().bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(
            resp.header_value("Set-Cookie"),
            Some(format!("sessionId={}; Path=/; HttpOnly", session.id()).as_str())
        );
    }

    #[test]
    fn existing_session_is_reused() {
        let manager = SessionManager::in_memory();

        let mut resp = Response::new(Version::Http11);
        let mut session = manager.get_session(&Request::new(Method::Get, "/"), &mut resp);
        session.set("user", "alice");
        manager.update_session(&session);

        let req = Request::new(Method::Get, "/").with_header("Cookie", &format!("theme=dark; {}", cookie_of(&resp)));
        let mut resp = Response::new(Version::Http11);
        let again = manager.get_session(&req, &mut resp);

        assert_eq!(again.id(), session.id());
        assert_eq!(again.get("user"), Some("alice"));
        assert_eq!(resp.header_value("Set-Cookie"), None);
    }

    #[test]
    fn changes_need_update() {
        let manager = SessionManager::in_memory();

        let mut resp = Response::new(Version::Http11);
        let mut session = manager.get_session(&Request::new(Method::Get, "/"), &mut resp);
        session.set("unsaved", "1");

        let req = Request::new(Method::Get, "/").with_header("Cookie", &cookie_of(&resp));
        let again = manager.get_session(&req, &mut Response::new(Version::Http11));
        assert_eq!(again.get("unsaved"), None);
    }

    #[test]
    fn unknown_or_destroyed_session_is_replaced() {
        let manager = SessionManager::in_memory();

        let req = Request::new(Method::Get, "/").with_header("Cookie", "sessionId=deadbeef");
        let mut resp = Response::new(Version::Http11);
        let session = manager.get_session(&req, &mut resp);
        assert_ne!(session.id(), "deadbeef");

        manager.destroy_session(session.id());

        let req = Request::new(Method::Get, "/").with_header("Cookie", &cookie_of(&resp));
        let mut resp = Response::new(Version::Http11);
        let replaced = manager.get_session(&req, &mut resp);
        assert_ne!(replaced.id(), session.id());
        assert!(resp.header_value("Set-Cookie").is_some());
    }

    #[test]
    fn expired_session_is_replaced() {
        let config = SessionConfig {
            ttl: Duration::ZERO,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(Box::new(MemorySessionStorage::new()), config);

        let mut resp = Response::new(Version::Http11);
        let first = manager.get_session(&Request::new(Method::Get, "/"), &mut resp);
        std::thread::sleep(Duration::from_millis(5));

        let req = Request::new(Method::Get, "/").with_header("Cookie", &cookie_of(&resp));
        let second = manager.get_session(&req, &mut Response::new(Version::Http11));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn cookie_attributes() {
        let config = SessionConfig {
            cookie_name: "sid".to_string(),
            ttl: Duration::from_secs(120),
            secure: true,
            persistent: true,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(Box::new(MemorySessionStorage::new()), config);

        let mut resp = Response::new(Version::Http11);
        let session = manager.get_session(&Request::new(Method::Get, "/"), &mut resp);

        assert_eq!(
            resp.header_value("Set-Cookie"),
            Some(format!("sid={}; Path=/; HttpOnly; Max-Age=120; Secure", session.id()).as_str())
        );
    }

    #[test]
    fn sweep_removes_expired() {
        let config = SessionConfig {
            ttl: Duration::ZERO,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(Box::new(MemorySessionStorage::new()), config);

        for _ in 0..3 {
            manager.get_session(&Request::new(Method::Get, "/"), &mut Response::new(Version::Http11));
        }
        let mut keep = Session::new("keep".to_string(), Duration::from_secs(3600));
        keep.set("k", "v");
        manager.update_session(&keep);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(manager.clean_expired_sessions(), 3);
        assert_eq!(manager.clean_expired_sessions(), 0);
    }

    #[test]
    fn cookie_parsing() {
        #[rustfmt::skip]
        let cases = [
            ("sessionId=abc",                 Some("abc")),
            ("a=1; sessionId=abc; b=2",       Some("abc")),
            ("a=1;sessionId=abc",             Some("abc")),
            ("xsessionId=abc",                None),
            ("sessionId",                     None),
            ("",                              None),
        ];

        for (header, expected) in cases {
            assert_eq!(cookie_value(header, "sessionId"), expected, "{header:?}");
        }
    }

    #[test]
    fn session_expiry() {
        let session = Session::new("x".to_string(), Duration::from_secs(10));
        let start = session.last_accessed();

        assert!(!session.is_expired_at(start + Duration::from_secs(10)));
        assert!(session.is_expired_at(start + Duration::from_secs(11)));
    }
}

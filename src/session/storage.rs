use super::Session;
use dashmap::DashMap;
use std::time::Instant;

/// Backend that owns sessions between requests.
///
/// Implementations do their own locking: the manager calls them from every
/// worker task at once.
pub trait SessionStorage: Send + Sync {
    /// Inserts or replaces the session with the same id.
    fn save(&self, session: Session);

    /// Returns a copy of the stored session, expired or not.
    fn load(&self, id: &str) -> Option<Session>;

    fn remove(&self, id: &str);

    /// Removes every session expired at `now` and returns how many were removed.
    fn purge_expired(&self, now: Instant) -> usize;
}

/// In-process storage backed by a sharded concurrent map.
///
/// Sessions are lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn save(&self, session: Session) {
        self.sessions.insert(session.id().to_string(), session);
    }

    fn load(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    fn purge_expired(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn save_load_remove() {
        let storage = MemorySessionStorage::new();
        let mut session = Session::new("abc".to_string(), Duration::from_secs(60));
        session.set("user", "alice");

        storage.save(session.clone());
        assert_eq!(storage.load("abc"), Some(session.clone()));
        assert_eq!(storage.load("missing"), None);

        // Save replaces
        session.set("user", "bob");
        storage.save(session);
        assert_eq!(storage.load("abc").unwrap().get("user"), Some("bob"));
        assert_eq!(storage.len(), 1);

        storage.remove("abc");
        storage.remove("abc");
        assert!(storage.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let storage = MemorySessionStorage::new();
        storage.save(Session::new("short".to_string(), Duration::from_secs(1)));
        storage.save(Session::new("long".to_string(), Duration::from_secs(3600)));

        let later = Instant::now() + Duration::from_secs(10);
        assert_eq!(storage.purge_expired(later), 1);
        assert!(storage.load("short").is_none());
        assert!(storage.load("long").is_some());

        assert_eq!(storage.purge_expired(later), 0);
    }
}

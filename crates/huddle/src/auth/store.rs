//! Session and user profile stores.
//!
//! These sit behind traits so the in-memory versions can be swapped for a
//! shared store without touching the hub.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Maps session tokens to the user id that owns them.
pub trait SessionStore: Send + Sync {
    fn get(&self, session_key: &str) -> Option<String>;
    fn set(&self, session_key: &str, value: String);
    fn remove(&self, session_key: &str) -> Option<String>;
}

/// Profile information remembered for a logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Stores user profiles by id.
pub trait UserStore: Send + Sync {
    fn get(&self, user_id: &str) -> Option<UserProfile>;
    fn put(&self, profile: UserProfile);
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, String>,
}

impl MemorySessionStore {
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

impl SessionStore for MemorySessionStore {
    fn get(&self, session_key: &str) -> Option<String> {
        self.sessions.get(session_key).map(|v| v.value().clone())
    }

    fn set(&self, session_key: &str, value: String) {
        self.sessions.insert(session_key.to_string(), value);
    }

    fn remove(&self, session_key: &str) -> Option<String> {
        self.sessions.remove(session_key).map(|(_, v)| v)
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserProfile>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    fn get(&self, user_id: &str) -> Option<UserProfile> {
        self.users.get(user_id).map(|p| p.value().clone())
    }

    fn put(&self, profile: UserProfile) {
        self.users.insert(profile.id.clone(), profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_store_roundtrip() {
        let store = MemorySessionStore::new();
        assert!(store.get("abc").is_none());

        store.set("abc", "alice".to_string());
        assert_eq!(store.get("abc").as_deref(), Some("alice"));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove("abc").as_deref(), Some("alice"));
        assert!(store.remove("abc").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_user_store_overwrites_profile() {
        let store = MemoryUserStore::new();
        store.put(UserProfile {
            id: "u1".to_string(),
            name: "Alice".to_string(),
            email: "old@example.com".to_string(),
        });
        store.put(UserProfile {
            id: "u1".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
        });

        assert_eq!(store.get("u1").unwrap().email, "alice@example.com");
        assert!(store.get("u2").is_none());
    }
}

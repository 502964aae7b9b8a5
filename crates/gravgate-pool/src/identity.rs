use std::collections::HashMap;

use rand::Rng;
use tokio::sync::Mutex;

use crate::pool::now_ms;

const PROJECT_TTL_MS: i64 = 12 * 60 * 60 * 1000;
const SESSION_TTL_MS: i64 = 60 * 60 * 1000;

const ADJECTIVES: [&str; 5] = ["amber", "brisk", "calm", "dusky", "eager"];
const NOUNS: [&str; 5] = ["harbor", "meadow", "ridge", "spruce", "valley"];
const BASE36: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone)]
struct IdentityEntry {
    project_id: String,
    project_expires_ms: i64,
    session_id: String,
    session_expires_ms: i64,
}

/// Per-API-key derived upstream identity. The project id and session id
/// expire and renew independently; renewing one never touches the other.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: Mutex<HashMap<String, IdentityEntry>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, api_key: &str) -> (String, String) {
        self.get_with_now(api_key, now_ms()).await
    }

    async fn get_with_now(&self, api_key: &str, now: i64) -> (String, String) {
        let mut entries = self.entries.lock().await;
        entries.retain(|key, entry| {
            key == api_key || entry.project_expires_ms > now || entry.session_expires_ms > now
        });

        let entry = entries
            .entry(api_key.to_string())
            .or_insert_with(|| IdentityEntry {
                project_id: generate_project_id(),
                project_expires_ms: now + PROJECT_TTL_MS,
                session_id: generate_session_id(),
                session_expires_ms: now + SESSION_TTL_MS,
            });

        if entry.project_expires_ms <= now {
            entry.project_id = generate_project_id();
            entry.project_expires_ms = now + PROJECT_TTL_MS;
        }
        if entry.session_expires_ms <= now {
            entry.session_id = generate_session_id();
            entry.session_expires_ms = now + SESSION_TTL_MS;
        }

        (entry.project_id.clone(), entry.session_id.clone())
    }
}

fn generate_project_id() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let suffix: String = (0..5)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("{adjective}-{noun}-{suffix}")
}

/// The upstream protocol wants the decimal text of a negative 64-bit value.
fn generate_session_id() -> String {
    rand::rng().random_range(i64::MIN + 1..0).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_project_id_shape(project_id: &str) {
        let parts: Vec<&str> = project_id.split('-').collect();
        assert_eq!(parts.len(), 3, "unexpected shape: {project_id}");
        assert!(parts[0].chars().all(|c| c.is_ascii_lowercase()));
        assert!(parts[1].chars().all(|c| c.is_ascii_lowercase()));
        assert_eq!(parts[2].len(), 5);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[tokio::test]
    async fn project_and_session_have_required_shapes() {
        let cache = IdentityCache::new();
        let (project_id, session_id) = cache.get("key-1").await;
        assert_project_id_shape(&project_id);
        let value: i64 = session_id.parse().unwrap();
        assert!(value < 0);
    }

    #[tokio::test]
    async fn identity_is_stable_within_ttl() {
        let cache = IdentityCache::new();
        let first = cache.get_with_now("key-1", 0).await;
        let second = cache.get_with_now("key-1", 1_000).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn session_renews_without_touching_project() {
        let cache = IdentityCache::new();
        let (project, session) = cache.get_with_now("key-1", 0).await;
        let after = cache.get_with_now("key-1", SESSION_TTL_MS + 1).await;
        assert_eq!(after.0, project);
        assert_ne!(after.1, session);
    }

    #[tokio::test]
    async fn project_renews_without_touching_session() {
        let cache = IdentityCache::new();
        let (project, _) = cache.get_with_now("key-1", 0).await;
        // Keep the session fresh by touching the key before its TTL lapses.
        let mut now = 0;
        let mut last = (String::new(), String::new());
        while now <= PROJECT_TTL_MS {
            now += SESSION_TTL_MS - 1;
            last = cache.get_with_now("key-1", now).await;
        }
        assert_ne!(last.0, project);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_sessions() {
        let cache = IdentityCache::new();
        let a = cache.get("key-a").await;
        let b = cache.get("key-b").await;
        assert_ne!(a.1, b.1);
    }
}

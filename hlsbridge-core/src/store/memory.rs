use async_trait::async_trait;
use dashmap::DashMap;

use super::SessionStore;
use crate::error::Result;
use crate::models::RelaySessionState;

/// Process-local store; records vanish with the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, RelaySessionState>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, stream_id: &str) -> Result<Option<RelaySessionState>> {
        Ok(self.sessions.get(stream_id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, state: &RelaySessionState) -> Result<()> {
        self.sessions.insert(state.stream_id.clone(), state.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(id: &str) -> RelaySessionState {
        RelaySessionState::new(
            id.to_string(),
            "https://src/live.m3u8".to_string(),
            "key".to_string(),
            "up".to_string(),
            "https://dst/up".to_string(),
            16,
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemorySessionStore::new();
        assert!(store.load("s1").await.unwrap().is_none());

        let mut s1 = state("s1");
        store.save(&s1).await.unwrap();
        s1.record_transfer(0, "https://src/a.ts".to_string(), 10);
        store.save(&s1).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.next_byte_offset, 10);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_active_skips_stopped() {
        let store = MemorySessionStore::new();
        store.save(&state("b")).await.unwrap();
        store.save(&state("a")).await.unwrap();
        let mut stopped = state("c");
        stopped.mark_stopped(Utc::now());
        store.save(&stopped).await.unwrap();

        assert_eq!(store.list_active().await.unwrap(), vec!["a", "b"]);
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::errors::ServiceError;

/// Per-session key-value storage holding the cart and the pending promo.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, ServiceError>;
    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<(), ServiceError>;
    async fn delete(&self, session_id: &str, key: &str) -> Result<(), ServiceError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    entries: DashMap<(String, String), Value>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, ServiceError> {
        Ok(self
            .entries
            .get(&(session_id.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<(), ServiceError> {
        self.entries
            .insert((session_id.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, session_id: &str, key: &str) -> Result<(), ServiceError> {
        self.entries
            .remove(&(session_id.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        store.set("a", "cart", json!({"x": 1})).await.unwrap();

        assert_eq!(store.get("a", "cart").await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.get("b", "cart").await.unwrap(), None);

        store.delete("a", "cart").await.unwrap();
        assert_eq!(store.get("a", "cart").await.unwrap(), None);
    }
}

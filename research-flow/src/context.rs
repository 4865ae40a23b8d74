use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

/// Context for sharing typed data between the tasks of one session.
///
/// Values are stored as JSON so a session can be cloned, inspected and
/// persisted without knowing the concrete types each task writes.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl serde::Serialize) -> Result<()> {
        self.set_sync(key, value)
    }

    pub fn set_sync(&self, key: impl Into<String>, value: impl serde::Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Deep copy: the returned context no longer shares storage with `self`.
    pub fn snapshot(&self) -> Self {
        let data = DashMap::new();
        for entry in self.data.iter() {
            data.insert(entry.key().clone(), entry.value().clone());
        }
        Self {
            data: Arc::new(data),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn typed_roundtrip_and_snapshot_isolation() {
        let context = Context::new();
        context.set("count", 3u32).await.unwrap();

        let copy = context.snapshot();
        context.set("count", 4u32).await.unwrap();

        assert_eq!(context.get::<u32>("count").await, Some(4));
        assert_eq!(copy.get::<u32>("count").await, Some(3));
        assert_eq!(context.get::<String>("count").await, None);
    }
}

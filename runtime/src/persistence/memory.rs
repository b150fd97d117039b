use super::KeyValueStore;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Key-value store held in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_operations() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("a").await.unwrap(), None);

        kv.multi_set(vec![("a".into(), b"1".to_vec()), ("b".into(), b"2".to_vec())])
            .await
            .unwrap();
        let values = kv
            .multi_get(&["b".into(), "missing".into(), "a".into()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(b"2".to_vec()), None, Some(b"1".to_vec())]);

        kv.remove("a").await.unwrap();
        assert_eq!(kv.len(), 1);
        kv.clear().await.unwrap();
        assert!(kv.is_empty());
    }
}

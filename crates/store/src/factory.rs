use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlx::PgPool;

use crate::{DocumentStore, MemoryStore, PgDocumentStore, StoreError};

/// Where opened stores keep their documents.
#[derive(Clone)]
pub enum StoreBackend {
    /// Process-local, lost on exit. Used by tests and dry runs.
    Memory,
    Postgres(PgPool),
}

/// Opens document stores by name.
///
/// The backend is chosen once at construction. Opening the same name twice
/// returns the same store instance, so writers and the retriever share state
/// even on the memory backend.
pub struct StoreFactory {
    backend: StoreBackend,
    opened: Mutex<HashMap<String, Arc<dyn DocumentStore>>>,
}

impl StoreFactory {
    pub fn new(backend: StoreBackend) -> Self {
        Self {
            backend,
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory() -> Self {
        Self::new(StoreBackend::Memory)
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::new(StoreBackend::Postgres(pool))
    }

    /// Open (or reuse) the store called `name`.
    pub fn open(&self, name: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let mut opened = self
            .opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(store) = opened.get(name) {
            return Ok(store.clone());
        }

        let store: Arc<dyn DocumentStore> = match &self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new(name)),
            StoreBackend::Postgres(pool) => Arc::new(PgDocumentStore::new(pool.clone(), name)),
        };
        tracing::debug!(store = name, "Opened document store");
        opened.insert(name.to_string(), store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_returns_shared_instance() {
        let factory = StoreFactory::memory();
        let a = factory.open("campaigns").unwrap();
        let b = factory.open("campaigns").unwrap();

        let doc = serde_json::json!({"x": 1}).as_object().cloned().unwrap();
        a.upsert("doc", doc).await.unwrap();
        assert!(b.get("doc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stores_are_isolated_by_name() {
        let factory = StoreFactory::memory();
        let a = factory.open("one").unwrap();
        let b = factory.open("two").unwrap();

        let doc = serde_json::json!({"x": 1}).as_object().cloned().unwrap();
        a.upsert("doc", doc).await.unwrap();
        assert!(b.get("doc").await.unwrap().is_none());
    }

    #[test]
    fn test_blank_name_rejected() {
        let factory = StoreFactory::memory();
        assert!(matches!(factory.open("  "), Err(StoreError::InvalidName(_))));
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use courier_common::types::{Document, REV_FIELD};

use crate::{DocumentStore, Selector, StoreError, document_keys, next_revision};

/// In-process document store. Documents are kept ordered by `_id`.
pub struct MemoryStore {
    name: String,
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn put(&self, mut doc: Document) -> Result<String, StoreError> {
        let (id, rev) = document_keys(&doc)?;
        let mut docs = self.docs.write().await;

        let stored_rev = docs
            .get(&id)
            .and_then(|stored| stored.get(REV_FIELD))
            .and_then(Value::as_str);
        if stored_rev != rev.as_deref() {
            return Err(StoreError::Conflict { id });
        }

        let next = next_revision(stored_rev);
        doc.insert(REV_FIELD.to_string(), Value::String(next.clone()));
        docs.insert(id, doc);
        Ok(next)
    }

    async fn find(&self, selector: &Selector) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|doc| selector.matches(doc))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::revision_generation;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new("test");
        let rev = store.put(doc(json!({"_id": "a", "type": "contact"}))).await.unwrap();

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.get("_rev"), Some(&json!(rev)));
        assert_eq!(stored.get("type"), Some(&json!("contact")));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_with_stale_revision_conflicts() {
        let store = MemoryStore::new("test");
        let first = store.put(doc(json!({"_id": "a"}))).await.unwrap();
        store
            .put(doc(json!({"_id": "a", "_rev": first.clone(), "n": 1})))
            .await
            .unwrap();

        let err = store
            .put(doc(json!({"_id": "a", "_rev": first, "n": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_put_existing_without_revision_conflicts() {
        let store = MemoryStore::new("test");
        store.put(doc(json!({"_id": "a"}))).await.unwrap();
        let err = store.put(doc(json!({"_id": "a"}))).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_upsert_merges_top_level_fields() {
        let store = MemoryStore::new("test");
        store.upsert("a", doc(json!({"x": 1, "y": 1}))).await.unwrap();
        let rev = store.upsert("a", doc(json!({"y": 2, "z": 3}))).await.unwrap();

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.get("x"), Some(&json!(1)));
        assert_eq!(stored.get("y"), Some(&json!(2)));
        assert_eq!(stored.get("z"), Some(&json!(3)));
        assert_eq!(revision_generation(&rev), Some(2));
        assert_eq!(store.find(&Selector::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_ignores_patch_identity_fields() {
        let store = MemoryStore::new("test");
        store.upsert("a", doc(json!({"x": 1}))).await.unwrap();
        store
            .upsert("a", doc(json!({"_id": "b", "_rev": "99-zz", "x": 2})))
            .await
            .unwrap();

        assert!(store.get("b").await.unwrap().is_none());
        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.get("x"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_replace_drops_previous_fields() {
        let store = MemoryStore::new("test");
        store.upsert("a", doc(json!({"x": 1}))).await.unwrap();
        store.replace("a", doc(json!({"y": 2}))).await.unwrap();

        let stored = store.get("a").await.unwrap().unwrap();
        assert!(!stored.contains_key("x"));
        assert_eq!(stored.get("y"), Some(&json!(2)));
        assert_eq!(stored.get("_id"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_find_returns_matches_in_id_order() {
        let store = MemoryStore::new("test");
        for id in ["c", "a", "b"] {
            store.upsert(id, doc(json!({"type": "message"}))).await.unwrap();
        }
        store.upsert("d", doc(json!({"type": "contact"}))).await.unwrap();

        let found = store
            .find(&Selector::new().eq("type", "message"))
            .await
            .unwrap();
        let ids: Vec<_> = found
            .iter()
            .map(|d| d.get("_id").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}

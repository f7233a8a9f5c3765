//! Durable, revisioned document store.
//!
//! Documents are JSON objects keyed by `_id`. Every write produces a new `_rev`
//! (`"<generation>-<32 hex>"`); a `put` whose `_rev` does not match the stored
//! revision is rejected with [`StoreError::Conflict`]. `upsert` and `replace`
//! build on `put` with a read-merge-write loop that retries on conflict.

pub mod factory;
pub mod memory;
pub mod postgres;
pub mod selector;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Document, ID_FIELD, REV_FIELD};

pub use factory::{StoreBackend, StoreFactory};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use selector::Selector;

/// Attempts made by `upsert`/`replace` before giving up on a contended document.
const MAX_WRITE_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document update conflict: {id}")]
    Conflict { id: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid database name: {0:?}")]
    InvalidName(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err.to_string())
    }
}

/// A keyed, revisioned JSON document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name the store was opened with.
    fn name(&self) -> &str;

    /// Fetch a document (including `_id` and `_rev`).
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Write a document. The `_rev` must match the stored revision, or be absent
    /// for a new document. Returns the new revision.
    async fn put(&self, doc: Document) -> Result<String, StoreError>;

    /// All documents matching `selector`, in ascending `_id` order.
    async fn find(&self, selector: &Selector) -> Result<Vec<Document>, StoreError>;

    /// Merge `patch` into the current document (top-level keys), creating it if missing.
    async fn upsert(&self, id: &str, patch: Document) -> Result<String, StoreError> {
        self.write_with(id, &|current| {
            let mut doc = current.unwrap_or_default();
            for (key, value) in &patch {
                if key != ID_FIELD && key != REV_FIELD {
                    doc.insert(key.clone(), value.clone());
                }
            }
            doc
        })
        .await
    }

    /// Overwrite the whole body of a document, creating it if missing.
    async fn replace(&self, id: &str, body: Document) -> Result<String, StoreError> {
        self.write_with(id, &|_| {
            body.iter()
                .filter(|(key, _)| key.as_str() != ID_FIELD && key.as_str() != REV_FIELD)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .await
    }

    /// Read-modify-write loop shared by `upsert` and `replace`.
    async fn write_with(
        &self,
        id: &str,
        build: &(dyn Fn(Option<Document>) -> Document + Send + Sync),
    ) -> Result<String, StoreError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get(id).await?;
            let current_rev = current
                .as_ref()
                .and_then(|doc| doc.get(REV_FIELD))
                .cloned();

            let mut next = build(current);
            next.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            match current_rev {
                Some(rev) => next.insert(REV_FIELD.to_string(), rev),
                None => next.remove(REV_FIELD),
            };

            match self.put(next).await {
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(store = self.name(), id, attempt, "Write conflict, retrying");
                }
                other => return other,
            }
        }

        Err(StoreError::Conflict { id: id.to_string() })
    }
}

/// Split a document into its `_id` and `_rev`, validating both.
pub(crate) fn document_keys(doc: &Document) -> Result<(String, Option<String>), StoreError> {
    let id = match doc.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => {
            return Err(StoreError::InvalidDocument(
                "`_id` must be a non-empty string".to_string(),
            ));
        }
    };
    let rev = match doc.get(REV_FIELD) {
        None | Some(Value::Null) => None,
        Some(Value::String(rev)) => Some(rev.clone()),
        Some(_) => {
            return Err(StoreError::InvalidDocument("`_rev` must be a string".to_string()));
        }
    };
    Ok((id, rev))
}

/// Revision following `previous` (or the first revision).
pub(crate) fn next_revision(previous: Option<&str>) -> String {
    let generation = previous
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

/// Generation number of a revision string (`"3-abc"` → 3).
pub fn revision_generation(rev: &str) -> Option<u64> {
    rev.split_once('-').and_then(|(n, _)| n.parse().ok())
}

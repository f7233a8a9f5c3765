//! PostgreSQL-backed document store.
//!
//! Every logical database is a `db_name` partition of the `documents` table.
//! The body is stored as JSONB without `_id`/`_rev`, which live in their own
//! columns. Revision checks are done by the `WHERE rev = $n` guard of the
//! update, so concurrent writers observe conflicts instead of lost updates.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use courier_common::types::{Document, ID_FIELD, REV_FIELD};

use crate::{DocumentStore, Selector, StoreError, document_keys, next_revision};

pub struct PgDocumentStore {
    name: String,
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    fn to_document(id: String, rev: String, body: Value) -> Document {
        let mut doc = match body {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        doc.insert(ID_FIELD.to_string(), Value::String(id));
        doc.insert(REV_FIELD.to_string(), Value::String(rev));
        doc
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let row: Option<(String, Value)> =
            sqlx::query_as("SELECT rev, body FROM documents WHERE db_name = $1 AND id = $2")
                .bind(&self.name)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(rev, body)| Self::to_document(id.to_string(), rev, body)))
    }

    async fn put(&self, mut doc: Document) -> Result<String, StoreError> {
        let (id, rev) = document_keys(&doc)?;
        doc.remove(ID_FIELD);
        doc.remove(REV_FIELD);
        let body = Value::Object(doc);
        let next = next_revision(rev.as_deref());

        let result = match &rev {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (db_name, id, rev, body)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (db_name, id) DO NOTHING
                    "#,
                )
                .bind(&self.name)
                .bind(&id)
                .bind(&next)
                .bind(&body)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET rev = $3, body = $4, updated_at = NOW()
                    WHERE db_name = $1 AND id = $2 AND rev = $5
                    "#,
                )
                .bind(&self.name)
                .bind(&id)
                .bind(&next)
                .bind(&body)
                .bind(expected)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict { id });
        }

        Ok(next)
    }

    async fn find(&self, selector: &Selector) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<(String, String, Value)> = match selector.equality("type") {
            Some(doc_type) => {
                sqlx::query_as(
                    r#"
                    SELECT id, rev, body FROM documents
                    WHERE db_name = $1 AND body->>'type' = $2
                    ORDER BY id COLLATE "C"
                    "#,
                )
                .bind(&self.name)
                .bind(doc_type)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, rev, body FROM documents
                    WHERE db_name = $1
                    ORDER BY id COLLATE "C"
                    "#,
                )
                .bind(&self.name)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(id, rev, body)| Self::to_document(id, rev, body))
            .filter(|doc| selector.matches(doc))
            .collect())
    }
}

//! Profile and message operations against the remote API.
//!
//! Each operation issues at most two sequential API calls and writes exactly
//! one document. Remote failures are persisted as error-shaped records, never
//! returned; only a store failure fails the call.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    ContactDocument, ErroredPersistingMessage, FailureDetail, MessageContent, PersistingMessage,
    ProblemJson, Record,
};
use courier_store::DocumentStore;

use crate::gateway::ApiClient;

/// Seconds the remote service keeps trying to deliver a message.
pub const MESSAGE_TIME_TO_LIVE: u64 = 3600;

/// Result of a send: the record that was persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent(PersistingMessage),
    NotSent(ErroredPersistingMessage),
}

impl SendOutcome {
    pub fn id(&self) -> &str {
        match self {
            SendOutcome::Sent(message) => &message.id,
            SendOutcome::NotSent(message) => &message.id,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent(_))
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

pub struct CampaignOperations {
    api: ApiClient,
    store: Arc<dyn DocumentStore>,
}

impl CampaignOperations {
    pub fn new(api: ApiClient, store: Arc<dyn DocumentStore>) -> Self {
        Self { api, store }
    }

    /// Fetch a recipient's profile and persist it as a contact keyed by `code`.
    pub async fn profile_get_and_persist(
        &self,
        code: &str,
        batch_id: &str,
    ) -> Result<ContactDocument, AppError> {
        let response = self.api.get(&format!("profiles/{code}")).await;
        let contact = match response.decode::<Map<String, Value>>() {
            Ok(profile) => ContactDocument::found(code, batch_id, profile),
            Err(problem) => {
                tracing::warn!(
                    batch_id,
                    problem = %describe_problem(problem.as_ref()),
                    "Profile fetch failed"
                );
                ContactDocument::errored(code, batch_id, problem.as_ref())
            }
        };

        let doc = Record::Contact(contact.clone()).to_document();
        self.store.replace(code, doc).await?;
        Ok(contact)
    }

    /// Send `content` to `code` and persist the outcome.
    ///
    /// An accepted message is persisted under the remote id with its fetched
    /// detail, pending reconciliation. A refused one is persisted as `NOTSENT`
    /// under a local id derived from the batch, template, recipient and content.
    pub async fn message_post_and_persist(
        &self,
        code: &str,
        content: &MessageContent,
        template_id: &str,
        batch_id: &str,
    ) -> Result<SendOutcome, AppError> {
        let body = json!({
            "time_to_live": MESSAGE_TIME_TO_LIVE,
            "content": content,
        });

        let created = self
            .api
            .post(&format!("messages/{code}"), &body)
            .await
            .decode::<CreatedMessage>();

        let id = match created {
            Ok(created) => created.id,
            Err(problem) => {
                let reason = describe_problem(problem.as_ref());
                let errored = ErroredPersistingMessage {
                    id: errored_message_id(batch_id, template_id, code, content)?,
                    template_id: template_id.to_string(),
                    batch_id: batch_id.to_string(),
                    message: FailureDetail::new(Utc::now(), code, problem),
                };
                tracing::warn!(
                    id = %errored.id,
                    batch_id,
                    problem = %reason,
                    "Message not sent"
                );

                let doc = Record::ErroredMessage(errored.clone()).to_document();
                self.store.replace(&errored.id, doc).await?;
                return Ok(SendOutcome::NotSent(errored));
            }
        };

        let detail = match self
            .api
            .get(&format!("messages/{code}/{id}"))
            .await
            .decode::<Map<String, Value>>()
        {
            Ok(detail) => detail,
            Err(_) => {
                // Keep enough for the retriever to fetch the detail later
                tracing::warn!(id = %id, batch_id, "Message detail unavailable after send");
                pending_detail(&id, code)
            }
        };

        let message = PersistingMessage::new(id, template_id, batch_id, detail);
        let doc = Record::Message(message.clone()).to_document();
        self.store.replace(&message.id, doc).await?;

        tracing::info!(id = %message.id, batch_id, status = ?message.status(), "Message sent");
        Ok(SendOutcome::Sent(message))
    }
}

/// Deterministic id for a message the remote service refused.
///
/// The content is part of the name, so two different messages to the same
/// recipient in one batch keep separate records.
pub fn errored_message_id(
    batch_id: &str,
    template_id: &str,
    code: &str,
    content: &MessageContent,
) -> Result<String, AppError> {
    let name = format!("{batch_id}/{template_id}/{code}/{}", serde_json::to_string(content)?);
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string())
}

fn pending_detail(id: &str, code: &str) -> Map<String, Value> {
    let mut detail = Map::new();
    detail.insert("message".to_string(), json!({ "id": id, "fiscal_code": code }));
    detail
}

/// One-line summary of a failed response, for logging.
pub fn describe_problem(problem: Option<&ProblemJson>) -> String {
    match problem {
        Some(p) => format!(
            "{} {}",
            p.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            p.title.as_deref().or(p.detail.as_deref()).unwrap_or("")
        )
        .trim_end()
        .to_string(),
        None => "no response".to_string(),
    }
}

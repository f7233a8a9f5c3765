use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A raw JSON document as held by the document store (`_id`, `_rev` and body fields).
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";
pub const TYPE_FIELD: &str = "type";
pub const STATUS_FIELD: &str = "status";

const BATCH_ID_FIELD: &str = "batchId";
const TEMPLATE_ID_FIELD: &str = "templateId";
const RETRIEVED_FIELD: &str = "retrieved";
const MESSAGE_FIELD: &str = "message";
const SENDER_ALLOWED_FIELD: &str = "sender_allowed";

/// Discriminator stored in the `type` field of every persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Contact,
    Message,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Contact => "contact",
            RecordType::Message => "message",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message lifecycle status. Everything but `NotSent` is reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Accepted,
    Throttled,
    Failed,
    Processed,
    #[serde(rename = "NOTSENT")]
    NotSent,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 5] = [
        MessageStatus::Accepted,
        MessageStatus::Throttled,
        MessageStatus::Failed,
        MessageStatus::Processed,
        MessageStatus::NotSent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Accepted => "ACCEPTED",
            MessageStatus::Throttled => "THROTTLED",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Processed => "PROCESSED",
            MessageStatus::NotSent => "NOTSENT",
        }
    }

    /// Statuses after which the remote detail will never change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Failed | MessageStatus::NotSent)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload returned by the remote API (`application/problem+json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemJson {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Payment notice attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentData {
    /// Amount in euro cents
    pub amount: u64,
    pub notice_number: String,
}

/// Content of a message as accepted by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub subject: String,
    pub markdown: String,
    /// ISO-8601 UTC timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<PaymentData>,
}

/// Shape errors raised while decoding a persisted document into a [`Record`].
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown record type `{0}`")]
    UnknownType(String),
}

/// Profile half of a contact: either the fetched profile or the error shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactProfile {
    Found(Map<String, Value>),
    /// Persisted as `{sender_allowed: null, status}`; `status` is omitted when
    /// the response was absent.
    Errored { status: Option<u16> },
}

/// A campaign recipient's fetched profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactDocument {
    /// Recipient fiscal code
    pub id: String,
    pub batch_id: String,
    pub profile: ContactProfile,
}

impl ContactDocument {
    pub fn found(
        id: impl Into<String>,
        batch_id: impl Into<String>,
        profile: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            batch_id: batch_id.into(),
            profile: ContactProfile::Found(profile),
        }
    }

    pub fn errored(
        id: impl Into<String>,
        batch_id: impl Into<String>,
        problem: Option<&ProblemJson>,
    ) -> Self {
        Self {
            id: id.into(),
            batch_id: batch_id.into(),
            profile: ContactProfile::Errored {
                status: problem.and_then(|p| p.status),
            },
        }
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.profile, ContactProfile::Errored { .. })
    }

    /// Whether the recipient accepts messages from this sender. `None` for errored profiles.
    pub fn sender_allowed(&self) -> Option<bool> {
        match &self.profile {
            ContactProfile::Found(fields) => {
                fields.get(SENDER_ALLOWED_FIELD).and_then(Value::as_bool)
            }
            ContactProfile::Errored { .. } => None,
        }
    }
}

/// A message accepted by the remote service, pending or past reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistingMessage {
    /// Message id assigned by the remote service
    pub id: String,
    pub template_id: String,
    pub batch_id: String,
    /// Remote message detail (`message`, `notification`, `status`, ...)
    pub detail: Map<String, Value>,
    pub retrieved: Option<bool>,
}

impl PersistingMessage {
    pub fn new(
        id: impl Into<String>,
        template_id: impl Into<String>,
        batch_id: impl Into<String>,
        detail: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            template_id: template_id.into(),
            batch_id: batch_id.into(),
            detail,
            retrieved: None,
        }
    }

    /// Lifecycle status from the remote detail, if any.
    pub fn status(&self) -> Option<&str> {
        self.detail.get(STATUS_FIELD).and_then(Value::as_str)
    }

    /// `message.id` from the remote detail.
    pub fn message_id(&self) -> Option<&str> {
        self.message_field("id")
    }

    /// `message.fiscal_code` from the remote detail.
    pub fn fiscal_code(&self) -> Option<&str> {
        self.message_field("fiscal_code")
    }

    pub fn is_retrieved(&self) -> bool {
        self.retrieved == Some(true)
    }

    fn message_field(&self, key: &str) -> Option<&str> {
        self.detail
            .get(MESSAGE_FIELD)
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
    }
}

/// Failure detail embedded in the `message` field of an errored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub created_at: String,
    pub fiscal_code: String,
    #[serde(flatten)]
    pub problem: ProblemJson,
}

impl FailureDetail {
    pub fn new(
        created_at: DateTime<Utc>,
        fiscal_code: impl Into<String>,
        problem: Option<ProblemJson>,
    ) -> Self {
        Self {
            created_at: iso_timestamp(created_at),
            fiscal_code: fiscal_code.into(),
            problem: problem.unwrap_or_default(),
        }
    }
}

/// A message the remote service refused (or never answered). Always `status = "NOTSENT"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErroredPersistingMessage {
    /// Locally assigned id
    pub id: String,
    pub template_id: String,
    pub batch_id: String,
    pub message: FailureDetail,
}

/// A persisted record, discriminated by `type` and, for messages, by `status`.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Contact(ContactDocument),
    Message(PersistingMessage),
    ErroredMessage(ErroredPersistingMessage),
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Record::Contact(c) => &c.id,
            Record::Message(m) => &m.id,
            Record::ErroredMessage(m) => &m.id,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Contact(_) => RecordType::Contact,
            Record::Message(_) | Record::ErroredMessage(_) => RecordType::Message,
        }
    }

    /// Decode a stored document, validating its shape. `_rev` is ignored.
    pub fn from_document(doc: &Document) -> Result<Self, RecordError> {
        let id = required_str(doc, ID_FIELD)?.to_string();
        let kind = required_str(doc, TYPE_FIELD)?;

        match kind {
            "contact" => {
                let batch_id = optional_str(doc, BATCH_ID_FIELD)?.unwrap_or_default();
                let fields = body_fields(doc, &[ID_FIELD, REV_FIELD, TYPE_FIELD, BATCH_ID_FIELD]);
                Ok(Record::Contact(ContactDocument {
                    id,
                    batch_id,
                    profile: decode_profile(fields)?,
                }))
            }
            "message" => {
                let template_id = optional_str(doc, TEMPLATE_ID_FIELD)?.unwrap_or_default();
                let batch_id = optional_str(doc, BATCH_ID_FIELD)?.unwrap_or_default();

                let status = doc.get(STATUS_FIELD).and_then(Value::as_str);
                if status == Some(MessageStatus::NotSent.as_str()) {
                    let message = doc
                        .get(MESSAGE_FIELD)
                        .ok_or(RecordError::MissingField(MESSAGE_FIELD))?;
                    let message: FailureDetail = serde_json::from_value(message.clone())
                        .map_err(|_| RecordError::InvalidField {
                            field: MESSAGE_FIELD,
                            expected: "failure detail",
                        })?;
                    return Ok(Record::ErroredMessage(ErroredPersistingMessage {
                        id,
                        template_id,
                        batch_id,
                        message,
                    }));
                }

                let retrieved = match doc.get(RETRIEVED_FIELD) {
                    None | Some(Value::Null) => None,
                    Some(Value::Bool(b)) => Some(*b),
                    Some(_) => {
                        return Err(RecordError::InvalidField {
                            field: RETRIEVED_FIELD,
                            expected: "boolean",
                        });
                    }
                };
                let detail = body_fields(
                    doc,
                    &[
                        ID_FIELD,
                        REV_FIELD,
                        TYPE_FIELD,
                        TEMPLATE_ID_FIELD,
                        BATCH_ID_FIELD,
                        RETRIEVED_FIELD,
                    ],
                );
                Ok(Record::Message(PersistingMessage {
                    id,
                    template_id,
                    batch_id,
                    detail,
                    retrieved,
                }))
            }
            other => Err(RecordError::UnknownType(other.to_string())),
        }
    }

    /// Encode into a store document (without `_rev`).
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), Value::String(self.id().to_string()));
        doc.insert(
            TYPE_FIELD.to_string(),
            Value::String(self.record_type().as_str().to_string()),
        );

        match self {
            Record::Contact(contact) => {
                doc.insert(BATCH_ID_FIELD.to_string(), Value::String(contact.batch_id.clone()));
                match &contact.profile {
                    ContactProfile::Found(fields) => {
                        for (key, value) in fields {
                            if !is_reserved(key, &[BATCH_ID_FIELD]) {
                                doc.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    ContactProfile::Errored { status } => {
                        doc.insert(SENDER_ALLOWED_FIELD.to_string(), Value::Null);
                        if let Some(status) = status {
                            doc.insert(STATUS_FIELD.to_string(), Value::from(*status));
                        }
                    }
                }
            }
            Record::Message(message) => {
                for (key, value) in &message.detail {
                    if !is_reserved(key, &[TEMPLATE_ID_FIELD, BATCH_ID_FIELD, RETRIEVED_FIELD]) {
                        doc.insert(key.clone(), value.clone());
                    }
                }
                doc.insert(
                    TEMPLATE_ID_FIELD.to_string(),
                    Value::String(message.template_id.clone()),
                );
                doc.insert(BATCH_ID_FIELD.to_string(), Value::String(message.batch_id.clone()));
                if let Some(retrieved) = message.retrieved {
                    doc.insert(RETRIEVED_FIELD.to_string(), Value::Bool(retrieved));
                }
            }
            Record::ErroredMessage(message) => {
                doc.insert(
                    TEMPLATE_ID_FIELD.to_string(),
                    Value::String(message.template_id.clone()),
                );
                doc.insert(BATCH_ID_FIELD.to_string(), Value::String(message.batch_id.clone()));
                doc.insert(
                    STATUS_FIELD.to_string(),
                    Value::String(MessageStatus::NotSent.as_str().to_string()),
                );
                // FailureDetail only holds strings and integers
                let detail = serde_json::to_value(&message.message).unwrap_or(Value::Null);
                doc.insert(MESSAGE_FIELD.to_string(), detail);
            }
        }

        doc
    }
}

/// Format a timestamp the way the remote API does: UTC, millisecond precision, `Z` suffix.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_reserved(key: &str, extra: &[&str]) -> bool {
    key == ID_FIELD || key == REV_FIELD || key == TYPE_FIELD || extra.contains(&key)
}

fn body_fields(doc: &Document, reserved: &[&str]) -> Map<String, Value> {
    doc.iter()
        .filter(|(key, _)| !reserved.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn decode_profile(fields: Map<String, Value>) -> Result<ContactProfile, RecordError> {
    let error_shaped = matches!(fields.get(SENDER_ALLOWED_FIELD), Some(Value::Null))
        && fields
            .keys()
            .all(|k| k == SENDER_ALLOWED_FIELD || k == STATUS_FIELD);

    if !error_shaped {
        return Ok(ContactProfile::Found(fields));
    }

    let status = match fields.get(STATUS_FIELD) {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .ok_or(RecordError::InvalidField {
                    field: STATUS_FIELD,
                    expected: "HTTP status code",
                })?,
        ),
    };
    Ok(ContactProfile::Errored { status })
}

fn required_str<'a>(doc: &'a Document, field: &'static str) -> Result<&'a str, RecordError> {
    doc.get(field)
        .ok_or(RecordError::MissingField(field))?
        .as_str()
        .ok_or(RecordError::InvalidField {
            field,
            expected: "string",
        })
}

fn optional_str(doc: &Document, field: &'static str) -> Result<Option<String>, RecordError> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(RecordError::InvalidField {
            field,
            expected: "string",
        }),
    }
}

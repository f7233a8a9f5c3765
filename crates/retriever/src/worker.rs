//! Background reconciliation of sent messages.
//!
//! The worker runs as a spawned task fed by an `mpsc` inbox. Each
//! [`StartSignal`] triggers one pass over the named store: every message still
//! pending reconciliation has its remote detail fetched and merged in with
//! `retrieved = true`. A pass that completes emits one [`Completion`]; a pass
//! whose store cannot be opened or queried emits nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use futures::stream::FuturesOrdered;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use courier_common::error::AppError;
use courier_common::types::{
    Document, ID_FIELD, MessageStatus, Record, RecordType, STATUS_FIELD, TYPE_FIELD,
};
use courier_notifier::gateway::ApiClient;
use courier_notifier::operations::describe_problem;
use courier_store::{DocumentStore, Selector, StoreFactory};

const INBOX_CAPACITY: usize = 16;
const RETRIEVED_FIELD: &str = "retrieved";

/// Request for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSignal {
    /// Name of the document store to reconcile
    #[serde(rename = "dbName")]
    pub db_name: String,
    /// Base URL of the remote API
    pub url: String,
    /// Caller fields echoed back in the completion
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StartSignal {
    pub fn new(db_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            url: url.into(),
            extra: Map::new(),
        }
    }
}

/// The start payload, echoed back once its pass has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(flatten)]
    pub start: StartSignal,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub api_key: String,
    /// Messages fetched at once (default: 1, strictly sequential)
    pub concurrency: usize,
}

impl RetrieverConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub selected: usize,
    pub retrieved: usize,
    pub failed: usize,
}

enum ItemOutcome {
    Retrieved,
    Failed,
}

pub struct Retriever;

impl Retriever {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn spawn(
        factory: Arc<StoreFactory>,
        config: RetrieverConfig,
    ) -> Result<RetrieverHandle, AppError> {
        let api = ApiClient::new("", config.api_key)?;
        let concurrency = config.concurrency.max(1);

        let (inbox_tx, mut inbox) = mpsc::channel::<StartSignal>(INBOX_CAPACITY);
        let (completion_tx, completions) = mpsc::channel::<Completion>(INBOX_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::clone(&pending);

        let task = tokio::spawn(async move {
            tracing::info!(concurrency, "Retriever started");

            while let Some(signal) = inbox.recv().await {
                let api = api.with_base_url(&signal.url);
                let result = run_pass(&factory, &api, &signal, concurrency).await;
                // Settled before the completion is visible to the caller
                outstanding.fetch_sub(1, Ordering::SeqCst);

                match result {
                    Ok(report) => {
                        tracing::info!(
                            db_name = %signal.db_name,
                            selected = report.selected,
                            retrieved = report.retrieved,
                            failed = report.failed,
                            "Retrieval pass completed"
                        );
                        let completion = Completion {
                            start: signal,
                            completed: true,
                        };
                        if completion_tx.send(completion).await.is_err() {
                            tracing::debug!("Completion receiver dropped");
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            db_name = %signal.db_name,
                            error = %e,
                            "Retrieval pass failed"
                        );
                    }
                }
            }

            tracing::info!("Retriever stopped");
        });

        Ok(RetrieverHandle {
            inbox: inbox_tx,
            completions,
            pending,
            task,
        })
    }
}

/// Caller side of a running [`Retriever`].
pub struct RetrieverHandle {
    inbox: mpsc::Sender<StartSignal>,
    completions: mpsc::Receiver<Completion>,
    pending: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl RetrieverHandle {
    /// Queue a pass. Waits while the inbox is full.
    pub async fn start(&self, signal: StartSignal) -> Result<(), AppError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.inbox.send(signal).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            AppError::Gateway("retriever is not running".to_string())
        })
    }

    /// Passes queued or running, including ones that will fail and never
    /// signal completion.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// One [`Completion`] per successful pass, in order.
    pub fn completions(&mut self) -> &mut mpsc::Receiver<Completion> {
        &mut self.completions
    }

    /// Close the inbox and wait for the task to exit. A pass already running
    /// is finished, not cancelled; its completion is discarded.
    pub async fn shutdown(self) {
        let RetrieverHandle {
            inbox,
            completions,
            task,
            ..
        } = self;
        drop(inbox);
        drop(completions);

        if let Err(e) = task.await {
            tracing::error!(error = %e, "Retriever task panicked");
        }
    }
}

/// Messages still waiting for their remote detail: not yet retrieved and
/// not in a terminal status.
pub fn pending_selector() -> Selector {
    let terminal = MessageStatus::ALL
        .iter()
        .filter(|status| status.is_terminal())
        .map(MessageStatus::as_str);

    Selector::new()
        .eq(TYPE_FIELD, RecordType::Message.as_str())
        .nin(STATUS_FIELD, terminal)
        .ne(RETRIEVED_FIELD, true)
}

/// Run one pass over `signal.db_name`.
///
/// Per-item failures are logged and counted; the documents are left untouched
/// for the next pass. Only opening or querying the store fails the pass.
pub async fn run_pass(
    factory: &StoreFactory,
    api: &ApiClient,
    signal: &StartSignal,
    concurrency: usize,
) -> Result<PassReport, AppError> {
    let store = factory.open(&signal.db_name)?;
    let docs = store.find(&pending_selector()).await?;

    let mut report = PassReport {
        selected: docs.len(),
        ..Default::default()
    };
    tracing::debug!(
        db_name = %signal.db_name,
        selected = report.selected,
        "Starting retrieval pass"
    );

    let semaphore = Semaphore::new(concurrency.max(1));
    let store = store.as_ref();
    let mut items: FuturesOrdered<_> = docs
        .into_iter()
        .map(|doc| {
            let semaphore = &semaphore;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return ItemOutcome::Failed;
                };
                retrieve_one(api, store, doc).await
            }
        })
        .collect();

    while let Some(outcome) = items.next().await {
        match outcome {
            ItemOutcome::Retrieved => report.retrieved += 1,
            ItemOutcome::Failed => report.failed += 1,
        }
    }

    Ok(report)
}

async fn retrieve_one(api: &ApiClient, store: &dyn DocumentStore, doc: Document) -> ItemOutcome {
    let id = doc
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let message = match Record::from_document(&doc) {
        Ok(Record::Message(message)) => message,
        Ok(_) => {
            tracing::warn!(id = %id, "Skipping document that is not a pending message");
            return ItemOutcome::Failed;
        }
        Err(e) => {
            tracing::warn!(id = %id, error = %e, "Skipping malformed message document");
            return ItemOutcome::Failed;
        }
    };

    let (Some(code), Some(message_id)) = (message.fiscal_code(), message.message_id()) else {
        tracing::warn!(id = %id, "Message has no remote reference, skipping");
        return ItemOutcome::Failed;
    };

    let detail = match api
        .get(&format!("messages/{code}/{message_id}"))
        .await
        .decode::<Map<String, Value>>()
    {
        Ok(detail) => detail,
        Err(problem) => {
            tracing::warn!(
                id = %id,
                problem = %describe_problem(problem.as_ref()),
                "Message detail fetch failed, will retry on next pass"
            );
            return ItemOutcome::Failed;
        }
    };

    let mut patch = detail;
    patch.insert(RETRIEVED_FIELD.to_string(), Value::Bool(true));

    match store.upsert(&id, patch).await {
        Ok(_) => {
            tracing::debug!(id = %id, "Message detail retrieved");
            ItemOutcome::Retrieved
        }
        Err(e) => {
            tracing::warn!(id = %id, error = %e, "Failed to store message detail");
            ItemOutcome::Failed
        }
    }
}

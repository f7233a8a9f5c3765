//! Message detail reconciliation worker.

pub mod worker;

pub use worker::{
    Completion, PassReport, Retriever, RetrieverConfig, RetrieverHandle, StartSignal,
    pending_selector, run_pass,
};

//! Campaign delivery against the remote messaging API.
//!
//! - [`gateway`]: HTTP client and response classification
//! - [`operations`]: profile fetch and message send, each persisting one document
//! - [`campaign`]: CSV-driven batch sends

pub mod campaign;
pub mod gateway;
pub mod operations;

pub use campaign::{BatchReport, Campaign, RowOutcome, read_rows};
pub use gateway::{ApiClient, ApiResponse};
pub use operations::{CampaignOperations, SendOutcome};

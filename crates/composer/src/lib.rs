//! Message content composition for bulk campaigns.
//!
//! - [`template`]: maps CSV rows to named values and interpolates markdown templates
//! - [`content`]: validates and assembles [`MessageContent`](courier_common::types::MessageContent)
//! - [`validate`]: format checks for fiscal codes, notice numbers and amounts

pub mod content;
pub mod template;
pub mod validate;

pub use content::{ContentError, compose_content};
pub use template::{format_amount, interpolate, map_row};
pub use validate::{is_valid_fiscal_code, is_valid_notice_number, parse_payment_amount};

//! Message content composition.
//!
//! Subject and markdown are hard requirements: a violation fails the whole
//! composition. Due date and payment data are optional enrichment: anything
//! that does not validate is dropped and the message is sent without it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use courier_common::error::AppError;
use courier_common::types::{MessageContent, PaymentData, iso_timestamp};

use crate::validate::{api_len, is_valid_notice_number, parse_payment_amount};

pub const SUBJECT_MIN_LEN: usize = 10;
pub const SUBJECT_MAX_LEN: usize = 120;
pub const MARKDOWN_MIN_LEN: usize = 80;
pub const MARKDOWN_MAX_LEN: usize = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("subject must be 10 to 120 characters long, got {0}")]
    InvalidSubject(usize),

    #[error("markdown must be 80 to 10000 characters long, got {0}")]
    InvalidMarkdown(usize),
}

impl From<ContentError> for AppError {
    fn from(err: ContentError) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Build validated message content.
///
/// - `due_date` is parsed with the chrono pattern `due_date_format`; date-only
///   patterns resolve to midnight UTC.
/// - `payment_data` is attached only when both `amount` (cents) and
///   `notice_number` validate.
pub fn compose_content(
    subject: &str,
    markdown: &str,
    due_date: Option<&str>,
    due_date_format: &str,
    amount: Option<&str>,
    notice_number: Option<&str>,
) -> Result<MessageContent, ContentError> {
    let subject_len = api_len(subject);
    if !(SUBJECT_MIN_LEN..=SUBJECT_MAX_LEN).contains(&subject_len) {
        return Err(ContentError::InvalidSubject(subject_len));
    }

    let markdown_len = api_len(markdown);
    if !(MARKDOWN_MIN_LEN..=MARKDOWN_MAX_LEN).contains(&markdown_len) {
        return Err(ContentError::InvalidMarkdown(markdown_len));
    }

    let due_date = due_date.and_then(|raw| {
        let parsed = parse_due_date(raw, due_date_format);
        if parsed.is_none() && !raw.trim().is_empty() {
            tracing::debug!(
                due_date = raw,
                format = due_date_format,
                "Dropping unparseable due date"
            );
        }
        parsed
    });

    Ok(MessageContent {
        subject: subject.to_string(),
        markdown: markdown.to_string(),
        due_date,
        payment_data: payment_data(amount, notice_number),
    })
}

/// Parse a due date into an ISO-8601 UTC timestamp.
///
/// Tries the pattern as a date-time, then as a date, then falls back to RFC 3339.
pub fn parse_due_date(raw: &str, format: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed: DateTime<Utc> = if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
        dt.and_utc()
    } else if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
        date.and_hms_opt(0, 0, 0)?.and_utc()
    } else {
        DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc)
    };

    Some(iso_timestamp(parsed))
}

fn payment_data(amount: Option<&str>, notice_number: Option<&str>) -> Option<PaymentData> {
    let amount = parse_payment_amount(amount?)?;
    let notice_number = notice_number?.trim();
    if !is_valid_notice_number(notice_number) {
        return None;
    }

    Some(PaymentData {
        amount,
        notice_number: notice_number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBJECT: &str = "Payment reminder";

    fn markdown() -> String {
        "# Reminder\n\n".to_string() + &"Please pay the amount due before the deadline. ".repeat(3)
    }

    #[test]
    fn test_valid_content_keeps_exact_values() {
        let md = markdown();
        let content = compose_content(SUBJECT, &md, None, "%d/%m/%Y", None, None).unwrap();
        assert_eq!(content.subject, SUBJECT);
        assert_eq!(content.markdown, md);
        assert!(content.due_date.is_none());
        assert!(content.payment_data.is_none());
    }

    #[test]
    fn test_short_subject_fails() {
        let err = compose_content("Hi", &markdown(), None, "%d/%m/%Y", None, None).unwrap_err();
        assert_eq!(err, ContentError::InvalidSubject(2));
    }

    #[test]
    fn test_long_subject_fails() {
        let subject = "x".repeat(SUBJECT_MAX_LEN + 1);
        let err = compose_content(&subject, &markdown(), None, "%d/%m/%Y", None, None).unwrap_err();
        assert_eq!(err, ContentError::InvalidSubject(121));
    }

    #[test]
    fn test_subject_bounds_inclusive() {
        let md = markdown();
        assert!(compose_content(&"x".repeat(10), &md, None, "", None, None).is_ok());
        assert!(compose_content(&"x".repeat(120), &md, None, "", None, None).is_ok());
    }

    #[test]
    fn test_short_markdown_fails() {
        let err = compose_content(SUBJECT, "too short", None, "%d/%m/%Y", None, None).unwrap_err();
        assert_eq!(err, ContentError::InvalidMarkdown(9));
    }

    #[test]
    fn test_huge_markdown_fails() {
        let md = "x".repeat(MARKDOWN_MAX_LEN + 1);
        assert!(matches!(
            compose_content(SUBJECT, &md, None, "%d/%m/%Y", None, None),
            Err(ContentError::InvalidMarkdown(_))
        ));
    }

    fn with_due_date(raw: &str, format: &str) -> MessageContent {
        compose_content(SUBJECT, &markdown(), Some(raw), format, None, None).unwrap()
    }

    #[test]
    fn test_due_date_parsed_with_format() {
        let content = with_due_date("31/01/2019", "%d/%m/%Y");
        assert_eq!(content.due_date.as_deref(), Some("2019-01-31T00:00:00.000Z"));
    }

    #[test]
    fn test_due_date_with_time() {
        let content = compose_content(
            SUBJECT,
            &markdown(),
            Some("2019-01-31 18:30"),
            "%Y-%m-%d %H:%M",
            None,
            None,
        )
        .unwrap();
        assert_eq!(content.due_date.as_deref(), Some("2019-01-31T18:30:00.000Z"));
    }

    #[test]
    fn test_invalid_due_date_is_omitted() {
        let content = with_due_date("31/13/2019", "%d/%m/%Y");
        assert!(content.due_date.is_none());

        let content = with_due_date("", "%d/%m/%Y");
        assert!(content.due_date.is_none());
    }

    #[test]
    fn test_payment_data_requires_both_fields() {
        let md = markdown();
        let notice = "012345678901234567";

        let content = compose_content(SUBJECT, &md, None, "", Some("1250"), Some(notice)).unwrap();
        assert_eq!(
            content.payment_data,
            Some(PaymentData {
                amount: 1250,
                notice_number: notice.to_string(),
            })
        );

        let content = compose_content(SUBJECT, &md, None, "", Some("1250"), None).unwrap();
        assert!(content.payment_data.is_none());

        let content = compose_content(SUBJECT, &md, None, "", None, Some(notice)).unwrap();
        assert!(content.payment_data.is_none());
    }

    #[test]
    fn test_invalid_payment_data_is_omitted() {
        let md = markdown();
        let content =
            compose_content(SUBJECT, &md, None, "", Some("0"), Some("012345678901234567")).unwrap();
        assert!(content.payment_data.is_none());

        let content = compose_content(SUBJECT, &md, None, "", Some("100"), Some("999")).unwrap();
        assert!(content.payment_data.is_none());
    }

    #[test]
    fn test_validation_error_maps_to_app_error() {
        let err: AppError = ContentError::InvalidSubject(1).into();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

//! Campaign batch driver: one templated message per CSV row.

use std::io::Read;

use courier_common::error::AppError;
use courier_composer::{compose_content, interpolate, is_valid_fiscal_code, map_row};

use crate::operations::{CampaignOperations, SendOutcome};

const FISCAL_CODE_COLUMN: &str = "fiscal_code";
const AMOUNT_COLUMN: &str = "amount";
const NOTICE_NUMBER_COLUMN: &str = "notice_number";
const DUE_DATE_COLUMN: &str = "due_date";

/// Outcome of one CSV row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Sent { row: usize, id: String },
    NotSent { row: usize, id: String },
    /// Nothing was written for this row.
    Rejected { row: usize, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<RowOutcome>,
    pub sent: usize,
    pub not_sent: usize,
    pub rejected: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: RowOutcome) {
        match &outcome {
            RowOutcome::Sent { .. } => self.sent += 1,
            RowOutcome::NotSent { .. } => self.not_sent += 1,
            RowOutcome::Rejected { .. } => self.rejected += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Documents written by the batch.
    pub fn written(&self) -> usize {
        self.sent + self.not_sent
    }
}

/// A message template sent to every row of a recipient list.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub subject: String,
    pub markdown: String,
    pub template_id: String,
    pub batch_id: String,
    /// chrono pattern for the rows' `due_date` column
    pub due_date_format: String,
}

impl Campaign {
    /// Send one message per row, sequentially.
    ///
    /// Rows with a malformed fiscal code or content that fails validation are
    /// rejected without writing; every other row writes exactly one document.
    /// Only a store failure aborts the batch.
    pub async fn send(
        &self,
        ops: &CampaignOperations,
        rows: &[Vec<String>],
    ) -> Result<BatchReport, AppError> {
        let mut report = BatchReport::default();

        for (index, row) in rows.iter().enumerate() {
            let outcome = self.send_row(ops, index, row).await?;
            report.record(outcome);
        }

        tracing::info!(
            batch_id = %self.batch_id,
            template_id = %self.template_id,
            sent = report.sent,
            not_sent = report.not_sent,
            rejected = report.rejected,
            "Campaign batch finished"
        );
        Ok(report)
    }

    async fn send_row(
        &self,
        ops: &CampaignOperations,
        index: usize,
        row: &[String],
    ) -> Result<RowOutcome, AppError> {
        let values = map_row(Some(row));
        let column = |name: &str| values.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let Some(code) = column(FISCAL_CODE_COLUMN).filter(|c| is_valid_fiscal_code(c)) else {
            tracing::warn!(row = index, "Rejecting row with invalid fiscal code");
            return Ok(RowOutcome::Rejected {
                row: index,
                reason: "invalid fiscal code".to_string(),
            });
        };

        let subject = interpolate(&self.subject, Some(row));
        let markdown = interpolate(&self.markdown, Some(row));
        let content = match compose_content(
            &subject,
            &markdown,
            column(DUE_DATE_COLUMN),
            &self.due_date_format,
            column(AMOUNT_COLUMN),
            column(NOTICE_NUMBER_COLUMN),
        ) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(row = index, error = %e, "Rejecting row with invalid content");
                return Ok(RowOutcome::Rejected {
                    row: index,
                    reason: e.to_string(),
                });
            }
        };

        let outcome = ops
            .message_post_and_persist(code, &content, &self.template_id, &self.batch_id)
            .await?;

        Ok(match outcome {
            SendOutcome::Sent(message) => RowOutcome::Sent {
                row: index,
                id: message.id,
            },
            SendOutcome::NotSent(message) => RowOutcome::NotSent {
                row: index,
                id: message.id,
            },
        })
    }

    /// Fetch and persist the profile of every row's recipient.
    /// Returns the number of contacts written.
    pub async fn fetch_profiles(
        &self,
        ops: &CampaignOperations,
        rows: &[Vec<String>],
    ) -> Result<usize, AppError> {
        let mut written = 0;
        for row in rows {
            let values = map_row(Some(row.as_slice()));
            let code = values.get(FISCAL_CODE_COLUMN).map(|c| c.trim()).unwrap_or_default();
            if !is_valid_fiscal_code(code) {
                continue;
            }

            let contact = ops.profile_get_and_persist(code, &self.batch_id).await?;
            if contact.sender_allowed() == Some(false) {
                tracing::info!(
                    batch_id = %self.batch_id,
                    "Recipient does not accept messages from this sender"
                );
            }
            written += 1;
        }

        tracing::info!(batch_id = %self.batch_id, contacts = written, "Profiles fetched");
        Ok(written)
    }
}

/// Read campaign rows from CSV. The first line is a header and is skipped;
/// rows may have any number of columns.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<Vec<String>>, AppError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    csv.records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| AppError::Decode(format!("invalid CSV: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_rows_skips_header() {
        let input = "name,surname,fiscal_code\nMario,Rossi,RSSMRA80A01H501U\nAnna,Bianchi\n";
        let rows = read_rows(input.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["Mario", "Rossi", "RSSMRA80A01H501U"]);
        assert_eq!(rows[1], vec!["Anna", "Bianchi"]);
    }

    #[test]
    fn test_read_rows_quoted_markdown() {
        let input = "a,b\n\"Hello, world\",\"line1\nline2\"\n";
        let rows = read_rows(input.as_bytes()).unwrap();
        assert_eq!(rows[0][0], "Hello, world");
        assert_eq!(rows[0][1], "line1\nline2");
    }

    #[test]
    fn test_batch_report_counts() {
        let mut report = BatchReport::default();
        report.record(RowOutcome::Sent { row: 0, id: "m1".to_string() });
        report.record(RowOutcome::NotSent { row: 1, id: "e1".to_string() });
        report.record(RowOutcome::Rejected { row: 2, reason: "x".to_string() });
        report.record(RowOutcome::Sent { row: 3, id: "m2".to_string() });

        assert_eq!(report.sent, 2);
        assert_eq!(report.not_sent, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.written(), 3);
        assert_eq!(report.outcomes.len(), 4);
    }
}

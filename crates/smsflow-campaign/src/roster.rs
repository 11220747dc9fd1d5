//! Recipient list parsing.
//!
//! Uploads are UTF-8 CSV with a mandatory header row and a mandatory
//! `phone_number` column. Every other column is retained verbatim as a
//! recipient field for template substitution. Rows whose phone number does
//! not normalize to E.164 are excluded from the sendable set but reported,
//! so the caller can decide whether to proceed with partial success.

use serde::Serialize;
use smsflow_core::Recipient;
use tracing::debug;

use crate::CampaignError;

pub const PHONE_COLUMN: &str = "phone_number";

/// One rejected data row, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRow {
    pub row: usize,
    pub phone_number: String,
    pub reason: String,
}

/// Parse result: the sendable set plus the validation report.
/// `recipients.len() + invalid_rows.len()` always equals the number of
/// data rows in the upload.
#[derive(Debug, Clone, Serialize)]
pub struct RosterReport {
    pub recipients: Vec<Recipient>,
    pub invalid_rows: Vec<InvalidRow>,
    pub columns: Vec<String>,
}

impl RosterReport {
    pub fn total_rows(&self) -> usize {
        self.recipients.len() + self.invalid_rows.len()
    }
}

/// Strip formatting characters and ensure a leading `+`, then check the
/// E.164 shape: `+` followed by 10-15 digits.
pub fn normalize_phone(raw: &str) -> Result<String, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if cleaned.is_empty() {
        return Err("empty phone number".to_string());
    }
    let candidate = if cleaned.starts_with('+') {
        cleaned
    } else {
        format!("+{cleaned}")
    };
    let digits = &candidate[1..];
    if digits.contains('+') {
        return Err("misplaced '+'".to_string());
    }
    if !(10..=15).contains(&digits.len()) {
        return Err(format!(
            "expected 10-15 digits after '+', got {}",
            digits.len()
        ));
    }
    Ok(candidate)
}

/// Parse an uploaded CSV into recipients.
///
/// Fails the whole upload when the header is missing the phone column or
/// the data row count exceeds `max_recipients`. Individual bad rows are
/// reported, not fatal.
pub fn parse_roster(bytes: &[u8], max_recipients: usize) -> Result<RosterReport, CampaignError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| CampaignError::Validation(format!("unreadable header row: {e}")))?
        .clone();
    let columns: Vec<String> = headers.iter().map(|h| h.to_string()).collect();

    let Some(phone_idx) = columns.iter().position(|c| c == PHONE_COLUMN) else {
        return Err(CampaignError::Validation(format!(
            "missing required column '{PHONE_COLUMN}' (found: {})",
            columns.join(", ")
        )));
    };

    let mut recipients = Vec::new();
    let mut invalid_rows = Vec::new();
    let mut row_number = 0usize;

    for record in reader.records() {
        let record =
            record.map_err(|e| CampaignError::Validation(format!("unreadable row: {e}")))?;
        row_number += 1;
        if row_number > max_recipients {
            return Err(CampaignError::LimitExceeded {
                count: row_number,
                limit: max_recipients,
            });
        }

        let raw_phone = record.get(phone_idx).unwrap_or_default();
        match normalize_phone(raw_phone) {
            Ok(phone_number) => {
                let mut recipient = Recipient::new(phone_number);
                for (idx, column) in columns.iter().enumerate() {
                    if idx == phone_idx {
                        continue;
                    }
                    if let Some(value) = record.get(idx) {
                        recipient.fields.insert(column.clone(), value.to_string());
                    }
                }
                recipients.push(recipient);
            }
            Err(reason) => invalid_rows.push(InvalidRow {
                row: row_number,
                phone_number: raw_phone.to_string(),
                reason,
            }),
        }
    }

    debug!(
        valid = recipients.len(),
        invalid = invalid_rows.len(),
        "roster parsed"
    );
    Ok(RosterReport {
        recipients,
        invalid_rows,
        columns,
    })
}

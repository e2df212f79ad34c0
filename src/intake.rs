//! Extracts lookup keys from an uploaded CSV file.

use crate::error::LookupError;

/// Header of the column carrying the keys. Matched case-sensitively.
pub const KEY_COLUMN: &str = "MC_NUMBER";

/// Reads the `MC_NUMBER` column, skipping blank cells. Empty results are
/// left for the orchestrator to reject.
pub fn keys_from_csv(bytes: &[u8]) -> Result<Vec<String>, LookupError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == KEY_COLUMN)
        .ok_or_else(|| {
            LookupError::Validation(format!("CSV must contain a {KEY_COLUMN} column"))
        })?;

    let mut keys = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(column) {
            let value = value.trim();
            if !value.is_empty() {
                keys.push(value.to_string());
            }
        }
    }
    Ok(keys)
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Sentinel stored in a record field that could not be located on the page.
pub const NOT_FOUND: &str = "NOT FOUND";

/// The seven steps of the per-key retrieval protocol.
///
/// Each key flows through:
/// NAVIGATE_HOME → SELECT_SEARCH_MODE → ENTER_KEY → SUBMIT →
/// SHORT_CIRCUIT_CHECK → VERIFY_STATUS → EXTRACT_RECORD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolStep {
    NavigateHome,
    SelectSearchMode,
    EnterKey,
    Submit,
    ShortCircuitCheck,
    VerifyStatus,
    ExtractRecord,
}

impl ProtocolStep {
    /// The step that follows this one, or `None` after extraction.
    pub fn next(self) -> Option<ProtocolStep> {
        match self {
            ProtocolStep::NavigateHome => Some(ProtocolStep::SelectSearchMode),
            ProtocolStep::SelectSearchMode => Some(ProtocolStep::EnterKey),
            ProtocolStep::EnterKey => Some(ProtocolStep::Submit),
            ProtocolStep::Submit => Some(ProtocolStep::ShortCircuitCheck),
            ProtocolStep::ShortCircuitCheck => Some(ProtocolStep::VerifyStatus),
            ProtocolStep::VerifyStatus => Some(ProtocolStep::ExtractRecord),
            ProtocolStep::ExtractRecord => None,
        }
    }
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolStep::NavigateHome => write!(f, "NAVIGATE_HOME"),
            ProtocolStep::SelectSearchMode => write!(f, "SELECT_SEARCH_MODE"),
            ProtocolStep::EnterKey => write!(f, "ENTER_KEY"),
            ProtocolStep::Submit => write!(f, "SUBMIT"),
            ProtocolStep::ShortCircuitCheck => write!(f, "SHORT_CIRCUIT_CHECK"),
            ProtocolStep::VerifyStatus => write!(f, "VERIFY_STATUS"),
            ProtocolStep::ExtractRecord => write!(f, "EXTRACT_RECORD"),
        }
    }
}

/// One carrier row as it appears in the result artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierRecord {
    pub identifier: String,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub status: String,
}

impl CarrierRecord {
    /// Column titles, in row order.
    pub const HEADER: [&'static str; 5] =
        ["MC Number", "Company Name", "Phone", "Address", "Status"];

    /// The record as a fixed five-field row matching [`CarrierRecord::HEADER`].
    pub fn as_row(&self) -> [&str; 5] {
        [
            &self.identifier,
            &self.name,
            &self.phone,
            &self.address,
            &self.status,
        ]
    }
}

/// Terminal classification of one key.
#[derive(Debug)]
pub enum RetrievalResult {
    /// The carrier exists and its status passed the predicate.
    Match(CarrierRecord),
    /// The carrier exists but its status was filtered out.
    NoMatch { status: String },
    /// The source reported no record for the key.
    NotFound,
    /// Navigation or search failed for this key; the batch continues.
    TransientFailure(StepError),
}

impl RetrievalResult {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            RetrievalResult::Match(_) => "match",
            RetrievalResult::NoMatch { .. } => "no_match",
            RetrievalResult::NotFound => "not_found",
            RetrievalResult::TransientFailure(_) => "transient_failure",
        }
    }
}

/// The result of evaluating one protocol step.
#[derive(Debug)]
pub enum Transition {
    /// Advance to the next step.
    Next(ProtocolStep),
    /// The key reached a terminal classification.
    Finish(RetrievalResult),
}

/// Case-insensitive containment test applied to the extracted status text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPredicate {
    required: String,
}

impl StatusPredicate {
    pub fn containing(phrase: impl Into<String>) -> Self {
        Self {
            required: phrase.into().to_uppercase(),
        }
    }

    pub fn matches(&self, status: &str) -> bool {
        status.to_uppercase().contains(&self.required)
    }
}

impl Default for StatusPredicate {
    fn default() -> Self {
        Self::containing("AUTHORIZED FOR")
    }
}

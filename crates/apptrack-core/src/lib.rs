//! Core domain model and provenance types for the application tracker.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

mod config;

pub use config::{
    ColumnLayout, ConfigError, ExtractorConfig, HighlightColors, Sentinels, TrackerConfig,
};

pub const CRATE_NAME: &str = "apptrack-core";

/// Canonical progress value the engine writes for a freshly seen application.
pub const IN_PROGRESS: &str = "In Progress";

/// Provenance pointer attached to extracted candidate values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub thread_id: String,
    pub rule: String,
    pub snippet: String,
    pub extracted_at: DateTime<Utc>,
    pub extractor_version: String,
}

/// Candidate field wrapper: `None` means the extractor fell back to the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: Option<T>,
    pub evidence: Option<EvidenceRef>,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Field<T> {
    pub fn empty() -> Self {
        Self {
            value: None,
            evidence: None,
        }
    }

    pub fn with_value_and_evidence(value: T, evidence: EvidenceRef) -> Self {
        Self {
            value: Some(value),
            evidence: Some(evidence),
        }
    }

    pub fn observed(value: T) -> Self {
        Self {
            value: Some(value),
            evidence: None,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.value.is_some()
    }
}

impl Field<String> {
    pub fn value_or<'a>(&'a self, sentinel: &'a str) -> &'a str {
        self.value.as_deref().unwrap_or(sentinel)
    }
}

/// Extracted handoff contract from the extractors into the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDraft {
    pub thread_id: String,
    pub received_at: Option<DateTime<Utc>>,
    pub extractor_version: String,
    pub role: Field<String>,
    pub company: Field<String>,
    pub term: Field<String>,
    pub location: Field<String>,
    pub date_applied: Field<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progress {
    InProgress,
    /// Any state set by the user, kept verbatim (including misspelled variants).
    Other(String),
}

impl Progress {
    /// Only the exact canonical spelling becomes `InProgress`; any other
    /// spelling is kept so it can be written back unchanged.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == IN_PROGRESS {
            Progress::InProgress
        } else {
            Progress::Other(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Progress::InProgress => IN_PROGRESS,
            Progress::Other(raw) => raw,
        }
    }

    /// Case-insensitive match on the canonical value.
    pub fn is_in_progress(&self) -> bool {
        match self {
            Progress::InProgress => true,
            Progress::Other(raw) => raw.eq_ignore_ascii_case(IN_PROGRESS),
        }
    }

    /// True for the canonical value or any tolerated alias, case-insensitively.
    pub fn looks_in_progress(&self, aliases: &[String]) -> bool {
        self.is_in_progress() || aliases.iter().any(|a| self.as_str().eq_ignore_ascii_case(a.trim()))
    }
}

/// The six human-tracked yes/no columns. The engine only ever writes "No" on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestones {
    pub recruiter_contacted: String,
    pub round1: String,
    pub round2: String,
    pub round3: String,
    pub thank_you_sent: String,
    pub offer: String,
}

impl Milestones {
    pub fn all(value: &str) -> Self {
        Self {
            recruiter_contacted: value.to_string(),
            round1: value.to_string(),
            round2: value.to_string(),
            round3: value.to_string(),
            thank_you_sent: value.to_string(),
            offer: value.to_string(),
        }
    }

    pub fn get(&self, field: RecordField) -> Option<&str> {
        let value = match field {
            RecordField::RecruiterContacted => &self.recruiter_contacted,
            RecordField::Round1 => &self.round1,
            RecordField::Round2 => &self.round2,
            RecordField::Round3 => &self.round3,
            RecordField::ThankYouSent => &self.thank_you_sent,
            RecordField::Offer => &self.offer,
            _ => return None,
        };
        Some(value)
    }
}

/// Addressable tracker columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordField {
    Progress,
    Role,
    Company,
    Term,
    Location,
    RecruiterContacted,
    Round1,
    Round2,
    Round3,
    ThankYouSent,
    Offer,
    DateApplied,
    Platform,
    ThreadId,
}

impl RecordField {
    pub const MILESTONES: [RecordField; 6] = [
        RecordField::RecruiterContacted,
        RecordField::Round1,
        RecordField::Round2,
        RecordField::Round3,
        RecordField::ThankYouSent,
        RecordField::Offer,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RecordField::Progress => "Progress",
            RecordField::Role => "Role",
            RecordField::Company => "Company",
            RecordField::Term => "Term",
            RecordField::Location => "Location",
            RecordField::RecruiterContacted => "Recruiters",
            RecordField::Round1 => "First Round",
            RecordField::Round2 => "Second Round",
            RecordField::Round3 => "Third Round",
            RecordField::ThankYouSent => "Thank You Email",
            RecordField::Offer => "Offer",
            RecordField::DateApplied => "Date Applied",
            RecordField::Platform => "Platform",
            RecordField::ThreadId => "Thread ID",
        }
    }
}

/// One tracked job application as stored in the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub progress: Progress,
    pub role: String,
    pub company: String,
    pub term: String,
    pub location: String,
    pub milestones: Milestones,
    /// `yyyy-MM-dd` for engine-written rows; legacy rows may hold other text.
    pub date_applied: String,
    pub platform: String,
    pub thread_id: Option<String>,
}

impl ApplicationRecord {
    /// Build a record from one store row. Missing cells read as empty strings.
    pub fn from_row(layout: &ColumnLayout, cells: &[String]) -> Self {
        let cell = |field: RecordField| -> String {
            cells
                .get(layout.column(field).saturating_sub(1))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let thread_id = cell(RecordField::ThreadId);
        Self {
            progress: Progress::parse(&cell(RecordField::Progress)),
            role: cell(RecordField::Role),
            company: cell(RecordField::Company),
            term: cell(RecordField::Term),
            location: cell(RecordField::Location),
            milestones: Milestones {
                recruiter_contacted: cell(RecordField::RecruiterContacted),
                round1: cell(RecordField::Round1),
                round2: cell(RecordField::Round2),
                round3: cell(RecordField::Round3),
                thank_you_sent: cell(RecordField::ThankYouSent),
                offer: cell(RecordField::Offer),
            },
            date_applied: cell(RecordField::DateApplied),
            platform: cell(RecordField::Platform),
            thread_id: if thread_id.is_empty() { None } else { Some(thread_id) },
        }
    }

    /// Lay the record out as a store row, `layout.width()` cells wide.
    pub fn to_row(&self, layout: &ColumnLayout) -> Vec<String> {
        let mut row = vec![String::new(); layout.width()];
        for field in layout.fields() {
            let idx = layout.column(field) - 1;
            row[idx] = self.get(field).to_string();
        }
        row
    }

    pub fn get(&self, field: RecordField) -> &str {
        match field {
            RecordField::Progress => self.progress.as_str(),
            RecordField::Role => &self.role,
            RecordField::Company => &self.company,
            RecordField::Term => &self.term,
            RecordField::Location => &self.location,
            RecordField::DateApplied => &self.date_applied,
            RecordField::Platform => &self.platform,
            RecordField::ThreadId => self.thread_id.as_deref().unwrap_or(""),
            milestone => self.milestones.get(milestone).unwrap_or(""),
        }
    }

    /// Overwrite one field with a raw store value.
    pub fn set(&mut self, field: RecordField, value: &str) {
        let value = value.trim().to_string();
        match field {
            RecordField::Progress => self.progress = Progress::parse(&value),
            RecordField::Role => self.role = value,
            RecordField::Company => self.company = value,
            RecordField::Term => self.term = value,
            RecordField::Location => self.location = value,
            RecordField::RecruiterContacted => self.milestones.recruiter_contacted = value,
            RecordField::Round1 => self.milestones.round1 = value,
            RecordField::Round2 => self.milestones.round2 = value,
            RecordField::Round3 => self.milestones.round3 = value,
            RecordField::ThankYouSent => self.milestones.thank_you_sent = value,
            RecordField::Offer => self.milestones.offer = value,
            RecordField::DateApplied => self.date_applied = value,
            RecordField::Platform => self.platform = value,
            RecordField::ThreadId => {
                self.thread_id = if value.is_empty() { None } else { Some(value) }
            }
        }
    }
}

const KEY_STRIP: &[char] = &[
    '-', '–', '—', '_', '/', '.', ',', '(', ')', '+', ':', '\'', '"', '’',
];

/// Comparison key used for every dedup lookup: lowercase with whitespace and
/// separator punctuation removed.
pub fn normalize_key(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !KEY_STRIP.contains(c))
        .collect()
}

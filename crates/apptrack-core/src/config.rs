use std::collections::HashSet;
use std::path::Path;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RecordField;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing tracker config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid column layout: {0}")]
    Layout(String),
}

/// 1-based column positions of the tracker sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    pub progress: usize,
    pub role: usize,
    pub company: usize,
    pub term: usize,
    pub location: usize,
    pub recruiter_contacted: usize,
    pub round1: usize,
    pub round2: usize,
    pub round3: usize,
    pub thank_you_sent: usize,
    pub offer: usize,
    pub date_applied: usize,
    pub platform: usize,
    pub thread_id: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            progress: 1,
            role: 2,
            company: 3,
            term: 4,
            location: 5,
            recruiter_contacted: 6,
            round1: 7,
            round2: 8,
            round3: 9,
            thank_you_sent: 10,
            offer: 11,
            date_applied: 12,
            platform: 13,
            thread_id: 14,
        }
    }
}

impl ColumnLayout {
    pub fn column(&self, field: RecordField) -> usize {
        match field {
            RecordField::Progress => self.progress,
            RecordField::Role => self.role,
            RecordField::Company => self.company,
            RecordField::Term => self.term,
            RecordField::Location => self.location,
            RecordField::RecruiterContacted => self.recruiter_contacted,
            RecordField::Round1 => self.round1,
            RecordField::Round2 => self.round2,
            RecordField::Round3 => self.round3,
            RecordField::ThankYouSent => self.thank_you_sent,
            RecordField::Offer => self.offer,
            RecordField::DateApplied => self.date_applied,
            RecordField::Platform => self.platform,
            RecordField::ThreadId => self.thread_id,
        }
    }

    pub fn fields(&self) -> [RecordField; 14] {
        [
            RecordField::Progress,
            RecordField::Role,
            RecordField::Company,
            RecordField::Term,
            RecordField::Location,
            RecordField::RecruiterContacted,
            RecordField::Round1,
            RecordField::Round2,
            RecordField::Round3,
            RecordField::ThankYouSent,
            RecordField::Offer,
            RecordField::DateApplied,
            RecordField::Platform,
            RecordField::ThreadId,
        ]
    }

    /// Number of cells a full row spans.
    pub fn width(&self) -> usize {
        self.fields()
            .iter()
            .map(|f| self.column(*f))
            .max()
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for field in self.fields() {
            let col = self.column(field);
            if col == 0 {
                return Err(ConfigError::Layout(format!(
                    "{} column must be 1-based, got 0",
                    field.label()
                )));
            }
            if !seen.insert(col) {
                return Err(ConfigError::Layout(format!(
                    "column {col} assigned to more than one field ({})",
                    field.label()
                )));
            }
        }
        Ok(())
    }
}

/// Placeholder strings that mark a field as not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sentinels {
    pub unknown: String,
    pub default_term: String,
    pub default_location: String,
    pub yes: String,
    pub no: String,
    pub platform: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            unknown: "Unknown".to_string(),
            default_term: "Spring 2026".to_string(),
            default_location: "Not Specified".to_string(),
            yes: "Yes".to_string(),
            no: "No".to_string(),
            platform: "Email".to_string(),
        }
    }
}

impl Sentinels {
    pub fn is_unknown(&self, value: &str) -> bool {
        value.trim().eq_ignore_ascii_case(&self.unknown)
    }

    pub fn is_default_location(&self, value: &str) -> bool {
        value.trim().eq_ignore_ascii_case(&self.default_location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightColors {
    pub in_progress: String,
    pub yes: String,
}

impl Default for HighlightColors {
    fn default() -> Self {
        Self {
            in_progress: "#FFF9C4".to_string(),
            yes: "#C8E6C9".to_string(),
        }
    }
}

/// Phrase tables consumed by the field extractors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Regex fragments, joined into one word-bounded alternation.
    pub role_keywords: Vec<String>,
    /// Sender domains belonging to applicant tracking systems.
    pub ats_domains: Vec<String>,
    /// Mail providers and role mailboxes that never name a company.
    pub generic_senders: Vec<String>,
    /// Display-name words dropped when deriving a company from the sender.
    pub display_name_suffixes: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            role_keywords: strings(&[
                "intern",
                "co.?op",
                "coop",
                "technician",
                "engineer",
                "developer",
                "analyst",
                "assistant",
                "specialist",
                "coordinator",
                "manager",
                "director",
                "consultant",
                "advisor",
                "representative",
                "associate",
                "clerk",
            ]),
            ats_domains: strings(&[
                "myworkday",
                "workday",
                "greenhouse",
                "lever",
                "smartrecruiters",
                "successfactors",
                "workable",
                "icims",
                "oraclecloud",
                "ultipro",
                "adp",
                "bamboohr",
                "jazzhr",
                "jobvite",
                "hire",
            ]),
            generic_senders: strings(&[
                "google",
                "gmail",
                "yahoo",
                "outlook",
                "hotmail",
                "icloud",
                "aol",
                "protonmail",
                "zoho",
                "yandex",
                "mail",
                "noreply",
                "no[-_.]?reply",
                "do[-_.]?not[-_.]?reply",
                "notification",
                "info",
                "support",
                "admin",
                "help",
                "contact",
                "hello",
                "hi",
            ]),
            display_name_suffixes: strings(&[
                "Careers",
                "Recruiting",
                "Talent",
                "HR",
                "Human Resources",
            ]),
        }
    }
}

/// Everything the engine needs to know about the tracker, passed in at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub sheet_name: String,
    pub activity_log_name: String,
    pub thread_header: String,
    pub columns: ColumnLayout,
    pub processed_label: String,
    pub query_phrases: Vec<String>,
    pub newer_than_days: u32,
    pub watermark_key: String,
    pub sentinels: Sentinels,
    pub progress_aliases: Vec<String>,
    pub colors: HighlightColors,
    pub timezone: Tz,
    pub extractor: ExtractorConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sheet_name: "Internship Tracker Template".to_string(),
            activity_log_name: "Log".to_string(),
            thread_header: "Thread ID".to_string(),
            columns: ColumnLayout::default(),
            processed_label: "Jobs/Processed".to_string(),
            query_phrases: strings(&[
                "application received",
                "job application",
                "we received your application",
                "thanks for your application",
                "your application is on the way",
                "job application submitted",
                "application submitted",
                "submission confirmation",
                "you applied to",
                "we've received your application",
                "application confirmation",
                "has been submitted",
                "received your submission",
                "application acknowledgment",
                "you're in!",
                "thank you for applying",
                "application complete",
                "job interest received",
                "Job Application:",
                "thank you for your application to",
                "we have received your application",
                "your application has been received",
                "application received and reviewed",
                "thank you for applying to",
                "we're excited that you are interested",
                "what happens next",
                "we will review your application",
            ]),
            newer_than_days: 2,
            watermark_key: "lastProcessed".to_string(),
            sentinels: Sentinels::default(),
            progress_aliases: strings(&["In progess"]),
            colors: HighlightColors::default(),
            timezone: Tz::UTC,
            extractor: ExtractorConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = serde_yaml::from_str(text)?;
        config.columns.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Load the YAML file when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

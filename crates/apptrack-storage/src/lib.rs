//! Collaborator contracts (mailbox, tracker sheet, property store, activity log)
//! plus in-memory, file-backed and Gmail implementations.

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod file;
mod gmail;
mod memory;
mod sheet;

pub use file::{FileActivityLog, FixtureMailbox, JsonProperties, JsonWorkbook, JsonWorkbookSheet};
pub use gmail::{classify_status, BackoffPolicy, GmailConfig, GmailSource, RetryDisposition};
pub use memory::{MemoryActivityLog, MemoryMailbox, MemoryProperties, MemorySheet};
pub use sheet::SheetData;

pub const CRATE_NAME: &str = "apptrack-storage";

/// Outcome of a best-effort collaborator call. Callers decide what a skip means;
/// it never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect<T = ()> {
    Succeeded(T),
    SkippedNonFatal(String),
}

impl<T> SideEffect<T> {
    pub fn from_result<E: Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => SideEffect::Succeeded(value),
            Err(err) => SideEffect::SkippedNonFatal(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sheet \"{0}\" not found")]
    SheetNotFound(String),
    #[error("cell address out of bounds: row={row} col={col}")]
    OutOfBounds { row: usize, col: usize },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing store document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("mailbox access token rejected")]
    AuthExpired,
    #[error("decoding message payload: {0}")]
    Decode(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub plain_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// A mailbox conversation. Messages are oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailThread {
    pub id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub messages: Vec<MailMessage>,
}

impl MailThread {
    pub fn latest(&self) -> Option<&MailMessage> {
        self.messages.last()
    }

    fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Structured mailbox query; `to_search_string` renders the Gmail search syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailQuery {
    /// Epoch seconds; only threads newer than this are wanted.
    pub after: Option<i64>,
    pub newer_than_days: u32,
    pub exclude_label: Option<String>,
    pub phrases: Vec<String>,
}

impl MailQuery {
    pub fn to_search_string(&self) -> String {
        let mut query = String::new();
        if let Some(after) = self.after {
            query.push_str(&format!("after:{after} "));
        }
        query.push_str(&format!("newer_than:{}d", self.newer_than_days));
        if let Some(label) = &self.exclude_label {
            query.push_str(&format!(" -label:\"{label}\""));
        }
        if !self.phrases.is_empty() {
            let joined = self
                .phrases
                .iter()
                .map(|p| format!("\"{}\"", p.replace('"', "")))
                .collect::<Vec<_>>()
                .join(" OR ");
            query.push_str(&format!(" ({joined})"));
        }
        query
    }

    /// Local evaluation used by the in-memory and fixture mailboxes.
    /// `newer_than_days` is relative to the server clock and is not evaluated here.
    pub fn matches(&self, thread: &MailThread) -> bool {
        if let Some(label) = &self.exclude_label {
            if thread.has_label(label) {
                return false;
            }
        }
        if let Some(after) = self.after {
            if let Some(date) = thread.latest().and_then(|m| m.date) {
                if date.timestamp() <= after {
                    return false;
                }
            }
        }
        if self.phrases.is_empty() {
            return true;
        }
        let haystack = thread
            .messages
            .iter()
            .map(|m| {
                format!(
                    "{}\n{}\n{}",
                    m.subject,
                    m.plain_body.as_deref().unwrap_or_default(),
                    m.html_body.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();
        self.phrases
            .iter()
            .any(|p| haystack.contains(&p.to_lowercase()))
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn search(&self, query: &MailQuery) -> Result<Vec<MailThread>, SourceError>;

    async fn add_label(&self, thread_id: &str, label: &str) -> Result<(), SourceError>;
}

/// Tabular store addressed by 1-based row/column. Row 1 is the header row.
#[async_trait]
pub trait TrackerSheet: Send + Sync {
    fn name(&self) -> &str;

    async fn last_row(&self) -> Result<usize, StoreError>;

    async fn last_column(&self) -> Result<usize, StoreError>;

    async fn values(
        &self,
        row: usize,
        col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<Vec<Vec<String>>, StoreError>;

    async fn set_value(&mut self, row: usize, col: usize, value: &str) -> Result<(), StoreError>;

    async fn set_background(
        &mut self,
        row: usize,
        col: usize,
        color: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Accepted values of the cell's validation list, `None` when the cell has no rule.
    async fn validation_values(
        &self,
        row: usize,
        col: usize,
    ) -> Result<Option<Vec<String>>, StoreError>;

    /// Returns the 1-based row index the values landed on.
    async fn append_row(&mut self, values: &[String]) -> Result<usize, StoreError>;

    async fn hide_column(&mut self, col: usize) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn get_property(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_property(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Append-only sink; never read back by the engine.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&mut self, at: DateTime<Utc>, message: &str) -> Result<(), StoreError>;
}

//! In-memory collaborators for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    ActivityLog, MailQuery, MailThread, MessageSource, PropertyStore, SheetData, SourceError,
    StoreError, TrackerSheet,
};

#[derive(Debug, Default)]
pub struct MemoryMailbox {
    threads: Mutex<Vec<MailThread>>,
    fail_labels: bool,
    searches: Mutex<Vec<String>>,
}

impl MemoryMailbox {
    pub fn new(threads: Vec<MailThread>) -> Self {
        Self {
            threads: Mutex::new(threads),
            fail_labels: false,
            searches: Mutex::new(Vec::new()),
        }
    }

    /// Every `add_label` call fails, the way a revoked label scope would.
    pub fn with_failing_labels(mut self) -> Self {
        self.fail_labels = true;
        self
    }

    pub fn push(&self, thread: MailThread) {
        self.threads.lock().expect("mailbox lock").push(thread);
    }

    pub fn labels_of(&self, thread_id: &str) -> Vec<String> {
        self.threads
            .lock()
            .expect("mailbox lock")
            .iter()
            .find(|t| t.id == thread_id)
            .map(|t| t.labels.clone())
            .unwrap_or_default()
    }

    /// Rendered search strings, in call order.
    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().expect("mailbox lock").clone()
    }
}

#[async_trait]
impl MessageSource for MemoryMailbox {
    async fn search(&self, query: &MailQuery) -> Result<Vec<MailThread>, SourceError> {
        self.searches
            .lock()
            .expect("mailbox lock")
            .push(query.to_search_string());
        Ok(self
            .threads
            .lock()
            .expect("mailbox lock")
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect())
    }

    async fn add_label(&self, thread_id: &str, label: &str) -> Result<(), SourceError> {
        if self.fail_labels {
            return Err(SourceError::Message(format!(
                "label \"{label}\" could not be created"
            )));
        }
        let mut threads = self.threads.lock().expect("mailbox lock");
        let thread = threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| SourceError::Message(format!("unknown thread {thread_id}")))?;
        if !thread.labels.iter().any(|l| l == label) {
            thread.labels.push(label.to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemorySheet {
    name: String,
    data: SheetData,
    unreadable_validation: bool,
    value_writes: usize,
}

impl MemorySheet {
    pub fn new(name: impl Into<String>, data: SheetData) -> Self {
        Self {
            name: name.into(),
            data,
            unreadable_validation: false,
            value_writes: 0,
        }
    }

    /// Validation reads fail, as they do when the rule lives on a protected range.
    pub fn with_unreadable_validation(mut self) -> Self {
        self.unreadable_validation = true;
        self
    }

    pub fn data(&self) -> &SheetData {
        &self.data
    }

    /// Count of `set_value` and `append_row` calls since construction.
    pub fn value_writes(&self) -> usize {
        self.value_writes
    }
}

#[async_trait]
impl TrackerSheet for MemorySheet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn last_row(&self) -> Result<usize, StoreError> {
        Ok(self.data.last_row())
    }

    async fn last_column(&self) -> Result<usize, StoreError> {
        Ok(self.data.last_column())
    }

    async fn values(
        &self,
        row: usize,
        col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        self.data.values(row, col, num_rows, num_cols)
    }

    async fn set_value(&mut self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        self.value_writes += 1;
        self.data.set_value(row, col, value)
    }

    async fn set_background(
        &mut self,
        row: usize,
        col: usize,
        color: Option<&str>,
    ) -> Result<(), StoreError> {
        self.data.set_background(row, col, color)
    }

    async fn validation_values(
        &self,
        row: usize,
        col: usize,
    ) -> Result<Option<Vec<String>>, StoreError> {
        if self.unreadable_validation {
            return Err(StoreError::Unavailable(
                "validation rule is not readable".to_string(),
            ));
        }
        self.data.validation_values(row, col)
    }

    async fn append_row(&mut self, values: &[String]) -> Result<usize, StoreError> {
        self.value_writes += 1;
        Ok(self.data.append_row(values))
    }

    async fn hide_column(&mut self, col: usize) -> Result<(), StoreError> {
        self.data.hide_column(col)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryProperties {
    values: BTreeMap<String, String>,
}

impl MemoryProperties {
    pub fn with(key: &str, value: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value.to_string());
        Self { values }
    }
}

#[async_trait]
impl PropertyStore for MemoryProperties {
    async fn get_property(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    async fn set_property(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryActivityLog {
    entries: Vec<(DateTime<Utc>, String)>,
}

impl MemoryActivityLog {
    pub fn messages(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, m)| m.as_str()).collect()
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn append(&mut self, at: DateTime<Utc>, message: &str) -> Result<(), StoreError> {
        self.entries.push((at, message.to_string()));
        Ok(())
    }
}

//! File-backed collaborators. Every mutation is written through with an
//! atomic temp-file rename so a crashed run never leaves a torn document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::{
    ActivityLog, MailQuery, MailThread, MessageSource, PropertyStore, SheetData, SourceError,
    StoreError, TrackerSheet,
};

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;
    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkbookDoc {
    #[serde(default)]
    sheets: BTreeMap<String, SheetData>,
}

/// JSON document holding named sheets.
#[derive(Debug, Clone)]
pub struct JsonWorkbook {
    path: PathBuf,
}

impl JsonWorkbook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_doc(&self) -> Result<WorkbookDoc, StoreError> {
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Open an existing sheet. A missing sheet is `SheetNotFound`.
    pub async fn open_sheet(&self, name: &str) -> Result<JsonWorkbookSheet, StoreError> {
        let mut doc = self.read_doc().await?;
        let data = doc
            .sheets
            .remove(name)
            .ok_or_else(|| StoreError::SheetNotFound(name.to_string()))?;
        Ok(JsonWorkbookSheet {
            path: self.path.clone(),
            name: name.to_string(),
            others: doc,
            data,
        })
    }

    /// Write a fresh workbook containing one sheet, replacing any existing file.
    pub async fn create(&self, name: &str, data: SheetData) -> Result<(), StoreError> {
        let mut doc = WorkbookDoc::default();
        doc.sheets.insert(name.to_string(), data);
        let bytes = serde_json::to_vec_pretty(&doc)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| io_err(&self.path, e))
    }
}

#[derive(Debug, Clone)]
pub struct JsonWorkbookSheet {
    path: PathBuf,
    name: String,
    others: WorkbookDoc,
    data: SheetData,
}

impl JsonWorkbookSheet {
    pub fn data(&self) -> &SheetData {
        &self.data
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let mut doc = self.others.clone();
        doc.sheets.insert(self.name.clone(), self.data.clone());
        let bytes = serde_json::to_vec_pretty(&doc)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        debug!(path = %self.path.display(), sheet = %self.name, "workbook persisted");
        Ok(())
    }
}

#[async_trait]
impl TrackerSheet for JsonWorkbookSheet {
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
        self.data.set_value(row, col, value)?;
        self.persist().await
    }

    async fn set_background(
        &mut self,
        row: usize,
        col: usize,
        color: Option<&str>,
    ) -> Result<(), StoreError> {
        self.data.set_background(row, col, color)?;
        self.persist().await
    }

    async fn validation_values(
        &self,
        row: usize,
        col: usize,
    ) -> Result<Option<Vec<String>>, StoreError> {
        self.data.validation_values(row, col)
    }

    async fn append_row(&mut self, values: &[String]) -> Result<usize, StoreError> {
        let row = self.data.append_row(values);
        self.persist().await?;
        Ok(row)
    }

    async fn hide_column(&mut self, col: usize) -> Result<(), StoreError> {
        self.data.hide_column(col)?;
        self.persist().await
    }
}

/// Key-value properties persisted as a flat JSON object.
#[derive(Debug, Clone)]
pub struct JsonProperties {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonProperties {
    /// A missing file is an empty property set.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(Self { path, values })
    }
}

#[async_trait]
impl PropertyStore for JsonProperties {
    async fn get_property(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    async fn set_property(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        let bytes = serde_json::to_vec_pretty(&self.values)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| io_err(&self.path, e))
    }
}

/// Append-only `timestamp<TAB>message` lines.
#[derive(Debug, Clone)]
pub struct FileActivityLog {
    path: PathBuf,
}

impl FileActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ActivityLog for FileActivityLog {
    async fn append(&mut self, at: DateTime<Utc>, message: &str) -> Result<(), StoreError> {
        let line = format!(
            "{}\t{}\n",
            at.to_rfc3339(),
            message.replace(['\n', '\r'], " ")
        );
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_err(&self.path, e))?;
        file.flush().await.map_err(|e| io_err(&self.path, e))
    }
}

/// Directory of `*.json` thread files, searched in file-name order.
#[derive(Debug, Clone)]
pub struct FixtureMailbox {
    dir: PathBuf,
}

impl FixtureMailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn load_all(&self) -> Result<Vec<(PathBuf, MailThread)>, SourceError> {
        let source_io = |path: &Path, source| SourceError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| source_io(&self.dir, e))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| source_io(&self.dir, e))?
        {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let is_snapshot = path.file_name().is_some_and(|n| n == "snapshot.json");
            if is_json && !is_snapshot {
                paths.push(path);
            }
        }
        paths.sort();

        let mut threads = Vec::with_capacity(paths.len());
        for path in paths {
            let text = fs::read_to_string(&path)
                .await
                .map_err(|e| source_io(&path, e))?;
            let thread: MailThread =
                serde_json::from_str(&text).map_err(|source| SourceError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            threads.push((path, thread));
        }
        Ok(threads)
    }
}

#[async_trait]
impl MessageSource for FixtureMailbox {
    async fn search(&self, query: &MailQuery) -> Result<Vec<MailThread>, SourceError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .map(|(_, thread)| thread)
            .filter(|thread| query.matches(thread))
            .collect())
    }

    async fn add_label(&self, thread_id: &str, label: &str) -> Result<(), SourceError> {
        let (path, mut thread) = self
            .load_all()
            .await?
            .into_iter()
            .find(|(_, t)| t.id == thread_id)
            .ok_or_else(|| SourceError::Message(format!("unknown thread {thread_id}")))?;
        if thread.labels.iter().any(|l| l == label) {
            return Ok(());
        }
        thread.labels.push(label.to_string());
        let bytes = serde_json::to_vec_pretty(&thread).map_err(|source| SourceError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|source| SourceError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

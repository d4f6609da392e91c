//! Reconciliation run driver: mailbox search, dedup lookup, field merge and
//! tracker writes, plus the maintenance reports.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use apptrack_core::{ApplicationRecord, ColumnLayout, RecordField, TrackerConfig};
use apptrack_extract::FieldExtractor;
use apptrack_storage::{
    ActivityLog, FileActivityLog, FixtureMailbox, GmailConfig, GmailSource, JsonProperties,
    JsonWorkbook, JsonWorkbookSheet, MailThread, MessageSource, PropertyStore, SheetData,
    SideEffect, TrackerSheet,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

mod index;
mod maintenance;
mod merge;

pub use index::{role_company_key, unknown_role_key, DedupIndex, MatchVia};
pub use maintenance::{
    cleanup_existing_data, validate_column_data, verify_sheet_layout, CleanupReport, ColumnIssue,
    LayoutMismatch, LayoutReport, NearDuplicate, ValidationReport,
};
pub use merge::{
    build_query, describe_changes, highlight_directives, merge_fields, Candidate, FieldChange,
    HighlightDirective, ProgressVocabulary,
};

pub const CRATE_NAME: &str = "apptrack-sync";

/// Runtime locations and credentials, read from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub config_path: PathBuf,
    pub workbook_path: PathBuf,
    pub state_path: PathBuf,
    pub activity_log_path: Option<PathBuf>,
    pub mailbox_dir: PathBuf,
    pub gmail_access_token: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            config_path: std::env::var("APPTRACK_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("apptrack.yaml")),
            workbook_path: std::env::var("APPTRACK_WORKBOOK")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tracker.json")),
            state_path: std::env::var("APPTRACK_STATE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("apptrack-state.json")),
            activity_log_path: std::env::var("APPTRACK_ACTIVITY_LOG").ok().map(PathBuf::from),
            mailbox_dir: std::env::var("APPTRACK_MAILBOX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("fixtures/mailbox")),
            gmail_access_token: std::env::var("GMAIL_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn load_tracker_config(&self) -> Result<TrackerConfig> {
        TrackerConfig::load_or_default(&self.config_path)
            .with_context(|| format!("loading {}", self.config_path.display()))
    }

    pub fn activity_log_path(&self, tracker: &TrackerConfig) -> PathBuf {
        self.activity_log_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.tsv", tracker.activity_log_name)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub threads_seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub anomalies: usize,
    pub query: String,
}

/// Per-thread reconciliation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Inserted {
        row: usize,
        recovered: bool,
    },
    Updated {
        row: usize,
        via: MatchVia,
        changes: Vec<FieldChange>,
    },
    Skipped {
        reason: String,
    },
}

/// The external systems one run talks to.
pub struct Collaborators<'a> {
    pub mailbox: &'a dyn MessageSource,
    pub sheet: &'a mut dyn TrackerSheet,
    pub properties: &'a mut dyn PropertyStore,
    pub log: &'a mut dyn ActivityLog,
}

/// Mutable state carried across the threads of a single run.
struct RunState {
    layout: ColumnLayout,
    index: DedupIndex,
    progress: String,
    handled: HashSet<String>,
    anomalies: usize,
    now: DateTime<Utc>,
}

pub struct SyncPipeline {
    config: TrackerConfig,
    extractor: FieldExtractor,
}

impl SyncPipeline {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config
            .columns
            .validate()
            .context("validating column layout")?;
        let extractor =
            FieldExtractor::new(&config.extractor).context("compiling extractor phrase tables")?;
        Ok(Self { config, extractor })
    }

    pub async fn run_once(&self, c: &mut Collaborators<'_>) -> Result<SyncRunSummary> {
        self.run_once_at(c, Utc::now()).await
    }

    pub async fn run_once_at(
        &self,
        c: &mut Collaborators<'_>,
        now: DateTime<Utc>,
    ) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, sheet = c.sheet.name());
        self.run_inner(c, run_id, now).instrument(span).await
    }

    async fn run_inner(
        &self,
        c: &mut Collaborators<'_>,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SyncRunSummary> {
        let layout = ensure_thread_column(c.sheet, &self.config).await?;
        let records = read_records(c.sheet, &layout).await?;
        let index = DedupIndex::build(
            records.iter().map(|(row, record)| (*row, record)),
            &self.config.sentinels,
        );
        info!(rows = records.len(), threads = index.thread_count(), "dedup index built");

        let vocabulary = match SideEffect::from_result(
            c.sheet
                .validation_values(2, layout.column(RecordField::Progress))
                .await,
        ) {
            SideEffect::Succeeded(values) => ProgressVocabulary::new(values),
            SideEffect::SkippedNonFatal(reason) => {
                warn!(%reason, "progress validation list unreadable; using canonical value");
                ProgressVocabulary::default()
            }
        };

        let watermark = read_watermark(c.properties, &self.config.watermark_key).await?;
        let query = build_query(&self.config, watermark);
        let rendered = query.to_search_string();
        info!(query = %rendered, "searching mailbox");
        let threads = c
            .mailbox
            .search(&query)
            .await
            .context("searching mailbox")?;

        let mut state = RunState {
            layout,
            index,
            progress: vocabulary.resolve(&self.config.progress_aliases),
            handled: HashSet::new(),
            anomalies: 0,
            now,
        };
        let mut summary = SyncRunSummary {
            run_id,
            started_at: now,
            finished_at: now,
            threads_seen: threads.len(),
            inserted: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            anomalies: 0,
            query: rendered,
        };

        for thread in &threads {
            let span = info_span!("thread", thread_id = %thread.id);
            let outcome = self
                .process_thread(c, &mut state, thread)
                .instrument(span)
                .await
                .with_context(|| format!("reconciling thread {}", thread.id))?;
            match outcome {
                Outcome::Inserted { .. } => summary.inserted += 1,
                Outcome::Updated { ref changes, .. } if changes.is_empty() => {
                    summary.unchanged += 1
                }
                Outcome::Updated { .. } => summary.updated += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
            }
        }

        if summary.inserted == 0 {
            note(
                c.log,
                now,
                "No new unique applications added (all matched existing by ThreadID or Key).",
            )
            .await;
        }

        c.properties
            .set_property(&self.config.watermark_key, &now.timestamp().to_string())
            .await
            .context("writing watermark")?;

        summary.anomalies = state.anomalies;
        summary.finished_at = Utc::now();
        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            anomalies = summary.anomalies,
            "sync run finished"
        );
        Ok(summary)
    }

    async fn process_thread(
        &self,
        c: &mut Collaborators<'_>,
        state: &mut RunState,
        thread: &MailThread,
    ) -> Result<Outcome> {
        if !state.handled.insert(thread.id.clone()) {
            return Ok(Outcome::Skipped {
                reason: "thread already handled in this run".to_string(),
            });
        }
        let tz = self.config.timezone;
        let Some(draft) = self.extractor.draft(thread, state.now, tz) else {
            warn!("thread has no messages");
            return Ok(Outcome::Skipped {
                reason: "thread has no messages".to_string(),
            });
        };
        let today = state.now.with_timezone(&tz).date_naive();
        let candidate = Candidate::from_draft(&draft, &self.config.sentinels, today);
        note(
            c.log,
            state.now,
            &format!(
                "Processing: \"{}\" at {} (thread {})",
                candidate.role, candidate.company, candidate.thread_id
            ),
        )
        .await;

        let outcome = self.reconcile(c, state, &candidate).await?;
        let message = match &outcome {
            Outcome::Inserted { recovered: true, .. } => {
                format!("Added (recovered): thread {}", candidate.thread_id)
            }
            Outcome::Inserted { .. } => format!(
                "Added \"{}\" at {} (thread {})",
                candidate.role, candidate.company, candidate.thread_id
            ),
            Outcome::Updated {
                via: MatchVia::ThreadId,
                changes,
                ..
            } => format!(
                "Updated by ThreadID {}: {}",
                candidate.thread_id,
                describe_changes(changes)
            ),
            Outcome::Updated { changes, .. } => format!(
                "Updated by Key ({}|{}): {}",
                candidate.role,
                candidate.company,
                describe_changes(changes)
            ),
            Outcome::Skipped { reason } => format!("Skipped thread {}: {reason}", candidate.thread_id),
        };
        note(c.log, state.now, &message).await;

        if let SideEffect::SkippedNonFatal(reason) = SideEffect::from_result(
            c.mailbox
                .add_label(&thread.id, &self.config.processed_label)
                .await,
        ) {
            warn!(%reason, label = %self.config.processed_label, "processed label not applied");
        }
        Ok(outcome)
    }

    async fn reconcile(
        &self,
        c: &mut Collaborators<'_>,
        state: &mut RunState,
        candidate: &Candidate,
    ) -> Result<Outcome> {
        let sentinels = &self.config.sentinels;
        if let Some(indexed) = state.index.thread_row(&candidate.thread_id) {
            match locate_thread_row(c.sheet, &state.layout, indexed, &candidate.thread_id).await? {
                Some(row) => {
                    if row != indexed {
                        state.index.relocate_thread(&candidate.thread_id, row);
                    }
                    return self.merge_into(c, state, candidate, row, MatchVia::ThreadId).await;
                }
                None => {
                    state.anomalies += 1;
                    warn!(row = indexed, "indexed thread id not found in tracker; inserting");
                    note(
                        c.log,
                        state.now,
                        &format!(
                            "Anomaly: thread {} indexed at row {indexed} but not found; re-adding",
                            candidate.thread_id
                        ),
                    )
                    .await;
                    return self.insert(c, state, candidate, true).await;
                }
            }
        }

        match state.index.key_row(
            &candidate.role,
            &candidate.company,
            &candidate.date_applied,
            sentinels,
        ) {
            Some((row, via)) => self.merge_into(c, state, candidate, row, via).await,
            None => self.insert(c, state, candidate, false).await,
        }
    }

    async fn merge_into(
        &self,
        c: &mut Collaborators<'_>,
        state: &mut RunState,
        candidate: &Candidate,
        row: usize,
        via: MatchVia,
    ) -> Result<Outcome> {
        let sentinels = &self.config.sentinels;
        let mut record = read_record(c.sheet, &state.layout, row).await?;
        let changes = merge_fields(&record, candidate, &state.progress, sentinels);
        for change in &changes {
            c.sheet
                .set_value(row, state.layout.column(change.field), &change.to)
                .await
                .with_context(|| format!("writing {} at row {row}", change.field.label()))?;
            record.set(change.field, &change.to);
        }
        state.index.register(row, &record, sentinels);
        self.apply_highlights(c.sheet, &state.layout, row, &record).await?;
        info!(row, ?via, changes = changes.len(), "merged into existing row");
        Ok(Outcome::Updated { row, via, changes })
    }

    async fn insert(
        &self,
        c: &mut Collaborators<'_>,
        state: &mut RunState,
        candidate: &Candidate,
        recovered: bool,
    ) -> Result<Outcome> {
        let record = candidate.to_record(&state.progress, &self.config.sentinels);
        let row = c
            .sheet
            .append_row(&record.to_row(&state.layout))
            .await
            .context("appending tracker row")?;
        if recovered {
            state.index.relocate_thread(&candidate.thread_id, row);
        }
        state.index.register(row, &record, &self.config.sentinels);
        self.apply_highlights(c.sheet, &state.layout, row, &record).await?;
        info!(row, recovered, "inserted new row");
        Ok(Outcome::Inserted { row, recovered })
    }

    async fn apply_highlights(
        &self,
        sheet: &mut dyn TrackerSheet,
        layout: &ColumnLayout,
        row: usize,
        record: &ApplicationRecord,
    ) -> Result<()> {
        let directives = highlight_directives(
            record,
            layout,
            &self.config.colors,
            &self.config.sentinels,
            &self.config.progress_aliases,
        );
        for directive in directives {
            sheet
                .set_background(row, directive.col, directive.color.as_deref())
                .await
                .with_context(|| format!("highlighting row {row} column {}", directive.col))?;
        }
        Ok(())
    }
}

/// Best-effort activity log append.
async fn note(log: &mut dyn ActivityLog, at: DateTime<Utc>, message: &str) {
    if let SideEffect::SkippedNonFatal(reason) = SideEffect::from_result(log.append(at, message).await)
    {
        warn!(%reason, "activity log append skipped");
    }
}

async fn read_watermark(properties: &dyn PropertyStore, key: &str) -> Result<Option<i64>> {
    let raw = properties
        .get_property(key)
        .await
        .context("reading watermark")?;
    Ok(raw.and_then(|value| match value.trim().parse::<i64>() {
        Ok(epoch) => Some(epoch),
        Err(_) => {
            warn!(%value, "ignoring unparseable watermark");
            None
        }
    }))
}

/// Locate the thread-id column, creating the header when it is missing, and
/// return the layout with its actual position.
pub async fn ensure_thread_column(
    sheet: &mut dyn TrackerSheet,
    config: &TrackerConfig,
) -> Result<ColumnLayout> {
    let mut layout = config.columns.clone();
    let last_col = sheet.last_column().await.context("reading tracker width")?;
    let header = if last_col > 0 {
        sheet
            .values(1, 1, 1, last_col)
            .await
            .context("reading header row")?
            .into_iter()
            .next()
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let col = match header
        .iter()
        .position(|cell| cell.trim() == config.thread_header)
    {
        Some(idx) => idx + 1,
        None => {
            let preferred = layout.thread_id;
            let free = header
                .get(preferred - 1)
                .map_or(true, |cell| cell.trim().is_empty());
            let col = if free { preferred } else { last_col + 1 };
            sheet
                .set_value(1, col, &config.thread_header)
                .await
                .context("writing thread id header")?;
            info!(col, "created thread id column");
            col
        }
    };

    if let SideEffect::SkippedNonFatal(reason) =
        SideEffect::from_result(sheet.hide_column(col).await)
    {
        warn!(%reason, col, "thread id column left visible");
    }
    layout.thread_id = col;
    layout
        .validate()
        .context("thread id column collides with the configured layout")?;
    Ok(layout)
}

/// Every data row as `(row, record)`, starting at row 2.
pub async fn read_records(
    sheet: &dyn TrackerSheet,
    layout: &ColumnLayout,
) -> Result<Vec<(usize, ApplicationRecord)>> {
    let last_row = sheet.last_row().await.context("reading tracker length")?;
    if last_row < 2 {
        return Ok(Vec::new());
    }
    let width = layout.width().max(sheet.last_column().await?);
    let rows = sheet
        .values(2, 1, last_row - 1, width)
        .await
        .context("reading tracker rows")?;
    Ok(rows
        .iter()
        .enumerate()
        .map(|(i, cells)| (i + 2, ApplicationRecord::from_row(layout, cells)))
        .collect())
}

async fn read_record(
    sheet: &dyn TrackerSheet,
    layout: &ColumnLayout,
    row: usize,
) -> Result<ApplicationRecord> {
    let cells = sheet
        .values(row, 1, 1, layout.width())
        .await
        .with_context(|| format!("reading row {row}"))?
        .into_iter()
        .next()
        .unwrap_or_default();
    Ok(ApplicationRecord::from_row(layout, &cells))
}

/// Confirm the indexed row still holds `thread_id`, scanning the thread column
/// when it does not.
async fn locate_thread_row(
    sheet: &dyn TrackerSheet,
    layout: &ColumnLayout,
    indexed: usize,
    thread_id: &str,
) -> Result<Option<usize>> {
    let col = layout.column(RecordField::ThreadId);
    let last_row = sheet.last_row().await.context("reading tracker length")?;
    if indexed >= 2 && indexed <= last_row {
        let cell = sheet.values(indexed, col, 1, 1).await?;
        if cell.first().and_then(|r| r.first()).map(|v| v.trim()) == Some(thread_id) {
            return Ok(Some(indexed));
        }
    }
    if last_row < 2 {
        return Ok(None);
    }
    let column = sheet
        .values(2, col, last_row - 1, 1)
        .await
        .context("scanning thread id column")?;
    Ok(column
        .iter()
        .position(|r| r.first().map(|v| v.trim()) == Some(thread_id))
        .map(|i| i + 2))
}

/// Open the tracker sheet named in the config. A missing sheet is fatal.
pub async fn open_tracker(sync: &SyncConfig, tracker: &TrackerConfig) -> Result<JsonWorkbookSheet> {
    let workbook = JsonWorkbook::new(&sync.workbook_path);
    workbook
        .open_sheet(&tracker.sheet_name)
        .await
        .with_context(|| {
            format!(
                "opening sheet \"{}\" in {}",
                tracker.sheet_name,
                workbook.path().display()
            )
        })
}

/// Header row for a blank tracker laid out per `tracker.columns`.
pub fn header_row(tracker: &TrackerConfig) -> Vec<String> {
    let layout = &tracker.columns;
    let mut header = vec![String::new(); layout.width()];
    for field in layout.fields() {
        header[layout.column(field) - 1] = match field {
            RecordField::ThreadId => tracker.thread_header.clone(),
            other => other.label().to_string(),
        };
    }
    header
}

/// Create the workbook with an empty tracker sheet. Returns `false` when the
/// workbook file already exists.
pub async fn init_workbook(sync: &SyncConfig, tracker: &TrackerConfig) -> Result<bool> {
    let workbook = JsonWorkbook::new(&sync.workbook_path);
    if workbook.path().exists() {
        return Ok(false);
    }
    workbook
        .create(
            &tracker.sheet_name,
            SheetData::from_rows(vec![header_row(tracker)]),
        )
        .await
        .with_context(|| format!("creating {}", workbook.path().display()))?;
    info!(path = %workbook.path().display(), "workbook created");
    Ok(true)
}

/// One full run against the file-backed tracker and the configured mailbox.
pub async fn run_sync_once(sync: &SyncConfig) -> Result<SyncRunSummary> {
    let tracker = sync.load_tracker_config()?;
    let mut sheet = open_tracker(sync, &tracker).await?;
    let mut properties = JsonProperties::open(&sync.state_path)
        .await
        .with_context(|| format!("opening {}", sync.state_path.display()))?;
    let mut log = FileActivityLog::new(sync.activity_log_path(&tracker));
    let mailbox: Box<dyn MessageSource> = match &sync.gmail_access_token {
        Some(token) => Box::new(GmailSource::new(GmailConfig::new(token.clone()))?),
        None => Box::new(FixtureMailbox::new(&sync.mailbox_dir)),
    };

    let pipeline = SyncPipeline::new(tracker)?;
    pipeline
        .run_once(&mut Collaborators {
            mailbox: mailbox.as_ref(),
            sheet: &mut sheet,
            properties: &mut properties,
            log: &mut log,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptrack_storage::{MemorySheet, SheetData};

    fn header(cells: &[&str]) -> SheetData {
        SheetData::from_rows(vec![cells.iter().map(|s| s.to_string()).collect()])
    }

    const THIRTEEN: [&str; 13] = [
        "Progress",
        "Role",
        "Company",
        "Term",
        "Location",
        "Recruiters",
        "First Round",
        "Second Round",
        "Third Round",
        "Thank You Email",
        "Offer",
        "Date Applied",
        "Platform",
    ];

    #[tokio::test]
    async fn missing_thread_header_is_created_and_hidden() {
        let mut sheet = MemorySheet::new("Tracker", header(&THIRTEEN));
        let layout = ensure_thread_column(&mut sheet, &TrackerConfig::default())
            .await
            .unwrap();
        assert_eq!(layout.thread_id, 14);
        assert_eq!(sheet.data().cell(1, 14), "Thread ID");
        assert!(sheet.data().hidden_columns.contains(&14));
    }

    #[tokio::test]
    async fn occupied_preferred_column_pushes_header_right() {
        let mut cells = THIRTEEN.to_vec();
        cells.push("Notes");
        let mut sheet = MemorySheet::new("Tracker", header(&cells));
        let layout = ensure_thread_column(&mut sheet, &TrackerConfig::default())
            .await
            .unwrap();
        assert_eq!(layout.thread_id, 15);
        assert_eq!(sheet.data().cell(1, 15), "Thread ID");
        assert_eq!(sheet.data().cell(1, 14), "Notes");
    }

    #[tokio::test]
    async fn existing_thread_header_is_reused() {
        let mut cells = THIRTEEN.to_vec();
        cells.push("Notes");
        cells.push(" Thread ID ");
        let mut sheet = MemorySheet::new("Tracker", header(&cells));
        let layout = ensure_thread_column(&mut sheet, &TrackerConfig::default())
            .await
            .unwrap();
        assert_eq!(layout.thread_id, 15);
        assert_eq!(sheet.value_writes(), 0);
    }

    #[tokio::test]
    async fn divergent_index_row_is_found_by_scanning() {
        let layout = ColumnLayout::default();
        let mut data = header(&THIRTEEN);
        data.set_value(1, 14, "Thread ID").unwrap();
        data.set_value(2, 14, "T2").unwrap();
        data.set_value(3, 14, "T1").unwrap();
        let sheet = MemorySheet::new("Tracker", data);
        assert_eq!(locate_thread_row(&sheet, &layout, 2, "T1").await.unwrap(), Some(3));
        assert_eq!(locate_thread_row(&sheet, &layout, 3, "T1").await.unwrap(), Some(3));
        assert_eq!(locate_thread_row(&sheet, &layout, 9, "T9").await.unwrap(), None);
    }

    #[test]
    fn header_row_follows_layout() {
        let mut tracker = TrackerConfig::default();
        assert_eq!(header_row(&tracker)[..3], ["Progress", "Role", "Company"]);
        tracker.columns.thread_id = 16;
        let header = header_row(&tracker);
        assert_eq!(header.len(), 16);
        assert_eq!(header[13], "");
        assert_eq!(header[15], "Thread ID");
    }

    #[tokio::test]
    async fn bad_watermark_reads_as_absent() {
        use apptrack_storage::MemoryProperties;
        let props = MemoryProperties::with("lastProcessed", "yesterday");
        assert_eq!(read_watermark(&props, "lastProcessed").await.unwrap(), None);
        let props = MemoryProperties::with("lastProcessed", "1760000000");
        assert_eq!(
            read_watermark(&props, "lastProcessed").await.unwrap(),
            Some(1_760_000_000)
        );
    }
}

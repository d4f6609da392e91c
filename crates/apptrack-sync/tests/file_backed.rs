use std::path::{Path, PathBuf};

use apptrack_storage::{JsonWorkbook, SheetData, StoreError};
use apptrack_core::TrackerConfig;
use apptrack_sync::{init_workbook, run_sync_once, SyncConfig};

fn header() -> Vec<String> {
    [
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
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn sync_config(root: &Path) -> SyncConfig {
    SyncConfig {
        config_path: root.join("apptrack.yaml"),
        workbook_path: root.join("tracker.json"),
        state_path: root.join("state.json"),
        activity_log_path: Some(root.join("Log.tsv")),
        mailbox_dir: root.join("mailbox"),
        gmail_access_token: None,
    }
}

fn copy_fixture_mailbox(dest: &Path) -> anyhow::Result<()> {
    let source = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/mailbox");
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let path = entry?.path();
        if let Some(name) = path.file_name() {
            std::fs::copy(&path, dest.join(name))?;
        }
    }
    Ok(())
}

#[tokio::test]
async fn missing_sheet_aborts_before_any_state_is_written() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sync_config(dir.path());
    JsonWorkbook::new(&config.workbook_path)
        .create("Some Other Sheet", SheetData::from_rows(vec![header()]))
        .await?;

    let err = run_sync_once(&config).await.unwrap_err();
    assert!(err.chain().any(|cause| matches!(
        cause.downcast_ref::<StoreError>(),
        Some(StoreError::SheetNotFound(_))
    )));
    assert!(!config.state_path.exists());
    assert!(!dir.path().join("Log.tsv").exists());
    Ok(())
}

#[tokio::test]
async fn fixture_mailbox_run_fills_the_workbook_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sync_config(dir.path());
    copy_fixture_mailbox(&config.mailbox_dir)?;
    let workbook = JsonWorkbook::new(&config.workbook_path);
    workbook
        .create("Internship Tracker Template", SheetData::from_rows(vec![header()]))
        .await?;

    let first = run_sync_once(&config).await?;
    assert_eq!(first.threads_seen, 3);
    assert_eq!(first.inserted, 3);

    let sheet = workbook.open_sheet("Internship Tracker Template").await?;
    let data = sheet.data();
    assert_eq!(data.cell(1, 14), "Thread ID");
    assert!(data.hidden_columns.contains(&14));
    let companies: Vec<&str> = (2..=data.last_row()).map(|row| data.cell(row, 3)).collect();
    assert_eq!(companies, vec!["LiveRamp", "Acme Robotics", "Northwind"]);
    assert_eq!(data.cell(2, 2), "Software Engineer Co-Op");

    let second = run_sync_once(&config).await?;
    assert_eq!(second.threads_seen, 0);
    assert!(second.query.starts_with("after:"));

    let log = std::fs::read_to_string(dir.path().join("Log.tsv"))?;
    assert!(log.contains("No new unique applications added"));
    Ok(())
}

#[tokio::test]
async fn init_creates_the_tracker_only_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sync_config(dir.path());
    let tracker = TrackerConfig::default();

    assert!(init_workbook(&config, &tracker).await?);
    assert!(!init_workbook(&config, &tracker).await?);

    let sheet = JsonWorkbook::new(&config.workbook_path)
        .open_sheet(&tracker.sheet_name)
        .await?;
    assert_eq!(sheet.data().last_row(), 1);
    assert_eq!(sheet.data().cell(1, 12), "Date Applied");
    assert_eq!(sheet.data().cell(1, 14), "Thread ID");
    Ok(())
}

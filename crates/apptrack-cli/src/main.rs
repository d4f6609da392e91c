use anyhow::Result;
use apptrack_storage::FileActivityLog;
use apptrack_sync::{
    cleanup_existing_data, init_workbook, open_tracker, validate_column_data, verify_sheet_layout,
    SyncConfig,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "apptrack")]
#[command(about = "Track job applications from confirmation emails")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the workbook with an empty tracker sheet if it does not exist.
    Init,
    /// Search the mailbox and reconcile new messages into the tracker.
    Sync,
    /// Swap misplaced Company/Term values and normalize legacy dates.
    Cleanup,
    /// Report misplaced column values and likely duplicate rows.
    Validate,
    /// Compare the header row with the configured column layout.
    VerifyLayout,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let sync = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Init => {
            let tracker = sync.load_tracker_config()?;
            if init_workbook(&sync, &tracker).await? {
                println!("created {}", sync.workbook_path.display());
            } else {
                println!("{} already exists", sync.workbook_path.display());
            }
        }
        Commands::Sync => {
            let summary = apptrack_sync::run_sync_once(&sync).await?;
            println!(
                "sync complete: run_id={} threads={} inserted={} updated={} unchanged={} skipped={} anomalies={}",
                summary.run_id,
                summary.threads_seen,
                summary.inserted,
                summary.updated,
                summary.unchanged,
                summary.skipped,
                summary.anomalies
            );
        }
        Commands::Cleanup => {
            let tracker = sync.load_tracker_config()?;
            let mut sheet = open_tracker(&sync, &tracker).await?;
            let mut log = FileActivityLog::new(sync.activity_log_path(&tracker));
            let report = cleanup_existing_data(&mut sheet, &mut log, &tracker, Utc::now()).await?;
            println!(
                "cleanup complete: rows={} swapped={} dates={}",
                report.rows_scanned,
                report.swapped_rows.len(),
                report.dates_rewritten.len()
            );
        }
        Commands::Validate => {
            let tracker = sync.load_tracker_config()?;
            let sheet = open_tracker(&sync, &tracker).await?;
            let mut log = FileActivityLog::new(sync.activity_log_path(&tracker));
            let report = validate_column_data(&sheet, &mut log, &tracker, Utc::now()).await?;
            for issue in &report.issues {
                println!(
                    "row {} {}: {} ({:?})",
                    issue.row,
                    issue.field.label(),
                    issue.problem,
                    issue.value
                );
            }
            for dup in &report.near_duplicates {
                println!(
                    "possible duplicate at {}: rows {} and {} (score {:.2})",
                    dup.company, dup.row_a, dup.row_b, dup.score
                );
            }
            println!(
                "validate complete: rows={} issues={} near_duplicates={}",
                report.rows_scanned,
                report.issues.len(),
                report.near_duplicates.len()
            );
        }
        Commands::VerifyLayout => {
            let tracker = sync.load_tracker_config()?;
            let sheet = open_tracker(&sync, &tracker).await?;
            let mut log = FileActivityLog::new(sync.activity_log_path(&tracker));
            let report = verify_sheet_layout(&sheet, &mut log, &tracker, Utc::now()).await?;
            for mismatch in &report.mismatches {
                let actual = mismatch
                    .actual
                    .map_or_else(|| "not found".to_string(), |c| c.to_string());
                println!(
                    "{}: expected column {}, found {actual}",
                    mismatch.header, mismatch.expected
                );
            }
            println!(
                "layout {}: columns={} mismatches={}",
                if report.is_ok() { "ok" } else { "mismatch" },
                report.header.len(),
                report.mismatches.len()
            );
        }
    }

    Ok(())
}

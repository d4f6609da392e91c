//! Tracker maintenance passes: legacy data cleanup, column validation and a
//! header layout check. Each writes its findings to the activity log.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use apptrack_core::{normalize_key, RecordField, TrackerConfig};
use apptrack_extract::static_regex;
use apptrack_storage::{ActivityLog, TrackerSheet};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use strsim::jaro_winkler;
use tracing::info;

use crate::{note, read_records, role_company_key};

/// Role pairs at or above this score are reported for review.
pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.92;

static_regex!(
    re_term_shaped,
    r"(?i)^(?:spring|summer|fall|winter|year[-\s]?round)\s*20\d{2}$"
);
static_regex!(re_iso_date, r"^\d{4}-\d{2}-\d{2}$");

fn term_shaped(value: &str) -> bool {
    re_term_shaped().is_match(value.trim())
}

/// `Mon Sep 15 2025 09:12:44 GMT-0400 (Eastern Daylight Time)` → `2025-09-15`.
fn parse_long_date(value: &str) -> Option<NaiveDate> {
    let head = value.split_whitespace().take(4).collect::<Vec<_>>().join(" ");
    NaiveDate::parse_from_str(&head, "%a %b %d %Y").ok()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub rows_scanned: usize,
    pub swapped_rows: Vec<usize>,
    pub dates_rewritten: Vec<usize>,
}

impl CleanupReport {
    pub fn rows_fixed(&self) -> usize {
        let mut rows: Vec<usize> = self
            .swapped_rows
            .iter()
            .chain(&self.dates_rewritten)
            .copied()
            .collect();
        rows.sort_unstable();
        rows.dedup();
        rows.len()
    }
}

/// Swap Company and Term where a term landed in the company column, and
/// rewrite legacy long-form dates to `yyyy-MM-dd`.
pub async fn cleanup_existing_data(
    sheet: &mut dyn TrackerSheet,
    log: &mut dyn ActivityLog,
    config: &TrackerConfig,
    now: DateTime<Utc>,
) -> Result<CleanupReport> {
    let layout = &config.columns;
    let records = read_records(sheet, layout).await?;
    let mut report = CleanupReport {
        rows_scanned: records.len(),
        ..Default::default()
    };

    for (row, record) in &records {
        let row = *row;
        let mut fixes = Vec::new();

        if term_shaped(&record.company) && !term_shaped(&record.term) {
            sheet
                .set_value(row, layout.column(RecordField::Company), &record.term)
                .await
                .with_context(|| format!("swapping company at row {row}"))?;
            sheet
                .set_value(row, layout.column(RecordField::Term), &record.company)
                .await
                .with_context(|| format!("swapping term at row {row}"))?;
            fixes.push(format!(
                "swapped Company/Term: \"{}\" <-> \"{}\"",
                record.term, record.company
            ));
            report.swapped_rows.push(row);
        }

        let date = record.date_applied.as_str();
        if !date.is_empty() && !re_iso_date().is_match(date) {
            if let Some(parsed) = parse_long_date(date) {
                let formatted = parsed.format("%Y-%m-%d").to_string();
                sheet
                    .set_value(row, layout.column(RecordField::DateApplied), &formatted)
                    .await
                    .with_context(|| format!("rewriting date at row {row}"))?;
                fixes.push(format!("date \"{date}\" -> {formatted}"));
                report.dates_rewritten.push(row);
            }
        }

        if !fixes.is_empty() {
            note(log, now, &format!("Fixed row {row}: {}", fixes.join(", "))).await;
        }
    }

    let summary = match report.rows_fixed() {
        0 => "No data issues found to fix".to_string(),
        n => format!("Cleaned up {n} rows with data issues"),
    };
    note(log, now, &summary).await;
    info!(
        scanned = report.rows_scanned,
        swapped = report.swapped_rows.len(),
        dates = report.dates_rewritten.len(),
        "cleanup finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnIssue {
    pub row: usize,
    pub field: RecordField,
    pub value: String,
    pub problem: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearDuplicate {
    pub row_a: usize,
    pub row_b: usize,
    pub role_a: String,
    pub role_b: String,
    pub company: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub rows_scanned: usize,
    pub issues: Vec<ColumnIssue>,
    pub near_duplicates: Vec<NearDuplicate>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.near_duplicates.is_empty()
    }
}

/// Report misplaced values per row plus role pairs under one company that
/// look like the same application.
pub async fn validate_column_data(
    sheet: &dyn TrackerSheet,
    log: &mut dyn ActivityLog,
    config: &TrackerConfig,
    now: DateTime<Utc>,
) -> Result<ValidationReport> {
    let records = read_records(sheet, &config.columns).await?;
    let mut report = ValidationReport {
        rows_scanned: records.len(),
        ..Default::default()
    };

    for (row, record) in &records {
        let checks = [
            (RecordField::Role, &record.role, term_shaped(&record.role), "role holds a term"),
            (
                RecordField::Company,
                &record.company,
                term_shaped(&record.company),
                "company holds a term",
            ),
            (
                RecordField::Term,
                &record.term,
                !record.term.is_empty() && !term_shaped(&record.term),
                "term is not a season and year",
            ),
            (
                RecordField::DateApplied,
                &record.date_applied,
                !record.date_applied.is_empty() && !re_iso_date().is_match(&record.date_applied),
                "date applied is not yyyy-MM-dd",
            ),
        ];
        for (field, value, failed, problem) in checks {
            if failed {
                report.issues.push(ColumnIssue {
                    row: *row,
                    field,
                    value: value.clone(),
                    problem,
                });
            }
        }
    }

    let mut by_company: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, (_, record)) in records.iter().enumerate() {
        let company = record.company.trim();
        if company.is_empty() || config.sentinels.is_unknown(company) {
            continue;
        }
        by_company.entry(normalize_key(company)).or_default().push(i);
    }
    for members in by_company.values() {
        for (pos, &i) in members.iter().enumerate() {
            for &j in &members[pos + 1..] {
                let (row_a, a) = &records[i];
                let (row_b, b) = &records[j];
                if config.sentinels.is_unknown(&a.role) || config.sentinels.is_unknown(&b.role) {
                    continue;
                }
                if role_company_key(&a.role, &a.company) == role_company_key(&b.role, &b.company) {
                    continue;
                }
                let score = jaro_winkler(&normalize_key(&a.role), &normalize_key(&b.role));
                if score >= NEAR_DUPLICATE_THRESHOLD {
                    report.near_duplicates.push(NearDuplicate {
                        row_a: *row_a,
                        row_b: *row_b,
                        role_a: a.role.clone(),
                        role_b: b.role.clone(),
                        company: a.company.clone(),
                        score,
                    });
                }
            }
        }
    }

    for issue in &report.issues {
        note(
            log,
            now,
            &format!(
                "Row {} {}: {} \"{}\"",
                issue.row,
                issue.field.label(),
                issue.problem,
                issue.value
            ),
        )
        .await;
    }
    for dup in &report.near_duplicates {
        note(
            log,
            now,
            &format!(
                "Possible duplicate at {}: rows {} and {} (\"{}\" vs \"{}\", score {:.2})",
                dup.company, dup.row_a, dup.row_b, dup.role_a, dup.role_b, dup.score
            ),
        )
        .await;
    }
    let summary = if report.is_clean() {
        "All rows have correct column data placement".to_string()
    } else {
        format!(
            "Found {} column issues and {} possible duplicates",
            report.issues.len(),
            report.near_duplicates.len()
        )
    };
    note(log, now, &summary).await;
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutMismatch {
    pub field: RecordField,
    pub header: &'static str,
    pub expected: usize,
    pub actual: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LayoutReport {
    pub header: Vec<String>,
    pub mismatches: Vec<LayoutMismatch>,
}

impl LayoutReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare the header row with the configured column positions.
pub async fn verify_sheet_layout(
    sheet: &dyn TrackerSheet,
    log: &mut dyn ActivityLog,
    config: &TrackerConfig,
    now: DateTime<Utc>,
) -> Result<LayoutReport> {
    let last_col = sheet.last_column().await.context("reading tracker width")?;
    let header = if last_col == 0 {
        Vec::new()
    } else {
        sheet
            .values(1, 1, 1, last_col)
            .await
            .context("reading header row")?
            .into_iter()
            .next()
            .unwrap_or_default()
    };

    let mut report = LayoutReport {
        header: header.clone(),
        mismatches: Vec::new(),
    };
    for field in config.columns.fields() {
        let expected = config.columns.column(field);
        let label = match field {
            RecordField::ThreadId => config.thread_header.as_str(),
            other => other.label(),
        };
        let actual = header
            .iter()
            .position(|cell| match field {
                RecordField::ThreadId => cell.trim() == label,
                _ => cell.to_lowercase().contains(&label.to_lowercase()),
            })
            .map(|i| i + 1);
        if actual != Some(expected) {
            report.mismatches.push(LayoutMismatch {
                field,
                header: field.label(),
                expected,
                actual,
            });
        }
    }

    note(log, now, &format!("Sheet layout: {} columns", header.len())).await;
    for (i, cell) in header.iter().enumerate() {
        note(log, now, &format!("Column {}: \"{cell}\"", i + 1)).await;
    }
    for mismatch in &report.mismatches {
        let actual = mismatch
            .actual
            .map_or_else(|| "not found".to_string(), |c| c.to_string());
        note(
            log,
            now,
            &format!(
                "{}: expected column {}, found {actual}",
                mismatch.header, mismatch.expected
            ),
        )
        .await;
    }
    if report.is_ok() {
        note(log, now, "Column layout matches configuration").await;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptrack_storage::{MemoryActivityLog, MemorySheet, SheetData};

    const HEADER: [&str; 14] = [
        "Progress",
        "Role",
        "Company",
        "Term",
        "Location",
        "Recruiters?",
        "First Round",
        "Second Round",
        "Third Round",
        "Thank You Email?",
        "Offer",
        "Date Applied",
        "Platform",
        "Thread ID",
    ];

    fn sheet(rows: &[[&str; 14]]) -> MemorySheet {
        let mut all = vec![HEADER.iter().map(|s| s.to_string()).collect::<Vec<_>>()];
        all.extend(rows.iter().map(|r| r.iter().map(|s| s.to_string()).collect()));
        MemorySheet::new("Tracker", SheetData::from_rows(all))
    }

    fn row<'a>(role: &'a str, company: &'a str, term: &'a str, date: &'a str) -> [&'a str; 14] {
        [
            "In Progress", role, company, term, "Not Specified", "No", "No", "No", "No", "No",
            "No", date, "Email", "",
        ]
    }

    #[test]
    fn long_dates_parse_from_leading_tokens() {
        assert_eq!(
            parse_long_date("Mon Sep 15 2025 09:12:44 GMT-0400 (Eastern Daylight Time)"),
            NaiveDate::from_ymd_opt(2025, 9, 15)
        );
        assert_eq!(parse_long_date("sometime last fall"), None);
    }

    #[tokio::test]
    async fn cleanup_swaps_terms_and_fixes_dates() {
        let mut sheet = sheet(&[
            row("Data Analyst", "Fall 2026", "LiveRamp", "2026-09-01"),
            row("Engineer", "Acme", "Spring 2026", "Tue Sep 16 2025 10:00:00 GMT-0400"),
            row("Engineer", "Acme", "Spring 2026", "2026-09-02"),
        ]);
        let mut log = MemoryActivityLog::default();
        let report = cleanup_existing_data(&mut sheet, &mut log, &TrackerConfig::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.swapped_rows, vec![2]);
        assert_eq!(report.dates_rewritten, vec![3]);
        assert_eq!(sheet.data().cell(2, 3), "LiveRamp");
        assert_eq!(sheet.data().cell(2, 4), "Fall 2026");
        assert_eq!(sheet.data().cell(3, 12), "2025-09-16");
        assert_eq!(log.messages().last().copied(), Some("Cleaned up 2 rows with data issues"));

        let mut log = MemoryActivityLog::default();
        let again = cleanup_existing_data(&mut sheet, &mut log, &TrackerConfig::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(again.rows_fixed(), 0);
        assert_eq!(log.messages(), vec!["No data issues found to fix"]);
    }

    #[tokio::test]
    async fn validation_reports_issues_and_near_duplicates() {
        let sheet = sheet(&[
            row("Software Engineer Intern", "Acme", "Fall 2026", "2026-09-01"),
            row("Software Engineer Interns", "ACME", "Fall 2026", "2026-09-03"),
            row("Software Engineer - Intern", "Acme", "Fall 2026", "2026-09-04"),
            row("Fall 2026", "Globex", "Remote", "Sep 5"),
        ]);
        let mut log = MemoryActivityLog::default();
        let report = validate_column_data(&sheet, &mut log, &TrackerConfig::default(), Utc::now())
            .await
            .unwrap();

        let problems: Vec<(usize, RecordField)> =
            report.issues.iter().map(|i| (i.row, i.field)).collect();
        assert_eq!(
            problems,
            vec![
                (5, RecordField::Role),
                (5, RecordField::Term),
                (5, RecordField::DateApplied),
            ]
        );
        let pairs: Vec<(usize, usize)> = report
            .near_duplicates
            .iter()
            .map(|d| (d.row_a, d.row_b))
            .collect();
        assert_eq!(pairs, vec![(2, 3), (3, 4)]);
        assert!(report.near_duplicates.iter().all(|d| d.score >= NEAR_DUPLICATE_THRESHOLD));
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn layout_check_flags_moved_columns() {
        let ok = sheet(&[]);
        let mut log = MemoryActivityLog::default();
        let report = verify_sheet_layout(&ok, &mut log, &TrackerConfig::default(), Utc::now())
            .await
            .unwrap();
        assert!(report.is_ok(), "{:?}", report.mismatches);

        let mut swapped = HEADER;
        swapped.swap(2, 3);
        swapped[13] = "Notes";
        let moved = MemorySheet::new(
            "Tracker",
            SheetData::from_rows(vec![swapped.iter().map(|s| s.to_string()).collect()]),
        );
        let mut log = MemoryActivityLog::default();
        let report = verify_sheet_layout(&moved, &mut log, &TrackerConfig::default(), Utc::now())
            .await
            .unwrap();
        let found: Vec<(RecordField, Option<usize>)> =
            report.mismatches.iter().map(|m| (m.field, m.actual)).collect();
        assert_eq!(
            found,
            vec![
                (RecordField::Company, Some(4)),
                (RecordField::Term, Some(3)),
                (RecordField::ThreadId, None),
            ]
        );
        assert!(log
            .messages()
            .contains(&"Thread ID: expected column 14, found not found"));
    }
}

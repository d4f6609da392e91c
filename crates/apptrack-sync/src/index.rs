use std::collections::HashMap;

use apptrack_core::{normalize_key, ApplicationRecord, Sentinels};
use serde::Serialize;

/// Which index produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchVia {
    ThreadId,
    Key,
    UnknownKey,
}

/// In-memory lookup structures over the tracker rows, rebuilt at the start of
/// every run and kept current as rows are inserted or merged. The first row
/// registered under a key stays canonical.
#[derive(Debug, Default)]
pub struct DedupIndex {
    by_thread_id: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
    by_unknown_key: HashMap<String, usize>,
}

pub fn role_company_key(role: &str, company: &str) -> String {
    format!("{}|{}", normalize_key(role), normalize_key(company))
}

pub fn unknown_role_key(company: &str, date_applied: &str) -> String {
    format!("unknown|{}|{}", normalize_key(company), normalize_key(date_applied))
}

fn or_sentinel<'a>(value: &'a str, sentinel: &'a str) -> &'a str {
    if value.trim().is_empty() {
        sentinel
    } else {
        value
    }
}

impl DedupIndex {
    pub fn build<'a>(
        rows: impl IntoIterator<Item = (usize, &'a ApplicationRecord)>,
        sentinels: &Sentinels,
    ) -> Self {
        let mut index = Self::default();
        for (row, record) in rows {
            index.register(row, record, sentinels);
        }
        index
    }

    /// Register every key the record currently qualifies for. Keys already
    /// held by another row are left alone.
    pub fn register(&mut self, row: usize, record: &ApplicationRecord, sentinels: &Sentinels) {
        if let Some(thread_id) = record.thread_id.as_deref().filter(|t| !t.is_empty()) {
            self.by_thread_id.entry(thread_id.to_string()).or_insert(row);
        }
        let role = or_sentinel(&record.role, &sentinels.unknown);
        let company = or_sentinel(&record.company, &sentinels.unknown);
        if sentinels.is_unknown(role) {
            self.by_unknown_key
                .entry(unknown_role_key(company, &record.date_applied))
                .or_insert(row);
        } else {
            self.by_key
                .entry(role_company_key(role, company))
                .or_insert(row);
        }
    }

    /// Point a thread id at the row it was actually found on.
    pub fn relocate_thread(&mut self, thread_id: &str, row: usize) {
        self.by_thread_id.insert(thread_id.to_string(), row);
    }

    pub fn thread_row(&self, thread_id: &str) -> Option<usize> {
        self.by_thread_id.get(thread_id).copied()
    }

    /// Secondary lookup: role+company when the role is known, otherwise
    /// company+date under the unknown-role key.
    pub fn key_row(
        &self,
        role: &str,
        company: &str,
        date_applied: &str,
        sentinels: &Sentinels,
    ) -> Option<(usize, MatchVia)> {
        let role = or_sentinel(role, &sentinels.unknown);
        let company = or_sentinel(company, &sentinels.unknown);
        if sentinels.is_unknown(role) {
            self.by_unknown_key
                .get(&unknown_role_key(company, date_applied))
                .map(|row| (*row, MatchVia::UnknownKey))
        } else {
            self.by_key
                .get(&role_company_key(role, company))
                .map(|row| (*row, MatchVia::Key))
        }
    }

    pub fn thread_count(&self) -> usize {
        self.by_thread_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptrack_core::{Milestones, Progress};

    fn record(role: &str, company: &str, date: &str, thread: Option<&str>) -> ApplicationRecord {
        ApplicationRecord {
            progress: Progress::InProgress,
            role: role.into(),
            company: company.into(),
            term: "Spring 2026".into(),
            location: "Not Specified".into(),
            milestones: Milestones::all("No"),
            date_applied: date.into(),
            platform: "Email".into(),
            thread_id: thread.map(str::to_string),
        }
    }

    #[test]
    fn keys_are_normalized_on_both_sides() {
        let s = Sentinels::default();
        let rows = [record("Software Engineer - Intern", "Acme, Inc.", "2026-09-01", None)];
        let index = DedupIndex::build(rows.iter().enumerate().map(|(i, r)| (i + 2, r)), &s);
        assert_eq!(
            index.key_row("software engineer intern", "ACME Inc", "2026-09-02", &s),
            Some((2, MatchVia::Key))
        );
    }

    #[test]
    fn unknown_roles_are_keyed_by_company_and_date() {
        let s = Sentinels::default();
        let rows = [
            record("Unknown", "Acme", "2026-09-01", Some("T1")),
            record("", "Globex", "2026-09-01", None),
        ];
        let index = DedupIndex::build(rows.iter().enumerate().map(|(i, r)| (i + 2, r)), &s);
        assert_eq!(
            index.key_row("Unknown", "Acme", "2026-09-01", &s),
            Some((2, MatchVia::UnknownKey))
        );
        assert_eq!(index.key_row("Unknown", "Acme", "2026-09-02", &s), None);
        assert_eq!(
            index.key_row("unknown", "globex", "2026-09-01", &s),
            Some((3, MatchVia::UnknownKey))
        );
        assert_eq!(index.thread_row("T1"), Some(2));
        assert_eq!(index.thread_count(), 1);
    }

    #[test]
    fn first_registered_row_stays_canonical() {
        let s = Sentinels::default();
        let rows = [
            record("Analyst", "Acme", "2026-09-01", Some("T1")),
            record("Analyst", "Acme", "2026-09-05", Some("T1")),
        ];
        let mut index = DedupIndex::build(rows.iter().enumerate().map(|(i, r)| (i + 2, r)), &s);
        assert_eq!(index.key_row("Analyst", "Acme", "", &s), Some((2, MatchVia::Key)));
        assert_eq!(index.thread_row("T1"), Some(2));
        index.relocate_thread("T1", 3);
        assert_eq!(index.thread_row("T1"), Some(3));
    }
}

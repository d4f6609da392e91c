//! Field merge policy, progress coercion and highlight derivation.

use apptrack_core::{
    ApplicationDraft, ApplicationRecord, ColumnLayout, HighlightColors, Milestones, Progress,
    RecordField, Sentinels, TrackerConfig, IN_PROGRESS,
};
use apptrack_storage::MailQuery;
use chrono::NaiveDate;
use serde::Serialize;

/// Sentinel-filled view of a draft, ready to be merged or inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub thread_id: String,
    pub role: String,
    pub company: String,
    pub term: String,
    pub term_observed: bool,
    pub location: String,
    pub location_observed: bool,
    pub date_applied: String,
    pub date_observed: bool,
}

impl Candidate {
    pub fn from_draft(draft: &ApplicationDraft, sentinels: &Sentinels, today: NaiveDate) -> Self {
        let date = draft.date_applied.value;
        Self {
            thread_id: draft.thread_id.clone(),
            role: draft.role.value_or(&sentinels.unknown).to_string(),
            company: draft.company.value_or(&sentinels.unknown).to_string(),
            term: draft.term.value_or(&sentinels.default_term).to_string(),
            term_observed: draft.term.is_observed(),
            location: draft.location.value_or(&sentinels.default_location).to_string(),
            location_observed: draft.location.is_observed(),
            date_applied: date.unwrap_or(today).format("%Y-%m-%d").to_string(),
            date_observed: date.is_some(),
        }
    }

    /// Fresh tracker row for an unmatched candidate.
    pub fn to_record(&self, progress: &str, sentinels: &Sentinels) -> ApplicationRecord {
        ApplicationRecord {
            progress: Progress::parse(progress),
            role: self.role.clone(),
            company: self.company.clone(),
            term: self.term.clone(),
            location: self.location.clone(),
            milestones: Milestones::all(&sentinels.no),
            date_applied: self.date_applied.clone(),
            platform: sentinels.platform.clone(),
            thread_id: Some(self.thread_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: RecordField,
    pub from: String,
    pub to: String,
}

fn role_refines(prev: &str, new: &str, sentinels: &Sentinels) -> bool {
    if sentinels.is_unknown(new) {
        return prev.is_empty();
    }
    if prev.is_empty() || sentinels.is_unknown(prev) {
        return true;
    }
    new.chars().count() > prev.chars().count()
        && new.to_lowercase().starts_with(&prev.to_lowercase())
}

fn company_refines(prev: &str, new: &str, sentinels: &Sentinels) -> bool {
    if sentinels.is_unknown(new) {
        return prev.is_empty();
    }
    true
}

fn term_refines(prev: &str, candidate: &Candidate, sentinels: &Sentinels) -> bool {
    if prev.is_empty() || prev == sentinels.default_term {
        return true;
    }
    candidate.term_observed && !sentinels.is_unknown(&candidate.term)
}

fn location_refines(prev: &str, candidate: &Candidate, sentinels: &Sentinels) -> bool {
    if prev.is_empty() || prev == sentinels.default_location {
        return true;
    }
    candidate.location_observed && !sentinels.is_default_location(&candidate.location)
}

fn date_refines(prev: &str, candidate: &Candidate) -> bool {
    prev.is_empty() || candidate.date_observed
}

/// Field-level changes the merge policy allows for `existing`, in column order
/// Progress, Role, Company, Term, Location, Date Applied, Thread ID. Values equal
/// to what the record already holds never produce a change.
pub fn merge_fields(
    existing: &ApplicationRecord,
    candidate: &Candidate,
    progress: &str,
    sentinels: &Sentinels,
) -> Vec<FieldChange> {
    let proposals = [
        (
            RecordField::Progress,
            progress,
            !existing.progress.is_in_progress(),
        ),
        (
            RecordField::Role,
            candidate.role.as_str(),
            role_refines(&existing.role, &candidate.role, sentinels),
        ),
        (
            RecordField::Company,
            candidate.company.as_str(),
            company_refines(&existing.company, &candidate.company, sentinels),
        ),
        (
            RecordField::Term,
            candidate.term.as_str(),
            term_refines(&existing.term, candidate, sentinels),
        ),
        (
            RecordField::Location,
            candidate.location.as_str(),
            location_refines(&existing.location, candidate, sentinels),
        ),
        (
            RecordField::DateApplied,
            candidate.date_applied.as_str(),
            date_refines(&existing.date_applied, candidate),
        ),
        (
            RecordField::ThreadId,
            candidate.thread_id.as_str(),
            existing.thread_id.is_none() && !candidate.thread_id.is_empty(),
        ),
    ];

    proposals
        .into_iter()
        .filter(|(_, _, allowed)| *allowed)
        .filter_map(|(field, to, _)| {
            let from = existing.get(field);
            (from != to).then(|| FieldChange {
                field,
                from: from.to_string(),
                to: to.to_string(),
            })
        })
        .collect()
}

/// Human-readable diff for the activity log, e.g. `Role→Data Analyst, ThreadID set`.
pub fn describe_changes(changes: &[FieldChange]) -> String {
    if changes.is_empty() {
        return "no field changes".to_string();
    }
    changes
        .iter()
        .map(|change| match change.field {
            RecordField::ThreadId => "ThreadID set".to_string(),
            field => format!("{}→{}", field.label(), change.to),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Accepted progress values read from the tracker's validation list, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressVocabulary {
    accepted: Option<Vec<String>>,
}

impl ProgressVocabulary {
    pub fn new(accepted: Option<Vec<String>>) -> Self {
        Self {
            accepted: accepted.filter(|values| !values.is_empty()),
        }
    }

    /// Resolve the canonical in-progress value against the accepted list.
    /// Falls back to the canonical spelling when the list is absent or holds
    /// neither the canonical value nor a known alias.
    pub fn resolve(&self, aliases: &[String]) -> String {
        let Some(accepted) = &self.accepted else {
            return IN_PROGRESS.to_string();
        };
        if accepted.iter().any(|v| v.trim() == IN_PROGRESS) {
            return IN_PROGRESS.to_string();
        }
        if let Some(v) = accepted
            .iter()
            .find(|v| v.trim().eq_ignore_ascii_case(IN_PROGRESS))
        {
            return v.trim().to_string();
        }
        aliases
            .iter()
            .find_map(|alias| {
                accepted
                    .iter()
                    .find(|v| v.trim().eq_ignore_ascii_case(alias.trim()))
            })
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| IN_PROGRESS.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighlightDirective {
    pub col: usize,
    /// `None` clears the background.
    pub color: Option<String>,
}

/// Background state for the progress and milestone cells of one record.
pub fn highlight_directives(
    record: &ApplicationRecord,
    layout: &ColumnLayout,
    colors: &HighlightColors,
    sentinels: &Sentinels,
    aliases: &[String],
) -> Vec<HighlightDirective> {
    let mut directives = Vec::with_capacity(1 + RecordField::MILESTONES.len());
    directives.push(HighlightDirective {
        col: layout.column(RecordField::Progress),
        color: record
            .progress
            .looks_in_progress(aliases)
            .then(|| colors.in_progress.clone()),
    });
    for field in RecordField::MILESTONES {
        directives.push(HighlightDirective {
            col: layout.column(field),
            color: (record.get(field) == sentinels.yes).then(|| colors.yes.clone()),
        });
    }
    directives
}

/// Message-source query for this run; `watermark` is epoch seconds.
pub fn build_query(config: &TrackerConfig, watermark: Option<i64>) -> MailQuery {
    MailQuery {
        after: watermark,
        newer_than_days: config.newer_than_days,
        exclude_label: Some(config.processed_label.clone()),
        phrases: config.query_phrases.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptrack_core::{EvidenceRef, Field};
    use chrono::Utc;

    fn sentinels() -> Sentinels {
        Sentinels::default()
    }

    fn existing() -> ApplicationRecord {
        ApplicationRecord {
            progress: Progress::InProgress,
            role: "Software Engineer".into(),
            company: "Acme".into(),
            term: "Fall 2026".into(),
            location: "Austin, TX".into(),
            milestones: Milestones::all("No"),
            date_applied: "2026-09-01".into(),
            platform: "Email".into(),
            thread_id: Some("T1".into()),
        }
    }

    fn candidate() -> Candidate {
        Candidate {
            thread_id: "T1".into(),
            role: "Software Engineer".into(),
            company: "Acme".into(),
            term: "Fall 2026".into(),
            term_observed: true,
            location: "Austin, TX".into(),
            location_observed: true,
            date_applied: "2026-09-01".into(),
            date_observed: true,
        }
    }

    fn fields(changes: &[FieldChange]) -> Vec<RecordField> {
        changes.iter().map(|c| c.field).collect()
    }

    #[test]
    fn identical_candidate_produces_no_changes() {
        assert!(merge_fields(&existing(), &candidate(), IN_PROGRESS, &sentinels()).is_empty());
    }

    #[test]
    fn role_only_refines_by_prefix_extension() {
        let s = sentinels();
        let mut c = candidate();
        c.role = "Software Engineer Intern".into();
        let changes = merge_fields(&existing(), &c, IN_PROGRESS, &s);
        assert_eq!(changes[0].to, "Software Engineer Intern");

        c.role = "Data Analyst".into();
        assert!(merge_fields(&existing(), &c, IN_PROGRESS, &s).is_empty());

        c.role = "Unknown".into();
        assert!(merge_fields(&existing(), &c, IN_PROGRESS, &s).is_empty());

        let mut unknown = existing();
        unknown.role = "Unknown".into();
        c.role = "Unknown".into();
        assert!(merge_fields(&unknown, &c, IN_PROGRESS, &s).is_empty());
        c.role = "Data Analyst".into();
        assert_eq!(
            fields(&merge_fields(&unknown, &c, IN_PROGRESS, &s)),
            vec![RecordField::Role]
        );
    }

    #[test]
    fn company_never_regresses_to_unknown() {
        let s = sentinels();
        let mut c = candidate();
        c.company = "Unknown".into();
        assert!(merge_fields(&existing(), &c, IN_PROGRESS, &s).is_empty());
        c.company = "Acme Robotics".into();
        assert_eq!(
            fields(&merge_fields(&existing(), &c, IN_PROGRESS, &s)),
            vec![RecordField::Company]
        );
    }

    #[test]
    fn default_term_is_refined_but_defaults_never_overwrite() {
        let s = sentinels();
        let mut record = existing();
        record.term = "Spring 2026".into();
        let c = candidate();
        assert_eq!(
            merge_fields(&record, &c, IN_PROGRESS, &s),
            vec![FieldChange {
                field: RecordField::Term,
                from: "Spring 2026".into(),
                to: "Fall 2026".into(),
            }]
        );

        let mut defaulted = candidate();
        defaulted.term = "Spring 2026".into();
        defaulted.term_observed = false;
        assert!(merge_fields(&existing(), &defaulted, IN_PROGRESS, &s).is_empty());
    }

    #[test]
    fn observed_default_looking_term_still_overwrites() {
        let mut c = candidate();
        c.term = "Spring 2026".into();
        let changes = merge_fields(&existing(), &c, IN_PROGRESS, &sentinels());
        assert_eq!(fields(&changes), vec![RecordField::Term]);
    }

    #[test]
    fn location_placeholder_is_refined_only_by_observed_values() {
        let s = sentinels();
        let mut record = existing();
        record.location = "Not Specified".into();
        let mut c = candidate();
        c.location = "Denver, CO".into();
        assert_eq!(
            fields(&merge_fields(&record, &c, IN_PROGRESS, &s)),
            vec![RecordField::Location]
        );

        c.location = "Not Specified".into();
        c.location_observed = false;
        assert!(merge_fields(&existing(), &c, IN_PROGRESS, &s).is_empty());
    }

    #[test]
    fn fallback_date_only_fills_empty_cells() {
        let s = sentinels();
        let mut c = candidate();
        c.date_applied = "2026-10-15".into();
        c.date_observed = false;
        assert!(merge_fields(&existing(), &c, IN_PROGRESS, &s).is_empty());

        let mut record = existing();
        record.date_applied.clear();
        assert_eq!(
            fields(&merge_fields(&record, &c, IN_PROGRESS, &s)),
            vec![RecordField::DateApplied]
        );
    }

    #[test]
    fn progress_is_restored_and_thread_id_back_filled() {
        let s = sentinels();
        let mut record = existing();
        record.progress = Progress::Other("Rejected".into());
        record.thread_id = None;
        let changes = merge_fields(&record, &candidate(), IN_PROGRESS, &s);
        assert_eq!(
            fields(&changes),
            vec![RecordField::Progress, RecordField::ThreadId]
        );
        assert_eq!(describe_changes(&changes), "Progress→In Progress, ThreadID set");

        record.progress = Progress::Other("In progess".into());
        record.thread_id = Some("T1".into());
        assert!(merge_fields(&record, &candidate(), "In progess", &s).is_empty());

        record.progress = Progress::parse("in progress");
        assert!(merge_fields(&record, &candidate(), IN_PROGRESS, &s).is_empty());
    }

    #[test]
    fn change_summary_uses_column_labels() {
        let mut c = candidate();
        c.date_applied = "2026-09-03".into();
        c.role = "Software Engineer Intern".into();
        let changes = merge_fields(&existing(), &c, IN_PROGRESS, &sentinels());
        assert_eq!(
            describe_changes(&changes),
            "Role→Software Engineer Intern, Date Applied→2026-09-03"
        );
    }

    #[test]
    fn vocabulary_prefers_canonical_then_alias() {
        let aliases = vec!["In progess".to_string()];
        assert_eq!(ProgressVocabulary::new(None).resolve(&aliases), IN_PROGRESS);
        assert_eq!(
            ProgressVocabulary::new(Some(vec!["In progess".into(), "Rejected".into()]))
                .resolve(&aliases),
            "In progess"
        );
        assert_eq!(
            ProgressVocabulary::new(Some(vec!["in progress".into()])).resolve(&aliases),
            "in progress"
        );
        assert_eq!(
            ProgressVocabulary::new(Some(vec!["Applied".into(), "Rejected".into()]))
                .resolve(&aliases),
            IN_PROGRESS
        );
        assert_eq!(ProgressVocabulary::new(Some(vec![])).resolve(&aliases), IN_PROGRESS);
    }

    #[test]
    fn highlights_follow_current_values() {
        let mut record = existing();
        record.milestones.round2 = "Yes".into();
        record.milestones.offer = "yes".into();
        let directives = highlight_directives(
            &record,
            &ColumnLayout::default(),
            &HighlightColors::default(),
            &sentinels(),
            &["In progess".to_string()],
        );
        assert_eq!(directives.len(), 7);
        assert_eq!(directives[0].color.as_deref(), Some("#FFF9C4"));
        let colored: Vec<usize> = directives
            .iter()
            .skip(1)
            .filter(|d| d.color.is_some())
            .map(|d| d.col)
            .collect();
        assert_eq!(colored, vec![8]);

        record.progress = Progress::Other("Rejected".into());
        let directives = highlight_directives(
            &record,
            &ColumnLayout::default(),
            &HighlightColors::default(),
            &sentinels(),
            &[],
        );
        assert_eq!(directives[0].color, None);
    }

    #[test]
    fn candidate_fills_sentinels_from_unobserved_fields() {
        let evidence = EvidenceRef {
            thread_id: "T9".into(),
            rule: "position_label".into(),
            snippet: "Position: Analyst".into(),
            extracted_at: Utc::now(),
            extractor_version: "test".into(),
        };
        let draft = ApplicationDraft {
            thread_id: "T9".into(),
            received_at: None,
            extractor_version: "test".into(),
            role: Field::with_value_and_evidence("Analyst".to_string(), evidence),
            company: Field::empty(),
            term: Field::empty(),
            location: Field::empty(),
            date_applied: Field::empty(),
        };
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let c = Candidate::from_draft(&draft, &sentinels(), today);
        assert_eq!(c.company, "Unknown");
        assert_eq!(c.term, "Spring 2026");
        assert!(!c.term_observed);
        assert_eq!(c.location, "Not Specified");
        assert_eq!(c.date_applied, "2026-10-15");
        assert!(!c.date_observed);

        let record = c.to_record("In progess", &sentinels());
        assert_eq!(record.progress.as_str(), "In progess");
        assert_eq!(
            c.to_record("in progress", &sentinels()).progress.as_str(),
            "in progress"
        );
        assert_eq!(record.milestones, Milestones::all("No"));
        assert_eq!(record.platform, "Email");
        assert_eq!(record.thread_id.as_deref(), Some("T9"));
    }

    #[test]
    fn query_excludes_processed_label() {
        let config = TrackerConfig::default();
        let query = build_query(&config, Some(1_760_000_000));
        let rendered = query.to_search_string();
        assert!(rendered.starts_with("after:1760000000 newer_than:2d -label:\"Jobs/Processed\" ("));
        assert!(rendered.contains("\"application received\" OR \"job application\""));
    }
}

//! Pattern-based field extraction from application-confirmation mail.
//!
//! Every extractor applies an ordered rule list and returns the first hit.
//! A `None` result means no rule matched and the caller falls back to the
//! configured sentinel; extraction never fails on unmatched text.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;

use apptrack_core::{ApplicationDraft, EvidenceRef, ExtractorConfig, Field};
use apptrack_storage::MailThread;

#[doc(hidden)]
pub use regex;

/// Lazily compiled pattern behind a zero-argument accessor.
#[macro_export]
macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static $crate::regex::Regex {
            static RE: std::sync::OnceLock<$crate::regex::Regex> = std::sync::OnceLock::new();
            RE.get_or_init(|| $crate::regex::Regex::new($pattern).expect("valid static pattern"))
        }
    };
}

mod company;
mod role;
mod term;
mod text;

pub use role::normalize_role_name;
pub use text::{message_text, sanitize_html};

pub const CRATE_NAME: &str = "apptrack-extract";
pub const EXTRACTOR_VERSION: &str = "apptrack-extract/1";

static_regex!(
    re_received_phrase,
    r"(?i)we(?:\s+have|'ve|’ve)\s+received\s+your\s+application"
);

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid {table} pattern: {source}")]
    Pattern {
        table: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// A candidate value and the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub value: String,
    pub rule: &'static str,
    pub snippet: String,
}

impl Extraction {
    fn new(value: impl Into<String>, rule: &'static str, snippet: &str) -> Self {
        Self {
            value: value.into(),
            rule,
            snippet: snippet.trim().chars().take(160).collect(),
        }
    }
}

/// Compiled phrase table. An empty table never matches.
#[derive(Debug, Clone)]
struct Vocabulary(Option<Regex>);

impl Vocabulary {
    fn build(
        table: &'static str,
        items: &[String],
        wrap: impl Fn(&str) -> String,
    ) -> Result<Self, ExtractError> {
        let items: Vec<&str> = items
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() {
            return Ok(Self(None));
        }
        let pattern = wrap(&items.join("|"));
        Regex::new(&pattern)
            .map(|re| Self(Some(re)))
            .map_err(|source| ExtractError::Pattern { table, source })
    }

    fn is_match(&self, text: &str) -> bool {
        self.0.as_ref().is_some_and(|re| re.is_match(text))
    }

    fn strip(&self, text: &str) -> String {
        match &self.0 {
            Some(re) => re.replace_all(text, " ").into_owned(),
            None => text.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldExtractor {
    role_keywords: Vocabulary,
    ats_contains: Vocabulary,
    ats_exact: Vocabulary,
    generic_senders: Vocabulary,
    display_suffixes: Vocabulary,
}

impl FieldExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractError> {
        let escaped: Vec<String> = config
            .display_name_suffixes
            .iter()
            .map(|s| regex::escape(s.trim()))
            .collect();
        Ok(Self {
            role_keywords: Vocabulary::build("role keyword", &config.role_keywords, |alts| {
                format!(r"(?i)\b(?:{alts})\b")
            })?,
            ats_contains: Vocabulary::build("ats domain", &config.ats_domains, |alts| {
                format!(r"(?i)(?:{alts})")
            })?,
            ats_exact: Vocabulary::build("ats domain", &config.ats_domains, |alts| {
                format!(r"(?i)^(?:{alts})$")
            })?,
            generic_senders: Vocabulary::build("generic sender", &config.generic_senders, |alts| {
                format!(r"(?i)(?:^|[^a-z])(?:{alts})s?(?:$|[^a-z])")
            })?,
            display_suffixes: Vocabulary::build("display suffix", &escaped, |alts| {
                format!(r"(?i)\b(?:{alts})\b")
            })?,
        })
    }

    /// Build the candidate record for the newest message of `thread`.
    /// Returns `None` for a thread without messages.
    pub fn draft(&self, thread: &MailThread, now: DateTime<Utc>, tz: Tz) -> Option<ApplicationDraft> {
        let message = thread.latest()?;
        let subject = message.subject.as_str();
        let body = message_text(message);
        let fallback_year = message.date.unwrap_or(now).with_timezone(&tz).year();

        let evidence = |rule: &str, snippet: &str| EvidenceRef {
            thread_id: thread.id.clone(),
            rule: rule.to_string(),
            snippet: snippet.to_string(),
            extracted_at: now,
            extractor_version: EXTRACTOR_VERSION.to_string(),
        };
        let field = |hit: Option<Extraction>| match hit {
            Some(hit) => Field::with_value_and_evidence(hit.value, evidence(hit.rule, &hit.snippet)),
            None => Field::empty(),
        };

        let date_applied = match message.date {
            Some(date) => Field::with_value_and_evidence(
                date.with_timezone(&tz).date_naive(),
                evidence("message_date", &date.to_rfc3339()),
            ),
            None => Field::empty(),
        };

        Some(ApplicationDraft {
            thread_id: thread.id.clone(),
            received_at: message.date,
            extractor_version: EXTRACTOR_VERSION.to_string(),
            role: field(self.role(subject, &body)),
            company: field(self.company(&message.from, subject, &body)),
            term: field(self.term(subject, &body, fallback_year)),
            location: field(self.location(&body)),
            date_applied,
        })
    }
}

/// Whole match and first capture group.
fn capture<'h>(re: &Regex, haystack: &'h str) -> Option<(&'h str, &'h str)> {
    let caps = re.captures(haystack)?;
    Some((caps.get(0)?.as_str(), caps.get(1)?.as_str()))
}

/// Upper-cases the first letter of every word, leaving the rest untouched.
fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

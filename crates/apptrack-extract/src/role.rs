use regex::Regex;

use crate::{capture, re_received_phrase, Extraction, FieldExtractor};

const UNKNOWN_ROLE: &str = "Unknown";

static_regex!(
    re_subject_received,
    r"(?i)Application (?:received|submitted)[^\-–—]*[-–—]\s*[^\-–—]+[-–—]\s*([^.\n]+)"
);
static_regex!(
    re_subject_thanks,
    r"(?i)Thanks for applying to .*?[-–—]\s*([^.\n]+)"
);
static_regex!(re_application_to_for, r"(?i)application to [^\n]+ for ([^.\n]+)\b");
static_regex!(
    re_received_for,
    r"(?i)received your (?:job )?application for ([^.\n]+)\b"
);
static_regex!(re_position_label, r"(?i)(?:Position|Job Title)\s*:\s*([^.\n]+)");
static_regex!(
    re_requisition,
    r"(?i)Job Application:.*?-\s*\d{3,8}\s*-\s*([^(]+)\("
);
static_regex!(
    re_on_the_way,
    r"(?i)Your application for ([^.\n]+?) is on the way"
);
static_regex!(
    re_subject_colon,
    r"(?i)Application (?:Received|Submitted):\s*([^.\n]+)"
);
static_regex!(re_subject_segments, r"[^a-zA-Z0-9\s\-]");
static_regex!(
    re_body_label,
    r"(?i)\b(?:position|role|job|title)\s*[:\-]\s*([^.\n\r]+)"
);
static_regex!(
    re_signature,
    r"(?i)(?:Best regards|Sincerely|Thanks)[^\n]*\n([^.\n]+)"
);
static_regex!(
    re_opportunity,
    r"(?i)\b(?:position|role|job|title|opportunity)\s*(?:of|as)?\s*([^.\n]+)"
);
static_regex!(
    re_interest,
    r"(?i)(?:interested in|looking for|applying for)\s+([^.\n]+)"
);

static_regex!(re_trailing_paren, r"\s*\([^)]*\)\s*$");
static_regex!(re_trailing_code, r"\s*[-–—_/:,|#]+\s*[A-Za-z]*\d[\w\-]*\s*$");
static_regex!(re_dangling_tail, r"[\s\-–—_/.,:;+|(’'\x22]+$");
static_regex!(re_dangling_head, r"^[\s\-–—_/.,:;+|)’'\x22]+");
static_regex!(re_whitespace, r"\s+");

#[derive(Clone, Copy)]
enum Scope {
    Subject,
    Body,
    Both,
}

/// Anchored capture rules, tried in order before the keyword heuristics.
const ANCHORED_RULES: [(&str, Scope, fn() -> &'static Regex); 8] = [
    ("subject_received_company_role", Scope::Subject, re_subject_received),
    ("subject_thanks_for_applying", Scope::Subject, re_subject_thanks),
    ("application_to_company_for_role", Scope::Both, re_application_to_for),
    ("received_application_for", Scope::Body, re_received_for),
    ("position_label", Scope::Both, re_position_label),
    ("requisition_code", Scope::Both, re_requisition),
    ("application_on_the_way", Scope::Body, re_on_the_way),
    ("subject_application_colon", Scope::Subject, re_subject_colon),
];

/// Canonical role name: trailing parentheticals, requisition codes and
/// dangling punctuation removed, whitespace collapsed. Idempotent.
pub fn normalize_role_name(raw: &str) -> String {
    let mut current = collapse(raw);
    loop {
        let mut next = re_trailing_paren().replace(&current, "").into_owned();
        next = re_trailing_code().replace(&next, "").into_owned();
        next = re_dangling_tail().replace(&next, "").into_owned();
        next = re_dangling_head().replace(&next, "").into_owned();
        next = collapse(&next);
        if next == current {
            break;
        }
        current = next;
    }
    if current.is_empty() {
        UNKNOWN_ROLE.to_string()
    } else {
        current
    }
}

fn collapse(text: &str) -> String {
    re_whitespace().replace_all(text.trim(), " ").into_owned()
}

fn role_hit(rule: &'static str, snippet: &str, raw: &str) -> Option<Extraction> {
    let value = normalize_role_name(raw);
    if value == UNKNOWN_ROLE {
        return None;
    }
    Some(Extraction::new(value, rule, snippet))
}

impl FieldExtractor {
    pub fn role(&self, subject: &str, body: &str) -> Option<Extraction> {
        let both = format!("{subject}\n{body}");
        for (rule, scope, re) in ANCHORED_RULES {
            let haystack = match scope {
                Scope::Subject => subject,
                Scope::Body => body,
                Scope::Both => both.as_str(),
            };
            if let Some(hit) =
                capture(re(), haystack).and_then(|(snippet, raw)| role_hit(rule, snippet, raw))
            {
                return Some(hit);
            }
        }

        if self.role_keywords.is_match(subject) {
            let hit = re_subject_segments()
                .split(subject)
                .map(str::trim)
                .filter(|segment| segment.len() > 5 && self.role_keywords.is_match(segment))
                .find_map(|segment| role_hit("subject_keyword_segment", segment, segment));
            if hit.is_some() {
                return hit;
            }
        }

        if let Some(hit) = capture(re_body_label(), body)
            .and_then(|(snippet, raw)| role_hit("body_role_label", snippet, raw))
        {
            return Some(hit);
        }

        if let Some(hit) = capture(re_signature(), body)
            .filter(|(_, raw)| self.role_keywords.is_match(raw))
            .and_then(|(snippet, raw)| role_hit("signature_line", snippet, raw))
        {
            return Some(hit);
        }

        if re_received_phrase().is_match(body) {
            for (rule, re) in [
                ("received_opportunity_phrase", re_opportunity()),
                ("received_interest_phrase", re_interest()),
            ] {
                if let Some(hit) = capture(re, body)
                    .filter(|(_, raw)| self.role_keywords.is_match(raw))
                    .and_then(|(snippet, raw)| role_hit(rule, snippet, raw))
                {
                    return Some(hit);
                }
            }
        }

        None
    }
}

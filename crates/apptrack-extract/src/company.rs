use crate::{capture, re_received_phrase, title_case, Extraction, FieldExtractor};

static_regex!(re_display_name, r#"^\s*"?([^"<]+?)"?\s*<[^>]+>"#);
static_regex!(re_angle_address, r"<([^>]+)>");
static_regex!(
    re_subject_thank_you,
    r"(?i)Thank you for your application to ([^.\n]+)"
);
static_regex!(
    re_subject_received,
    r"(?i)Application (?:received|submitted)\s*[-–—]\s*([^–—\-]+)\s*[-–—]"
);
static_regex!(
    re_thanks_for_applying,
    r"(?i)Thanks for applying to ([^\n–—\-]+?)(?:\s*[-–—]| for\b|\.|\n)"
);
static_regex!(re_application_to, r"(?i)application to ([^\n]+?) for [^\n.()]+");
static_regex!(
    re_received_context,
    r"\b(?i:at|to|for|about)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)"
);
static_regex!(
    re_team_context,
    r"\b(?i:recruitment team|team|all the best)\b[^.\n]*?\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)"
);
static_regex!(re_careers_at, r"(?im)Careers at ([A-Za-z0-9 &.'’\-]+?)\s*(?:,|$)");
static_regex!(
    re_signature_company,
    r"(?im)(?:Thanks|Sincerely|Regards|All the best)[^\n]*\n([A-Za-z0-9 &.'’\-]+?)\s*(?:,|$)"
);
static_regex!(
    re_subject_preposition,
    r"\b(?i:at|for|to)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)"
);
static_regex!(
    re_subject_before_role,
    r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)\s+(?i:Intern|Co.?op|Coop|Technician|Engineer)"
);
static_regex!(re_leading_the, r"(?i)^the\s+");
static_regex!(
    re_trailing_team,
    r"(?i)\s*\b(?:team|recruiting|careers|talent acquisition)\s*$"
);
static_regex!(re_spaces, r"\s+");

/// Leading "The" and trailing team words removed, spacing collapsed.
fn clean_company(raw: &str) -> String {
    let mut current = re_spaces().replace_all(raw.trim(), " ").into_owned();
    loop {
        let mut next = re_trailing_team().replace(&current, "").into_owned();
        next = re_leading_the().replace(&next, "").into_owned();
        next = next
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '!' | '"' | '\''))
            .to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sender_address(from: &str) -> &str {
    re_angle_address()
        .captures(from)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(from)
        .trim()
}

/// Registrable label of the sender host: `careers.acme.co.uk` gives `acme`.
fn domain_label(host: &str) -> Option<&str> {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let n = labels.len();
    if n < 2 {
        return None;
    }
    let second_level = matches!(labels[n - 2], "co" | "com" | "ac" | "org" | "net" | "gov" | "edu");
    if n >= 3 && second_level && labels[n - 1].len() == 2 {
        Some(labels[n - 3])
    } else {
        Some(labels[n - 2])
    }
}

impl FieldExtractor {
    fn plausible_company(&self, candidate: &str) -> bool {
        let len = candidate.chars().count();
        let despaced: String = candidate
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        (2..50).contains(&len)
            && candidate.split_whitespace().count() <= 6
            && candidate.chars().next().is_some_and(char::is_alphanumeric)
            && candidate.chars().any(char::is_alphabetic)
            && !self.generic_senders.is_match(candidate)
            && !self.generic_senders.is_match(&despaced)
            && !self.role_keywords.is_match(candidate)
            && !self.ats_exact.is_match(&despaced)
    }

    fn company_hit(&self, rule: &'static str, snippet: &str, raw: &str) -> Option<Extraction> {
        let value = clean_company(raw);
        self.plausible_company(&value)
            .then(|| Extraction::new(value, rule, snippet))
    }

    fn from_display_name(&self, from: &str) -> Option<Extraction> {
        let (snippet, display) = capture(re_display_name(), from)?;
        let stripped = self.display_suffixes.strip(display);
        self.company_hit("sender_display_name", snippet, &stripped)
    }

    fn from_received_context(&self, body: &str) -> Option<Extraction> {
        let phrase = re_received_phrase().find(body)?;
        let line_start = body[..phrase.start()].rfind('\n').map_or(0, |i| i + 1);
        let line_end = body[phrase.end()..]
            .find('\n')
            .map_or(body.len(), |i| phrase.end() + i);
        let line = &body[line_start..line_end];

        capture(re_received_context(), line)
            .and_then(|(snippet, raw)| self.company_hit("received_phrase_context", snippet, raw))
            .or_else(|| {
                capture(re_team_context(), body)
                    .and_then(|(snippet, raw)| self.company_hit("received_phrase_team", snippet, raw))
            })
    }

    fn from_subject_adjacency(&self, subject: &str) -> Option<Extraction> {
        [
            ("subject_preposition", re_subject_preposition()),
            ("subject_before_role", re_subject_before_role()),
        ]
        .into_iter()
        .find_map(|(rule, re)| {
            let (snippet, raw) = capture(re, subject)?;
            self.company_hit(rule, snippet, raw)
        })
    }

    fn from_sender_domain(&self, address: &str) -> Option<Extraction> {
        let (_, host) = address.rsplit_once('@')?;
        let host = host.trim().to_ascii_lowercase();
        if self.ats_contains.is_match(&host) {
            return None;
        }
        let label = domain_label(&host)?;
        if label.len() < 2 || self.generic_senders.is_match(label) {
            return None;
        }
        let value = title_case(&label.replace(['-', '_'], " "));
        Some(Extraction::new(value, "sender_domain", address))
    }

    fn from_sender_local_part(&self, address: &str) -> Option<Extraction> {
        let local = address.split('@').next()?.trim();
        let len = local.chars().count();
        if len <= 3 || len > 20 || !local.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return None;
        }
        if self.generic_senders.is_match(local) || self.ats_contains.is_match(local) {
            return None;
        }
        let value = title_case(&local.replace(['-', '_', '.'], " "));
        Some(Extraction::new(value, "sender_local_part", address))
    }

    pub fn company(&self, from: &str, subject: &str, body: &str) -> Option<Extraction> {
        let both = format!("{subject}\n{body}");

        if let Some(hit) = self.from_display_name(from) {
            return Some(hit);
        }

        let anchored = [
            ("subject_thank_you_application", re_subject_thank_you(), subject),
            ("subject_received_company", re_subject_received(), subject),
            ("thanks_for_applying", re_thanks_for_applying(), both.as_str()),
            ("application_to_company", re_application_to(), both.as_str()),
        ];
        for (rule, re, haystack) in anchored {
            if let Some(hit) =
                capture(re, haystack).and_then(|(snippet, raw)| self.company_hit(rule, snippet, raw))
            {
                return Some(hit);
            }
        }

        if let Some(hit) = self.from_received_context(body) {
            return Some(hit);
        }

        for (rule, re) in [
            ("careers_at", re_careers_at()),
            ("signature_company", re_signature_company()),
        ] {
            if let Some(hit) =
                capture(re, body).and_then(|(snippet, raw)| self.company_hit(rule, snippet, raw))
            {
                return Some(hit);
            }
        }

        if let Some(hit) = self.from_subject_adjacency(subject) {
            return Some(hit);
        }

        let address = sender_address(from);
        self.from_sender_domain(address)
            .or_else(|| self.from_sender_local_part(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptrack_core::ExtractorConfig;

    fn company(from: &str, subject: &str, body: &str) -> Option<String> {
        FieldExtractor::new(&ExtractorConfig::default())
            .unwrap()
            .company(from, subject, body)
            .map(|hit| hit.value)
    }

    #[test]
    fn display_name_suffixes_are_dropped() {
        assert_eq!(
            company("LiveRamp Careers <no-reply@myworkday.com>", "", "").as_deref(),
            Some("LiveRamp")
        );
        assert_eq!(
            company("\"The Boeing Company Recruiting\" <jobs@boeing.com>", "", "").as_deref(),
            Some("Boeing Company")
        );
    }

    #[test]
    fn ats_and_generic_display_names_are_rejected() {
        assert_eq!(
            company(
                "Workday <no-reply@myworkday.com>",
                "Thank you for your application to Duke Energy",
                ""
            )
            .as_deref(),
            Some("Duke Energy")
        );
        assert_eq!(
            company(
                "No Reply <noreply@greenhouse.io>",
                "Application received - Stripe - Backend Intern",
                ""
            )
            .as_deref(),
            Some("Stripe")
        );
    }

    #[test]
    fn body_phrasings_name_the_company() {
        assert_eq!(
            company(
                "noreply@greenhouse.io",
                "Confirmation",
                "Hello,\nWe have received your application for the role at Northwind Traders.\nBest"
            )
            .as_deref(),
            Some("Northwind Traders")
        );
        assert_eq!(
            company("noreply@greenhouse.io", "Update", "Visit Careers at Contoso, anytime.").as_deref(),
            Some("Contoso")
        );
        assert_eq!(
            company("noreply@lever.co", "Update", "Sincerely,\nThe Fabrikam Talent Acquisition Team\n").as_deref(),
            Some("Fabrikam")
        );
    }

    #[test]
    fn sender_domain_and_local_part_fallbacks() {
        assert_eq!(
            company("jobs@blue-origin.com", "Hello", "").as_deref(),
            Some("Blue Origin")
        );
        assert_eq!(
            company("recruiting@careers.acme.co.uk", "Hello", "").as_deref(),
            Some("Acme")
        );
        assert_eq!(
            company("tesla.jobs@gmail.com", "Hello", "").as_deref(),
            Some("Tesla Jobs")
        );
    }

    #[test]
    fn ats_senders_without_other_signals_are_unknown() {
        assert_eq!(
            company("noreply@greenhouse.io", "Your application", "We will review your materials."),
            None
        );
        assert_eq!(
            company("Do Not Reply <do-not-reply@myworkday.com>", "Your application", ""),
            None
        );
    }

    #[test]
    fn clean_company_is_stable() {
        assert_eq!(clean_company("  The Acme   Careers "), "Acme");
        assert_eq!(clean_company("Acme Recruiting Team"), "Acme");
        assert_eq!(clean_company("Theory Labs"), "Theory Labs");
    }
}

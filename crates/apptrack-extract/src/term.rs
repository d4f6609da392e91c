use crate::{capture, Extraction, FieldExtractor};

static_regex!(re_season, r"(?i)\b(spring|summer|fall|winter)\s?(20\d{2})\b");
static_regex!(
    re_month_year,
    r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s*\.?\s*(20\d{2})\b"
);
static_regex!(re_year_round, r"(?i)\byear[-\s]?round\b");
static_regex!(re_any_year, r"\b20\d{2}\b");

static_regex!(re_location_label, r"(?i)Location:\s*([^\n]+)");
static_regex!(
    re_based_in,
    r"(?i)\bbased in\s+([A-Za-z .\-]+,\s*[A-Z]{2})\b"
);
static_regex!(
    re_work_location,
    r"(?i)\b(?:work location|primary location)\s*:\s*([^\n]+)"
);

fn season_for_month(month: &str) -> &'static str {
    match month.get(..3).map(str::to_ascii_lowercase).as_deref() {
        Some("jan" | "feb" | "mar" | "apr" | "may") => "Spring",
        Some("jun" | "jul" | "aug") => "Summer",
        _ => "Fall",
    }
}

fn capitalized(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

impl FieldExtractor {
    /// Season and year, e.g. `Fall 2026` or `Year-Round 2026`. `fallback_year`
    /// is used by the year-round rule when the text carries no year.
    pub fn term(&self, subject: &str, body: &str, fallback_year: i32) -> Option<Extraction> {
        let text = format!("{subject}\n{body}");

        if let Some(caps) = re_season().captures(&text) {
            let value = format!("{} {}", capitalized(&caps[1]), &caps[2]);
            return Some(Extraction::new(value, "explicit_season", &caps[0]));
        }

        if let Some(caps) = re_month_year().captures(&text) {
            let value = format!("{} {}", season_for_month(&caps[1]), &caps[2]);
            return Some(Extraction::new(value, "month_year", &caps[0]));
        }

        if let Some(m) = re_year_round().find(&text) {
            let year = re_any_year()
                .find(&text)
                .map(|y| y.as_str().to_string())
                .unwrap_or_else(|| fallback_year.to_string());
            return Some(Extraction::new(
                format!("Year-Round {year}"),
                "year_round",
                m.as_str(),
            ));
        }

        None
    }

    pub fn location(&self, body: &str) -> Option<Extraction> {
        [
            ("location_label", re_location_label()),
            ("based_in_city_state", re_based_in()),
            ("work_location_label", re_work_location()),
        ]
        .into_iter()
        .find_map(|(rule, re)| {
            let (snippet, raw) = capture(re, body)?;
            let value = raw.trim();
            (!value.is_empty()).then(|| Extraction::new(value, rule, snippet))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptrack_core::ExtractorConfig;

    fn extractor() -> FieldExtractor {
        FieldExtractor::new(&ExtractorConfig::default()).unwrap()
    }

    fn term(subject: &str, body: &str) -> Option<String> {
        extractor().term(subject, body, 2030).map(|hit| hit.value)
    }

    #[test]
    fn explicit_season_is_canonicalized() {
        assert_eq!(term("FALL2026 internship", "").as_deref(), Some("Fall 2026"));
        assert_eq!(term("", "for the summer 2027 cohort").as_deref(), Some("Summer 2027"));
    }

    #[test]
    fn month_ranges_map_to_seasons() {
        assert_eq!(
            term("", "Co-op (January 2025 - May 2025)").as_deref(),
            Some("Spring 2025")
        );
        assert_eq!(term("", "Jan. 2026 Start").as_deref(), Some("Spring 2026"));
        assert_eq!(term("", "starting June 2026").as_deref(), Some("Summer 2026"));
        assert_eq!(term("", "Sept 2026 through Dec 2026").as_deref(), Some("Fall 2026"));
        assert_eq!(term("", "Marketing 2025 report"), None);
    }

    #[test]
    fn year_round_uses_text_year_then_fallback() {
        assert_eq!(
            term("Year-round engineering role", "Class of 2027").as_deref(),
            Some("Year-Round 2027")
        );
        assert_eq!(term("", "This is a year round position").as_deref(), Some("Year-Round 2030"));
    }

    #[test]
    fn no_term_signal_is_none() {
        assert_eq!(term("Application received", "Thanks for applying"), None);
    }

    #[test]
    fn location_rules_in_order() {
        let ex = extractor();
        assert_eq!(
            ex.location("Location: Boston, MA\nOther").map(|h| h.value).as_deref(),
            Some("Boston, MA")
        );
        assert_eq!(
            ex.location("The team is based in Salt Lake City, UT and hybrid.")
                .map(|h| h.value)
                .as_deref(),
            Some("Salt Lake City, UT")
        );
        assert_eq!(ex.location("Remote friendly"), None);
    }
}

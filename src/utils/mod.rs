use chrono::{NaiveDate, Utc};
use std::time::{Duration, Instant};
use tracing::info;

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Accepted input formats, tried in order. First successful parse wins.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y",
    "%d %b %Y", "%d/%m/%Y", "%d-%m-%Y", "%d%m%Y",
];

/// Canonical on-record date representation.
pub const CANONICAL_DATE_FORMAT: &str = "%d/%m/%Y";

pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Normalise a date string to `dd/mm/yyyy`. Exhausting the format list yields
/// `None` and the caller omits the field instead of aborting.
/// Idempotent: the canonical output is itself in the accepted format list.
pub fn normalize_date(raw: &str) -> Option<String> {
    parse_flexible_date(raw).map(|d| d.format(CANONICAL_DATE_FORMAT).to_string())
}

/// Whole years between the given date-of-birth string and today.
pub fn years_from_today(date_of_birth: &str) -> Option<i64> {
    let dob = parse_flexible_date(date_of_birth)?;
    let today = Utc::now().date_naive();
    today.years_since(dob).map(i64::from)
}

// ── Fuzzy string comparison ───────────────────────────────────────────────────

/// Trim + lowercase, the common prelude to every text probe.
pub fn clean_text(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Normalised Levenshtein similarity in [0, 1] on cleaned inputs.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&clean_text(a), &clean_text(b))
}

/// Fuzzy equality: similarity above `threshold`, or `b` extends `a`
/// (search pages routinely display the full name for a partial query).
pub fn safe_equals(a: &str, b: &str, threshold: f64) -> bool {
    let a = clean_text(a);
    let b = clean_text(b);
    strsim::normalized_levenshtein(&a, &b) > threshold || b.starts_with(&a)
}

// ── Timing ────────────────────────────────────────────────────────────────────

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_date_accepts_listed_formats() {
        for raw in [
            "2000-02-01",
            "2000/02/01",
            "20000201",
            "February 1, 2000",
            "Feb 1, 2000",
            "1 February 2000",
            "1 Feb 2000",
            "1/2/2000",
            "1-2-2000",
            "01022000",
        ] {
            assert_eq!(normalize_date(raw).as_deref(), Some("01/02/2000"), "{raw}");
        }
    }

    #[test]
    fn test_normalize_date_idempotent_on_own_output() {
        for raw in ["Feb 1, 2000", "2024-12-31", "7/6/1995"] {
            let once = normalize_date(raw).unwrap();
            assert_eq!(normalize_date(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_normalize_date_rejects_garbage() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("yesterday"), None);
        assert_eq!(normalize_date("32/13/2000"), None);
    }

    #[test]
    fn test_years_from_today_is_positive_for_past_dates() {
        let years = years_from_today("01/02/2000").unwrap();
        assert!(years >= 26, "got {years}");
    }

    #[test]
    fn test_safe_equals_symmetric_under_normalisation() {
        assert_eq!(safe_equals(" A ", "a", 0.85), safe_equals("a", "a", 0.85));
        assert!(safe_equals("  Lionel Messi ", "lionel messi", 0.9));
    }

    #[test]
    fn test_safe_equals_prefix_extension() {
        // "b starts with a" matters for search pages echoing the full name
        assert!(safe_equals("erling", "erling haaland", 0.99));
        assert!(!safe_equals("erling haaland", "erling", 0.99));
    }

    #[test]
    fn test_similarity_range() {
        assert!((similarity("abc", "abc") - 1.0).abs() < f64::EPSILON);
        assert!(similarity("abc", "xyz") < 0.5);
    }
}

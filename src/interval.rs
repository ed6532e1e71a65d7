//! Timeframe label normalization and duration ordering
//! Labels like "1D", "4h", "15m" are compared by their length in minutes

use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;

lazy_static! {
    /// `<number><unit>` labels, e.g. "15m", "4H", "1d"
    static ref INTERVAL_PATTERN: Regex = Regex::new(r"^(\d+)([mMhHdDwW])$")
        .expect("Failed to compile INTERVAL_PATTERN regex - this is a bug in the hardcoded pattern");
}

/// Unit of a timeframe label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeUnit {
    /// Length of one unit in minutes (month is a 30-day approximation)
    pub fn minutes(&self) -> u64 {
        match self {
            TimeUnit::Minute => 1,
            TimeUnit::Hour => 60,
            TimeUnit::Day => 1_440,
            TimeUnit::Week => 10_080,
            TimeUnit::Month => 43_200,
        }
    }

    /// Canonical suffix: minute/hour lower-cased, day/week/month upper-cased
    pub fn suffix(&self) -> char {
        match self {
            TimeUnit::Minute => 'm',
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'D',
            TimeUnit::Week => 'W',
            TimeUnit::Month => 'M',
        }
    }

    // "m" is minute and "M" is month, every other unit is case-insensitive
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'm' => Some(TimeUnit::Minute),
            'M' => Some(TimeUnit::Month),
            'h' | 'H' => Some(TimeUnit::Hour),
            'd' | 'D' => Some(TimeUnit::Day),
            'w' | 'W' => Some(TimeUnit::Week),
            _ => None,
        }
    }
}

/// Anything that carries a raw timeframe label
pub trait Timeframed {
    fn interval(&self) -> &str;
}

impl Timeframed for String {
    fn interval(&self) -> &str {
        self
    }
}

impl Timeframed for &str {
    fn interval(&self) -> &str {
        self
    }
}

/// Normalize a timeframe label to its canonical form.
///
/// Bare "D", "W" and "M" expand to "1D", "1W" and "1M". Labels that do not
/// match `<number><unit>` are returned unchanged.
pub fn normalize(label: &str) -> String {
    let trimmed = label.trim();

    match trimmed {
        "D" | "d" => return "1D".to_string(),
        "W" | "w" => return "1W".to_string(),
        "M" => return "1M".to_string(),
        _ => {}
    }

    match parse(trimmed) {
        Some((count, unit)) => format!("{}{}", count, unit.suffix()),
        None => label.to_string(),
    }
}

/// Duration of a label in minutes; unrecognized labels resolve to 0
pub fn duration_minutes(label: &str) -> u64 {
    parse(&normalize(label))
        .map(|(count, unit)| count.saturating_mul(unit.minutes()))
        .unwrap_or(0)
}

/// True when the label normalizes to a known, non-zero duration
pub fn is_recognized(label: &str) -> bool {
    duration_minutes(label) > 0
}

/// Compare two labels by duration. `Greater` means `a` is the longer timeframe.
pub fn compare(a: &str, b: &str) -> Ordering {
    duration_minutes(a).cmp(&duration_minutes(b))
}

/// Sort items from the longest to the shortest timeframe.
///
/// Returns a new vector; ties keep their input order and unrecognized labels
/// sort last.
pub fn sort_descending<T: Timeframed + Clone>(items: &[T]) -> Vec<T> {
    let mut sorted = items.to_vec();
    // sort_by is stable
    sorted.sort_by(|a, b| compare(b.interval(), a.interval()));
    sorted
}

/// Public alias used by callers that only need the duration sort
pub fn sort_by_duration<T: Timeframed + Clone>(items: &[T]) -> Vec<T> {
    sort_descending(items)
}

fn parse(label: &str) -> Option<(u64, TimeUnit)> {
    let caps = INTERVAL_PATTERN.captures(label)?;
    let count = caps.get(1)?.as_str().parse::<u64>().ok()?;
    let unit = caps.get(2)?.as_str().chars().next().and_then(TimeUnit::from_suffix)?;
    Some((count, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_units() {
        assert_eq!(normalize("D"), "1D");
        assert_eq!(normalize("W"), "1W");
        assert_eq!(normalize("M"), "1M");
    }

    #[test]
    fn test_normalize_suffix_case() {
        assert_eq!(normalize("4H"), "4h");
        assert_eq!(normalize("1d"), "1D");
        assert_eq!(normalize("2w"), "2W");
        assert_eq!(normalize("15m"), "15m");
        assert_eq!(normalize("3M"), "3M");
    }

    #[test]
    fn test_normalize_unrecognized_is_unchanged() {
        assert_eq!(normalize("weekly"), "weekly");
        assert_eq!(normalize("60"), "60");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for label in ["D", "W", "M", "4H", "4h", "1d", "15m", "3M", "2w", "junk", "60", " 1D "] {
            let once = normalize(label);
            assert_eq!(normalize(&once), once, "label {:?}", label);
        }
    }

    #[test]
    fn test_duration_table() {
        assert_eq!(duration_minutes("1m"), 1);
        assert_eq!(duration_minutes("15m"), 15);
        assert_eq!(duration_minutes("4h"), 240);
        assert_eq!(duration_minutes("1D"), 1_440);
        assert_eq!(duration_minutes("W"), 10_080);
        assert_eq!(duration_minutes("1M"), 43_200);
        assert_eq!(duration_minutes("bogus"), 0);
    }

    #[test]
    fn test_minute_and_month_are_distinct() {
        assert!(compare("1M", "1m") == Ordering::Greater);
    }

    #[test]
    fn test_compare_orders_by_duration() {
        assert_eq!(compare("1D", "4h"), Ordering::Greater);
        assert_eq!(compare("15m", "1h"), Ordering::Less);
        assert_eq!(compare("60m", "1h"), Ordering::Equal);
        assert_eq!(compare("1h", "typo"), Ordering::Greater);
    }

    #[test]
    fn test_sort_descending() {
        let labels = vec!["15m".to_string(), "1D".to_string(), "4h".to_string()];
        let sorted = sort_descending(&labels);
        assert_eq!(sorted, vec!["1D", "4h", "15m"]);
        // input untouched
        assert_eq!(labels, vec!["15m", "1D", "4h"]);
    }

    #[test]
    fn test_sort_is_stable_and_unrecognized_last() {
        let labels = vec!["x", "60m", "1h", "1W", "y"];
        let sorted = sort_descending(&labels);
        assert_eq!(sorted, vec!["1W", "60m", "1h", "x", "y"]);
    }

    #[test]
    fn test_pairwise_ordering_property() {
        let labels = ["1m", "5m", "15m", "1h", "4h", "1D", "1W", "1M"];
        for a in labels {
            for b in labels {
                if duration_minutes(a) > duration_minutes(b) {
                    assert_eq!(compare(a, b), Ordering::Greater);
                    assert_eq!(sort_descending(&[b, a]), vec![a, b]);
                }
            }
        }
    }
}

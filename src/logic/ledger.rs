//! Temporal rules for the history ledger.
//!
//! Every dated record (`HistoryEntry`, `RoleAssignment`) lives in a single
//! linear history per (subject, category) pair: inclusive date ranges that
//! never overlap, with a null end date meaning "currently in effect". The
//! functions here are pure; the store backends call them inside their
//! atomic section so the check and the insert cannot interleave.

use chrono::NaiveDate;
use itertools::Itertools;

use crate::error::RegistryError;
use crate::model::DateSpan;

/// Inclusive interval intersection, treating a null end as +infinity:
/// `[s1,e1]` and `[s2,e2]` overlap iff `s1 <= e2 && s2 <= e1`.
pub fn ranges_overlap(
    s1: NaiveDate,
    e1: Option<NaiveDate>,
    s2: NaiveDate,
    e2: Option<NaiveDate>,
) -> bool {
    let starts_before_end = |start: NaiveDate, end: Option<NaiveDate>| match end {
        Some(end) => start <= end,
        None => true,
    };
    starts_before_end(s1, e2) && starts_before_end(s2, e1)
}

/// A closed range must not end before it starts.
pub fn validate_span(start: NaiveDate, end: Option<NaiveDate>) -> Result<(), RegistryError> {
    if let Some(end) = end {
        if end < start {
            return Err(RegistryError::InvalidRange { start, end });
        }
    }
    Ok(())
}

/// Check a candidate range against the existing entries of the same
/// (subject, category) pair. Callers must already have filtered to that
/// pair, and must hold whatever lock or transaction makes the subsequent
/// insert atomic with this check.
pub fn ensure_appendable<'a, T, I>(
    existing: I,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> Result<(), RegistryError>
where
    T: DateSpan + 'a,
    I: IntoIterator<Item = &'a T>,
{
    validate_span(start, end)?;
    for entry in existing {
        if ranges_overlap(entry.start_date(), entry.end_date(), start, end) {
            return Err(RegistryError::OverlapViolation { start });
        }
    }
    Ok(())
}

/// The currently effective entry: the one with a null end date, or nothing.
/// A history whose latest entry was explicitly closed has no current
/// classification; nothing is inferred from "today".
pub fn current<T: DateSpan>(entries: &[T]) -> Option<&T> {
    entries.iter().find(|e| e.end_date().is_none())
}

/// History order: start date ascending.
pub fn sorted_by_start<T: DateSpan>(entries: Vec<T>) -> Vec<T> {
    entries
        .into_iter()
        .sorted_by_key(|e| e.start_date())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HistoryCategory, HistoryEntry, NewHistoryEntry};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn entry(start: &str, end: Option<&str>) -> HistoryEntry {
        HistoryEntry::new(
            HistoryCategory::Usage,
            "loc-1".into(),
            NewHistoryEntry {
                classification_id: "usage-1".into(),
                start_date: date(start),
                end_date: end.map(date),
            },
        )
    }

    #[test]
    fn disjoint_ranges_do_not_overlap() {
        assert!(!ranges_overlap(
            date("2020-01-01"),
            Some(date("2020-12-31")),
            date("2021-01-01"),
            None,
        ));
    }

    #[test]
    fn touching_end_dates_overlap() {
        // inclusive on both ends
        assert!(ranges_overlap(
            date("2020-01-01"),
            Some(date("2020-06-30")),
            date("2020-06-30"),
            None,
        ));
    }

    #[test]
    fn open_range_overlaps_any_later_start() {
        assert!(ranges_overlap(
            date("2020-01-01"),
            None,
            date("2031-05-01"),
            Some(date("2031-06-01")),
        ));
    }

    #[test]
    fn rejects_end_before_start() {
        let err = validate_span(date("2021-01-01"), Some(date("2020-12-31"))).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRange { .. }));
    }

    #[test]
    fn append_sequence_with_closed_then_open() {
        let mut entries = Vec::new();
        ensure_appendable(&entries, date("2020-01-01"), Some(date("2020-12-31"))).unwrap();
        entries.push(entry("2020-01-01", Some("2020-12-31")));

        ensure_appendable(&entries, date("2021-01-01"), None).unwrap();
        entries.push(entry("2021-01-01", None));

        let err = ensure_appendable(&entries, date("2020-06-01"), None).unwrap_err();
        assert!(matches!(err, RegistryError::OverlapViolation { .. }));
    }

    #[test]
    fn current_is_the_open_entry_only() {
        let closed = vec![entry("2019-01-01", Some("2019-12-31"))];
        assert!(current(&closed).is_none());

        let with_open = vec![
            entry("2019-01-01", Some("2019-12-31")),
            entry("2020-01-01", None),
        ];
        assert_eq!(current(&with_open).unwrap().start_date, date("2020-01-01"));
    }

    #[test]
    fn history_sorted_by_start_date() {
        let entries = vec![
            entry("2021-01-01", None),
            entry("2019-01-01", Some("2019-12-31")),
            entry("2020-01-01", Some("2020-12-31")),
        ];
        let sorted = sorted_by_start(entries);
        let starts: Vec<_> = sorted.iter().map(|e| e.start_date).collect();
        assert_eq!(
            starts,
            vec![date("2019-01-01"), date("2020-01-01"), date("2021-01-01")]
        );
    }
}

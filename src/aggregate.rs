use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{EvaluationRecord, MonthlySummary, StatusCounts, StatusField};

/// `YYYY-MM` bucket for a point in time, in UTC.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// The month bucket a record belongs to. Both summaries and month filters
/// go through here so they always agree on membership.
pub fn record_month_key(record: &EvaluationRecord) -> String {
    month_key(record.assessment_date)
}

pub fn month_label(month_key: &str) -> String {
    NaiveDate::parse_from_str(&format!("{month_key}-01"), "%Y-%m-%d")
        .map(|date| date.format("%B %Y").to_string())
        .unwrap_or_else(|_| month_key.to_string())
}

/// Groups records by month, counting both status fields of every record.
/// Output is ascending by month key.
pub fn summarize_monthly(records: &[EvaluationRecord]) -> Vec<MonthlySummary> {
    let mut buckets: BTreeMap<String, (usize, StatusCounts)> = BTreeMap::new();

    for record in records {
        let entry = buckets.entry(record_month_key(record)).or_default();
        entry.0 += 1;
        for field in StatusField::ALL {
            entry.1.record(record.status(field));
        }
    }

    buckets
        .into_iter()
        .map(|(month_key, (total, counts))| MonthlySummary {
            label: month_label(&month_key),
            month_key,
            total,
            done: counts.done,
            not_done: counts.not_done,
            na: counts.na,
        })
        .collect()
}

pub fn status_counts(records: &[EvaluationRecord], field: StatusField) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for record in records {
        counts.record(record.status(field));
    }
    counts
}

/// Both fields pooled together; every record contributes two observations.
pub fn combined_counts(records: &[EvaluationRecord]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for record in records {
        for field in StatusField::ALL {
            counts.record(record.status(field));
        }
    }
    counts
}

/// Share of `count` in `total` as a percentage with one decimal, or 0 for an
/// empty total.
pub fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MonthFilter {
    #[default]
    All,
    Month(String),
}

impl MonthFilter {
    pub fn matches(&self, record: &EvaluationRecord) -> bool {
        match self {
            MonthFilter::All => true,
            MonthFilter::Month(key) => record_month_key(record) == *key,
        }
    }
}

impl fmt::Display for MonthFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonthFilter::All => f.write_str("all"),
            MonthFilter::Month(key) => f.write_str(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid month filter: {0} (expected \"all\" or YYYY-MM)")]
pub struct ParseMonthFilterError(pub String);

impl FromStr for MonthFilter {
    type Err = ParseMonthFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("all") {
            return Ok(MonthFilter::All);
        }

        NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
            .map(|date| MonthFilter::Month(date.format("%Y-%m").to_string()))
            .map_err(|_| ParseMonthFilterError(s.to_string()))
    }
}

pub fn filter_by_month(
    records: &[EvaluationRecord],
    filter: &MonthFilter,
) -> Vec<EvaluationRecord> {
    records
        .iter()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect()
}

/// Distinct month keys present in the records, newest first.
pub fn available_months(records: &[EvaluationRecord]) -> Vec<String> {
    let months: BTreeSet<String> = records.iter().map(record_month_key).collect();
    months.into_iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CareStatus;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sample_record(
        bone: CareStatus,
        incontinence: CareStatus,
        (y, m, d): (i32, u32, u32),
    ) -> EvaluationRecord {
        let assessment_date = Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap();
        EvaluationRecord {
            id: format!("{y}-{m}-{d}-{bone}-{incontinence}"),
            assessor: "Nurse Sato".to_string(),
            bone_protection: bone,
            incontinence_care: incontinence,
            notes: String::new(),
            assessment_date,
            created_at: assessment_date,
            created_by: None,
        }
    }

    fn worked_example() -> Vec<EvaluationRecord> {
        vec![
            sample_record(CareStatus::Done, CareStatus::NotDone, (2025, 1, 15)),
            sample_record(CareStatus::Na, CareStatus::Na, (2025, 1, 20)),
            sample_record(CareStatus::Done, CareStatus::Done, (2025, 2, 1)),
        ]
    }

    #[test]
    fn worked_example_yields_two_buckets() {
        let summaries = summarize_monthly(&worked_example());
        assert_eq!(
            summaries,
            vec![
                MonthlySummary {
                    month_key: "2025-01".to_string(),
                    label: "January 2025".to_string(),
                    total: 2,
                    done: 1,
                    not_done: 1,
                    na: 2,
                },
                MonthlySummary {
                    month_key: "2025-02".to_string(),
                    label: "February 2025".to_string(),
                    total: 1,
                    done: 2,
                    not_done: 0,
                    na: 0,
                },
            ]
        );
    }

    #[test]
    fn empty_input_has_no_summaries() {
        assert!(summarize_monthly(&[]).is_empty());
        assert_eq!(combined_counts(&[]), StatusCounts::default());
    }

    #[test]
    fn percentage_never_divides_by_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(5, 10), 50.0);
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
    }

    #[test]
    fn per_field_counts_increment_once_per_record() {
        let records = worked_example();
        let bone = status_counts(&records, StatusField::BoneProtection);
        assert_eq!(
            bone,
            StatusCounts {
                done: 2,
                not_done: 0,
                na: 1,
                total: 3
            }
        );

        let incontinence = status_counts(&records, StatusField::IncontinenceCare);
        assert_eq!(incontinence.done, 1);
        assert_eq!(incontinence.not_done, 1);
        assert_eq!(incontinence.na, 1);
        assert_eq!(incontinence.total, 3);
    }

    // Each record is two observations. Collapsing this to one per record
    // changes every displayed total.
    #[test]
    fn combined_counts_take_two_observations_per_record() {
        let counts = combined_counts(&worked_example());
        assert_eq!(counts.total, 6);
        assert_eq!(counts.done, 3);
        assert_eq!(counts.not_done, 1);
        assert_eq!(counts.na, 2);
    }

    #[test]
    fn month_filter_agrees_with_summary() {
        let records = worked_example();
        let filter: MonthFilter = "2025-01".parse().unwrap();
        let january = filter_by_month(&records, &filter);
        assert_eq!(january.len(), 2);

        let summaries = summarize_monthly(&january);
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        let bone = status_counts(&january, StatusField::BoneProtection);
        let incontinence = status_counts(&january, StatusField::IncontinenceCare);
        assert_eq!(summary.total, bone.total);
        assert_eq!(summary.done, bone.done + incontinence.done);
        assert_eq!(summary.not_done, bone.not_done + incontinence.not_done);
        assert_eq!(summary.na, bone.na + incontinence.na);
    }

    #[test]
    fn month_filter_parsing() {
        assert_eq!("all".parse::<MonthFilter>(), Ok(MonthFilter::All));
        assert_eq!("".parse::<MonthFilter>(), Ok(MonthFilter::All));
        assert_eq!(
            "2025-3".parse::<MonthFilter>(),
            Ok(MonthFilter::Month("2025-03".to_string()))
        );
        assert!("2025-13".parse::<MonthFilter>().is_err());
        assert!("march".parse::<MonthFilter>().is_err());
    }

    #[test]
    fn all_filter_keeps_every_record() {
        let records = worked_example();
        assert_eq!(filter_by_month(&records, &MonthFilter::All), records);
    }

    #[test]
    fn available_months_are_newest_first() {
        assert_eq!(
            available_months(&worked_example()),
            vec!["2025-02".to_string(), "2025-01".to_string()]
        );
    }

    fn arb_status() -> impl Strategy<Value = CareStatus> {
        prop_oneof![
            Just(CareStatus::Done),
            Just(CareStatus::NotDone),
            Just(CareStatus::Na)
        ]
    }

    fn arb_record() -> impl Strategy<Value = EvaluationRecord> {
        (arb_status(), arb_status(), 2023i32..2027, 1u32..=12, 1u32..=28)
            .prop_map(|(bone, incontinence, y, m, d)| sample_record(bone, incontinence, (y, m, d)))
    }

    proptest! {
        #[test]
        fn summaries_are_strictly_ascending(
            records in prop::collection::vec(arb_record(), 1..60)
        ) {
            let summaries = summarize_monthly(&records);
            prop_assert!(!summaries.is_empty());
            for pair in summaries.windows(2) {
                prop_assert!(pair[0].month_key < pair[1].month_key);
            }
            let total: usize = summaries.iter().map(|s| s.total).sum();
            prop_assert_eq!(total, records.len());
        }

        #[test]
        fn every_bucket_holds_two_observations_per_record(
            records in prop::collection::vec(arb_record(), 0..60)
        ) {
            for summary in summarize_monthly(&records) {
                prop_assert_eq!(summary.done + summary.not_done + summary.na, summary.total * 2);
            }
        }

        #[test]
        fn filtered_month_matches_direct_counts(
            records in prop::collection::vec(arb_record(), 1..60)
        ) {
            for month in available_months(&records) {
                let subset = filter_by_month(&records, &MonthFilter::Month(month.clone()));
                let summaries = summarize_monthly(&subset);
                prop_assert_eq!(summaries.len(), 1);
                let combined = combined_counts(&subset);
                prop_assert_eq!(&summaries[0].month_key, &month);
                prop_assert_eq!(summaries[0].done, combined.done);
                prop_assert_eq!(summaries[0].not_done, combined.not_done);
                prop_assert_eq!(summaries[0].na, combined.na);
                prop_assert_eq!(summaries[0].total, subset.len());
            }
        }
    }
}

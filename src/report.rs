use std::fmt::Write;

use crate::aggregate::{self, MonthFilter};
use crate::models::{CareStatus, EvaluationRecord, StatusCounts, StatusField};

fn write_counts(output: &mut String, label: &str, counts: &StatusCounts) {
    let _ = writeln!(
        output,
        "- {}: done {} ({:.1}%), not done {} ({:.1}%), n/a {} ({:.1}%) of {}",
        label,
        counts.done,
        aggregate::percentage(counts.done, counts.total),
        counts.not_done,
        aggregate::percentage(counts.not_done, counts.total),
        counts.na,
        aggregate::percentage(counts.na, counts.total),
        counts.total
    );
}

/// Renders a Markdown compliance report for the records matching `filter`.
/// `records` is expected newest first, as delivered by the store.
pub fn build_report(
    filter: &MonthFilter,
    records: &[EvaluationRecord],
    latest_limit: usize,
) -> String {
    let scoped = aggregate::filter_by_month(records, filter);
    let summaries = aggregate::summarize_monthly(&scoped);

    let mut output = String::new();
    let scope_label = match filter {
        MonthFilter::All => "all months".to_string(),
        MonthFilter::Month(key) => aggregate::month_label(key),
    };

    let _ = writeln!(output, "# Care Compliance Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} evaluations)",
        scope_label,
        scoped.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Summary");

    if summaries.is_empty() {
        let _ = writeln!(output, "No evaluations recorded for this period.");
    } else {
        let _ = writeln!(output, "| Month | Evaluations | Done | Not done | N/A | Done % |");
        let _ = writeln!(output, "| --- | ---: | ---: | ---: | ---: | ---: |");
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {:.1} |",
                summary.label,
                summary.total,
                summary.done,
                summary.not_done,
                summary.na,
                aggregate::percentage(summary.done, summary.total * 2)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Compliance by Check");
    for field in StatusField::ALL {
        let counts = aggregate::status_counts(&scoped, field);
        write_counts(&mut output, field.label(), &counts);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall Balance");
    write_counts(&mut output, "Both checks", &aggregate::combined_counts(&scoped));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Evaluations");

    if scoped.is_empty() {
        let _ = writeln!(output, "No evaluations recorded for this period.");
    } else {
        for record in scoped.iter().take(latest_limit) {
            let _ = write!(
                output,
                "- {} by {}: bone protection {}, incontinence care {}",
                record.assessment_date.format("%Y-%m-%d %H:%M"),
                record.assessor,
                status_label(record.bone_protection),
                status_label(record.incontinence_care)
            );
            if record.notes.is_empty() {
                let _ = writeln!(output);
            } else {
                let _ = writeln!(output, " ({})", record.notes);
            }
        }
    }

    output
}

fn status_label(status: CareStatus) -> &'static str {
    match status {
        CareStatus::Done => "done",
        CareStatus::NotDone => "not done",
        CareStatus::Na => "n/a",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(
        id: &str,
        bone: CareStatus,
        incontinence: CareStatus,
        month: u32,
        notes: &str,
    ) -> EvaluationRecord {
        let at = Utc.with_ymd_and_hms(2025, month, 12, 14, 0, 0).unwrap();
        EvaluationRecord {
            id: id.to_string(),
            assessor: "Ken Ito".to_string(),
            bone_protection: bone,
            incontinence_care: incontinence,
            notes: notes.to_string(),
            assessment_date: at,
            created_at: at,
            created_by: None,
        }
    }

    #[test]
    fn report_covers_every_section() {
        let records = vec![
            record("b", CareStatus::Done, CareStatus::Done, 2, ""),
            record("a", CareStatus::Done, CareStatus::NotDone, 1, "pad change overdue"),
        ];
        let report = build_report(&MonthFilter::All, &records, 10);

        assert!(report.contains("Generated for all months (2 evaluations)"));
        assert!(report.contains("| January 2025 | 1 | 1 | 1 | 0 | 50.0 |"));
        assert!(report.contains("| February 2025 | 1 | 2 | 0 | 0 | 100.0 |"));
        assert!(report.contains("- Bone protection: done 2 (100.0%)"));
        assert!(report
            .contains("- Both checks: done 3 (75.0%), not done 1 (25.0%), n/a 0 (0.0%) of 4"));
        assert!(report.contains("incontinence care not done (pad change overdue)"));
    }

    #[test]
    fn month_scope_limits_every_section() {
        let records = vec![
            record("b", CareStatus::Done, CareStatus::Done, 2, ""),
            record("a", CareStatus::Na, CareStatus::Na, 1, ""),
        ];
        let filter = MonthFilter::Month("2025-01".to_string());
        let report = build_report(&filter, &records, 10);

        assert!(report.contains("Generated for January 2025 (1 evaluations)"));
        assert!(!report.contains("February 2025"));
        assert!(report
            .contains("- Both checks: done 0 (0.0%), not done 0 (0.0%), n/a 2 (100.0%) of 2"));
    }

    #[test]
    fn empty_report_has_placeholders() {
        let report = build_report(&MonthFilter::All, &[], 10);
        assert!(report.contains("No evaluations recorded for this period."));
        assert!(report.contains(
            "- Incontinence care: done 0 (0.0%), not done 0 (0.0%), n/a 0 (0.0%) of 0"
        ));
    }
}

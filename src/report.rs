use std::fmt::Write;

use chrono::NaiveDate;

use crate::metrics::RiskReason;
use crate::views::{Analytics, ViewContext};

fn or_na(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.2}"))
}

fn count(value: Option<f64>) -> usize {
    value.unwrap_or(0.0) as usize
}

pub fn build_report(
    scope: Option<&str>,
    generated_on: NaiveDate,
    analytics: &Analytics<'_>,
    ctx: &ViewContext,
) -> String {
    let standing = analytics.academic_standing(ctx);
    let risk = analytics.student_risk(ctx);
    let failures = analytics.failure_rates(ctx);
    let retention = analytics.retention(ctx);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all programs");

    let _ = writeln!(output, "# Academic Performance Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, generated_on);
    let _ = writeln!(output, "Passing grade: {:.0}", analytics.thresholds().passing);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Academic Standing");

    if standing.is_empty() {
        let _ = writeln!(output, "No graded semesters for this scope.");
    } else {
        for (name, label) in [
            ("deans_list", "Dean's List"),
            ("good_standing", "Good Standing"),
            ("probation", "Probation"),
            ("not_graded", "Not yet graded"),
        ] {
            let _ = writeln!(
                output,
                "- {}: {} student-semesters",
                label,
                count(standing.summary_value(name))
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Intervention");

    let flagged: Vec<_> = risk
        .rows
        .iter()
        .filter(|r| !r.reasons.is_empty())
        .collect();
    if flagged.is_empty() {
        let _ = writeln!(output, "No students flagged for the current semester.");
    } else {
        for row in flagged.iter().take(15) {
            let reasons: Vec<&str> = row.reasons.iter().map(RiskReason::label).collect();
            let _ = writeln!(
                output,
                "- {} ({}, {}) average {:.2}, {} failed: {}",
                row.student_name,
                row.course,
                row.semester_label,
                row.average,
                row.failed_count,
                reasons.join("; ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Failure Rates");

    if failures.is_empty() {
        let _ = writeln!(output, "No graded attempts for this scope.");
    } else {
        for row in failures.rows.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} / {} ({}): {:.2}% ({} of {} attempts)",
                row.teacher_name,
                row.subject_code,
                row.description,
                row.failure_rate,
                row.failures,
                row.attempts
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Retention");

    if retention.is_empty() {
        let _ = writeln!(output, "No students on the roster for this scope.");
    } else {
        let _ = writeln!(
            output,
            "- Retained: {}\n- At Risk: {}\n- Dropped: {}\n- Retention rate: {}%",
            count(retention.summary_value("retained")),
            count(retention.summary_value("at_risk")),
            count(retention.summary_value("dropped")),
            or_na(retention.summary_value("retention_rate"))
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::models::Dataset;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn empty_dataset_renders_no_data_sections() {
        let dataset = Dataset::default();
        let analytics = Analytics::new(&dataset, Thresholds::default());
        let report = build_report(None, date(), &analytics, &ViewContext::default());

        assert!(report.contains("Generated for all programs on 2026-03-01"));
        assert!(report.contains("No graded semesters for this scope."));
        assert!(report.contains("No students flagged for the current semester."));
        assert!(report.contains("No graded attempts for this scope."));
        assert!(report.contains("No students on the roster for this scope."));
    }

    #[test]
    fn flagged_students_list_their_reasons() {
        let dataset = Dataset {
            students: vec![serde_json::from_value(json!({"_id": "S", "Name": "Sam Reyes", "Course": "BSCS"})).unwrap()],
            grades: vec![serde_json::from_value(json!({
                "StudentID": "S", "SemesterID": "T",
                "SubjectCodes": ["MATH1", "ENG1"], "Grades": [95, 60], "Teachers": ["TA", "TB"]
            }))
            .unwrap()],
            ..Dataset::default()
        };
        let analytics = Analytics::new(&dataset, Thresholds::default());
        let report = build_report(Some("BSCS"), date(), &analytics, &ViewContext::default());

        assert!(report.contains("- Sam Reyes (BSCS, Unknown) average 77.50, 1 failed: Failed core subjects"));
        assert!(report.contains("- Good Standing: 1 student-semesters"));
        assert!(report.contains("Unknown / ENG1 (Unknown): 100.00% (1 of 1 attempts)"));
        assert!(report.contains("- Retained: 1"));
    }
}

use std::collections::HashSet;

use serde::Serialize;

use crate::config::Thresholds;
use crate::models::GradeValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PassStatus {
    Pass,
    Fail,
    Incomplete,
}

pub fn pass_status(grade: GradeValue, thresholds: &Thresholds) -> PassStatus {
    match grade.numeric() {
        Some(value) if value >= thresholds.passing => PassStatus::Pass,
        Some(_) => PassStatus::Fail,
        None => PassStatus::Incomplete,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassCounts {
    pub pass: usize,
    pub fail: usize,
    pub incomplete: usize,
}

impl PassCounts {
    pub fn tally<I>(grades: I, thresholds: &Thresholds) -> Self
    where
        I: IntoIterator<Item = GradeValue>,
    {
        let mut counts = PassCounts::default();
        for grade in grades {
            match pass_status(grade, thresholds) {
                PassStatus::Pass => counts.pass += 1,
                PassStatus::Fail => counts.fail += 1,
                PassStatus::Incomplete => counts.incomplete += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.incomplete
    }

    pub fn graded(&self) -> usize {
        self.pass + self.fail
    }

    /// Passes over graded attempts; undefined when nothing was graded.
    pub fn pass_rate(&self) -> Option<f64> {
        percent(self.pass, self.graded())
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn percent(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| round2(part as f64 / whole as f64 * 100.0))
}

/// Mean of the numeric grades. Sentinels are excluded, not zeroed.
pub fn mean_grade<I>(grades: I) -> Option<f64>
where
    I: IntoIterator<Item = GradeValue>,
{
    let (sum, count) = grades
        .into_iter()
        .filter_map(|g| g.numeric())
        .fold((0.0, 0usize), |(sum, count), g| (sum + g, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FailureRate {
    pub failures: usize,
    pub attempts: usize,
    pub rate: f64,
}

/// `None` for a group with no graded attempts so callers drop it.
pub fn failure_rate<I>(grades: I, thresholds: &Thresholds) -> Option<FailureRate>
where
    I: IntoIterator<Item = GradeValue>,
{
    let counts = PassCounts::tally(grades, thresholds);
    let rate = percent(counts.fail, counts.graded())?;
    Some(FailureRate {
        failures: counts.fail,
        attempts: counts.graded(),
        rate,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskStatus {
    #[serde(rename = "Needs Intervention")]
    NeedsIntervention,
    #[serde(rename = "On Track")]
    OnTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskReason {
    #[serde(rename = "Low average")]
    LowAverage,
    #[serde(rename = "Failed core subjects")]
    FailedCoreSubjects,
}

impl RiskReason {
    pub fn label(&self) -> &'static str {
        match self {
            RiskReason::LowAverage => "Low average",
            RiskReason::FailedCoreSubjects => "Failed core subjects",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub average: f64,
    pub failed_count: usize,
    pub status: RiskStatus,
    pub reasons: Vec<RiskReason>,
}

pub fn classify_risk(
    average: f64,
    failed_count: usize,
    thresholds: &Thresholds,
) -> (RiskStatus, Vec<RiskReason>) {
    let mut reasons = Vec::new();
    if average < thresholds.passing {
        reasons.push(RiskReason::LowAverage);
    }
    if failed_count > 0 {
        reasons.push(RiskReason::FailedCoreSubjects);
    }
    let status = if reasons.is_empty() {
        RiskStatus::OnTrack
    } else {
        RiskStatus::NeedsIntervention
    };
    (status, reasons)
}

/// Risk scoring treats a missing grade as a zero and as a failure. This is
/// intentionally harsher than `mean_grade`.
pub fn assess_risk<I>(grades: I, thresholds: &Thresholds) -> Option<RiskAssessment>
where
    I: IntoIterator<Item = GradeValue>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut failed_count = 0usize;
    for grade in grades {
        let value = grade.numeric().unwrap_or(0.0);
        sum += value;
        count += 1;
        if pass_status(grade, thresholds) != PassStatus::Pass {
            failed_count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let average = round2(sum / count as f64);
    let (status, reasons) = classify_risk(average, failed_count, thresholds);
    Some(RiskAssessment {
        average,
        failed_count,
        status,
        reasons,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Standing {
    #[serde(rename = "Dean's List")]
    DeansList,
    #[serde(rename = "Good Standing")]
    GoodStanding,
    Probation,
}

impl Standing {
    pub fn label(&self) -> &'static str {
        match self {
            Standing::DeansList => "Dean's List",
            Standing::GoodStanding => "Good Standing",
            Standing::Probation => "Probation",
        }
    }
}

pub fn academic_standing(gpa: f64, thresholds: &Thresholds) -> Standing {
    if gpa >= thresholds.deans_list {
        Standing::DeansList
    } else if gpa >= thresholds.good_standing {
        Standing::GoodStanding
    } else {
        Standing::Probation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RetentionStatus {
    Retained,
    #[serde(rename = "At Risk")]
    AtRisk,
    Dropped,
}

impl RetentionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RetentionStatus::Retained => "Retained",
            RetentionStatus::AtRisk => "At Risk",
            RetentionStatus::Dropped => "Dropped",
        }
    }
}

/// `latest_gpa` is the student's GPA in the latest semester, `None` when
/// they have no graded rows there.
pub fn retention_status(
    has_any_rows: bool,
    latest_gpa: Option<f64>,
    thresholds: &Thresholds,
) -> RetentionStatus {
    if !has_any_rows {
        return RetentionStatus::Dropped;
    }
    match latest_gpa {
        Some(gpa) if gpa >= thresholds.good_standing => RetentionStatus::Retained,
        _ => RetentionStatus::AtRisk,
    }
}

/// Uppercase with all whitespace removed.
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Prerequisites not covered by the passed codes, in declaration order.
/// `passed` must already be normalized.
pub fn missing_prerequisites(prerequisites: &[String], passed: &HashSet<String>) -> Vec<String> {
    prerequisites
        .iter()
        .filter(|code| {
            let normalized = normalize_code(code);
            !normalized.is_empty() && !passed.contains(&normalized)
        })
        .map(|code| code.trim().to_string())
        .collect()
}

/// Dense rank by descending grade. Ties share a rank; ungraded entries get
/// no rank.
pub fn dense_rank(grades: &[GradeValue]) -> Vec<Option<u32>> {
    let mut distinct: Vec<f64> = grades.iter().filter_map(|g| g.numeric()).collect();
    distinct.sort_by(|a, b| b.total_cmp(a));
    distinct.dedup();

    grades
        .iter()
        .map(|g| {
            let value = g.numeric()?;
            distinct
                .iter()
                .position(|d| *d == value)
                .map(|pos| pos as u32 + 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> Thresholds {
        Thresholds::default()
    }

    fn n(values: &[f64]) -> Vec<GradeValue> {
        values.iter().map(|v| GradeValue::Numeric(*v)).collect()
    }

    #[test]
    fn pass_fail_is_tri_state() {
        assert_eq!(pass_status(GradeValue::Numeric(75.0), &t()), PassStatus::Pass);
        assert_eq!(pass_status(GradeValue::Numeric(74.99), &t()), PassStatus::Fail);
        assert_eq!(pass_status(GradeValue::Incomplete, &t()), PassStatus::Incomplete);
        assert_eq!(pass_status(GradeValue::Unknown, &t()), PassStatus::Incomplete);
    }

    #[test]
    fn tally_totals_cover_every_row() {
        let grades = vec![
            GradeValue::Numeric(90.0),
            GradeValue::Numeric(60.0),
            GradeValue::Incomplete,
            GradeValue::Unknown,
            GradeValue::Numeric(75.0),
        ];
        let counts = PassCounts::tally(grades.clone(), &t());
        assert_eq!(counts.total(), grades.len());
        assert_eq!(counts, PassCounts { pass: 2, fail: 1, incomplete: 2 });
        assert_eq!(counts.pass_rate(), Some(66.67));
    }

    #[test]
    fn mean_excludes_sentinels() {
        assert_eq!(mean_grade(n(&[80.0, 90.0, 70.0])), Some(80.0));
        assert_eq!(mean_grade(vec![GradeValue::Unknown, GradeValue::Incomplete]), None);
        assert_eq!(mean_grade(Vec::<GradeValue>::new()), None);

        let mut mixed = n(&[80.0]);
        mixed.push(GradeValue::Incomplete);
        assert_eq!(mean_grade(mixed), Some(80.0));
    }

    #[test]
    fn failure_rate_bounds() {
        let rate = failure_rate(n(&[60.0, 70.0, 80.0]), &t()).unwrap();
        assert_eq!(rate.failures, 2);
        assert_eq!(rate.attempts, 3);
        assert_eq!(rate.rate, 66.67);

        let clean = failure_rate(n(&[80.0, 90.0]), &t()).unwrap();
        assert_eq!(clean.rate, 0.0);
        assert_eq!(clean.failures, 0);

        let all_failed = failure_rate(n(&[10.0]), &t()).unwrap();
        assert_eq!(all_failed.rate, 100.0);

        assert!(failure_rate(vec![GradeValue::Incomplete], &t()).is_none());
    }

    #[test]
    fn risk_reasons_are_independent() {
        let (status, reasons) = classify_risk(70.0, 0, &t());
        assert_eq!(status, RiskStatus::NeedsIntervention);
        assert_eq!(reasons, vec![RiskReason::LowAverage]);

        let (status, reasons) = classify_risk(80.0, 2, &t());
        assert_eq!(status, RiskStatus::NeedsIntervention);
        assert_eq!(reasons, vec![RiskReason::FailedCoreSubjects]);

        let (status, reasons) = classify_risk(80.0, 0, &t());
        assert_eq!(status, RiskStatus::OnTrack);
        assert!(reasons.is_empty());

        let (_, reasons) = classify_risk(50.0, 1, &t());
        assert_eq!(reasons, vec![RiskReason::LowAverage, RiskReason::FailedCoreSubjects]);
    }

    #[test]
    fn risk_counts_missing_grades_as_zero_failures() {
        let grades = vec![GradeValue::Numeric(100.0), GradeValue::Unknown];
        let risk = assess_risk(grades, &t()).unwrap();
        assert_eq!(risk.average, 50.0);
        assert_eq!(risk.failed_count, 1);
        assert_eq!(
            risk.reasons,
            vec![RiskReason::LowAverage, RiskReason::FailedCoreSubjects]
        );
        assert!(assess_risk(Vec::<GradeValue>::new(), &t()).is_none());
    }

    #[test]
    fn standing_uses_configured_cutoffs() {
        assert_eq!(academic_standing(92.0, &t()), Standing::DeansList);
        assert_eq!(academic_standing(77.5, &t()), Standing::GoodStanding);
        assert_eq!(academic_standing(74.0, &t()), Standing::Probation);

        let lenient = Thresholds {
            good_standing: 70.0,
            ..Thresholds::default()
        };
        assert_eq!(academic_standing(72.0, &lenient), Standing::GoodStanding);
    }

    #[test]
    fn retention_states() {
        assert_eq!(retention_status(false, None, &t()), RetentionStatus::Dropped);
        assert_eq!(retention_status(true, Some(82.0), &t()), RetentionStatus::Retained);
        assert_eq!(retention_status(true, Some(70.0), &t()), RetentionStatus::AtRisk);
        assert_eq!(retention_status(true, None, &t()), RetentionStatus::AtRisk);
    }

    #[test]
    fn prerequisite_codes_ignore_case_and_whitespace() {
        let passed: HashSet<String> = ["CS101", "MATH 1"].iter().map(|c| normalize_code(c)).collect();
        assert!(missing_prerequisites(&["cs101 ".to_string()], &passed).is_empty());
        assert!(missing_prerequisites(&["math1".to_string()], &passed).is_empty());
        assert_eq!(
            missing_prerequisites(&["CS101".to_string(), " cs102".to_string()], &passed),
            vec!["cs102".to_string()]
        );
        assert!(missing_prerequisites(&[], &passed).is_empty());
    }

    #[test]
    fn dense_rank_shares_ties() {
        let grades = vec![
            GradeValue::Numeric(90.0),
            GradeValue::Numeric(85.0),
            GradeValue::Numeric(90.0),
            GradeValue::Incomplete,
            GradeValue::Numeric(70.0),
        ];
        assert_eq!(
            dense_rank(&grades),
            vec![Some(1), Some(2), Some(1), None, Some(3)]
        );
    }
}

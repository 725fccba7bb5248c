use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use clap::ValueEnum;
use serde::Serialize;

use crate::config::Thresholds;
use crate::flatten::flatten_all;
use crate::join::{resolve_all, ReferenceIndex, UNKNOWN_LABEL};
use crate::metrics::{
    academic_standing, assess_risk, dense_rank, failure_rate, mean_grade, missing_prerequisites,
    normalize_code, pass_status, percent, retention_status, round2, PassCounts, PassStatus,
    RetentionStatus, RiskReason, RiskStatus, Standing,
};
use crate::models::{Curriculum, Dataset, ResolvedRow, Semester, SemesterTerm, Student};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Student,
    Faculty,
    #[default]
    Registrar,
}

#[derive(Debug, Clone, Default)]
pub struct ViewFilters {
    pub semester_id: Option<String>,
    pub course: Option<String>,
    pub teacher_id: Option<String>,
    pub year_level: Option<u8>,
    pub subject_code: Option<String>,
    pub student_id: Option<String>,
}

/// Who is asking and what they narrowed the view to. Passed into every view
/// call; nothing here is global.
#[derive(Debug, Clone, Default)]
pub struct ViewContext {
    pub role: Role,
    pub user_id: Option<String>,
    pub filters: ViewFilters,
}

impl ViewContext {
    pub fn registrar(filters: ViewFilters) -> Self {
        Self {
            role: Role::Registrar,
            user_id: None,
            filters,
        }
    }

    /// Role scoping: students see their own rows, faculty the rows they
    /// teach, registrars everything.
    fn permits(&self, row: &ResolvedRow) -> bool {
        match self.role {
            Role::Registrar => true,
            Role::Student => self.user_id.as_deref() == Some(row.student_id.as_str()),
            Role::Faculty => self.user_id.is_some() && self.user_id == row.teacher_id,
        }
    }

    fn permits_student(&self, student_id: &str) -> bool {
        match self.role {
            Role::Student => self.user_id.as_deref() == Some(student_id),
            Role::Faculty | Role::Registrar => true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryStat {
    pub name: &'static str,
    pub value: Option<f64>,
}

/// A result table plus named scalars for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct View<R> {
    pub title: &'static str,
    pub rows: Vec<R>,
    pub summary: Vec<SummaryStat>,
}

impl<R> View<R> {
    fn new(title: &'static str, rows: Vec<R>) -> Self {
        Self {
            title,
            rows,
            summary: Vec::new(),
        }
    }

    fn stat(mut self, name: &'static str, value: Option<f64>) -> Self {
        self.summary.push(SummaryStat { name, value });
        self
    }

    fn count(self, name: &'static str, value: usize) -> Self {
        self.stat(name, Some(value as f64))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn summary_value(&self, name: &str) -> Option<f64> {
        self.summary
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectPassRow {
    pub subject_code: String,
    pub description: String,
    pub enrolled: usize,
    pub passed: usize,
    pub failed: usize,
    pub incomplete: usize,
    pub pass_rate: Option<f64>,
    pub mean_grade: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRateRow {
    pub teacher_id: Option<String>,
    pub teacher_name: String,
    pub subject_code: String,
    pub description: String,
    pub failures: usize,
    pub attempts: usize,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummaryRow {
    pub group: String,
    pub students: usize,
    pub rows: usize,
    pub mean_grade: Option<f64>,
    pub pass_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StandingRow {
    pub student_id: String,
    pub student_name: String,
    pub course: String,
    pub year_level: Option<u8>,
    pub semester_id: String,
    pub semester_label: String,
    pub subjects: usize,
    pub gpa: Option<f64>,
    pub standing: Option<Standing>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskRow {
    pub student_id: String,
    pub student_name: String,
    pub course: String,
    pub year_level: Option<u8>,
    pub semester_label: String,
    pub subjects: usize,
    pub average: f64,
    pub failed_count: usize,
    pub status: RiskStatus,
    pub reasons: Vec<RiskReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionRow {
    pub student_id: String,
    pub student_name: String,
    pub course: String,
    pub year_level: Option<u8>,
    pub semesters_enrolled: usize,
    pub latest_gpa: Option<f64>,
    pub status: RetentionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankRow {
    pub subject_code: String,
    pub section: Option<String>,
    pub semester_label: String,
    pub student_id: String,
    pub student_name: String,
    pub grade: Option<f64>,
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibilityRow {
    pub student_id: String,
    pub student_name: String,
    pub course: String,
    pub year_level: Option<u8>,
    pub eligible: bool,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CurriculumStatus {
    Passed,
    Failed,
    Incomplete,
    #[serde(rename = "Not Taken")]
    NotTaken,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurriculumRow {
    pub year_level: Option<u8>,
    pub term: SemesterTerm,
    pub subject_code: String,
    pub subject_name: String,
    pub units: f64,
    pub attempts: usize,
    pub best_grade: Option<f64>,
    pub status: CurriculumStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletenessRow {
    pub teacher_id: Option<String>,
    pub teacher_name: String,
    pub semester_id: String,
    pub semester_label: String,
    pub total: usize,
    pub graded: usize,
    pub missing: usize,
    pub completeness: Option<f64>,
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn cmp_opt_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_opt_asc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Flattened and resolved rows for one dataset, ready for the views.
pub struct Analytics<'a> {
    dataset: &'a Dataset,
    index: ReferenceIndex<'a>,
    rows: Vec<ResolvedRow>,
    thresholds: Thresholds,
}

impl<'a> Analytics<'a> {
    pub fn new(dataset: &'a Dataset, thresholds: Thresholds) -> Self {
        let index = ReferenceIndex::new(dataset);
        let rows = resolve_all(&index, flatten_all(&dataset.grades));
        Self {
            dataset,
            index,
            rows,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn matches(filters: &ViewFilters, row: &ResolvedRow, with_semester: bool) -> bool {
        if with_semester {
            if let Some(semester) = &filters.semester_id {
                if &row.semester_id != semester {
                    return false;
                }
            }
        }
        if let Some(course) = &filters.course {
            if !same_text(&row.course, course) {
                return false;
            }
        }
        if let Some(teacher) = &filters.teacher_id {
            if row.teacher_id.as_deref() != Some(teacher.as_str()) {
                return false;
            }
        }
        if let Some(level) = filters.year_level {
            if row.year_level != Some(level) {
                return false;
            }
        }
        if let Some(subject) = &filters.subject_code {
            let wanted = normalize_code(subject);
            if row.subject_code.as_deref().map(normalize_code) != Some(wanted) {
                return false;
            }
        }
        if let Some(student) = &filters.student_id {
            if &row.student_id != student {
                return false;
            }
        }
        true
    }

    /// Rows visible to the caller after role scoping and every filter.
    pub fn select(&self, ctx: &ViewContext) -> Vec<&ResolvedRow> {
        self.rows
            .iter()
            .filter(|row| ctx.permits(row) && Self::matches(&ctx.filters, row, true))
            .collect()
    }

    fn select_any_semester(&self, ctx: &ViewContext) -> Vec<&ResolvedRow> {
        self.rows
            .iter()
            .filter(|row| ctx.permits(row) && Self::matches(&ctx.filters, row, false))
            .collect()
    }

    fn compare_semesters(&self, a: &str, b: &str) -> Ordering {
        match (self.index.semester(a), self.index.semester(b)) {
            (Some(x), Some(y)) => Semester::chronological(x, y).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }

    /// Head of the (school year desc, term asc) ordering among the given ids.
    pub fn latest_semester<'s, I>(&self, ids: I) -> Option<String>
    where
        I: IntoIterator<Item = &'s str>,
    {
        ids.into_iter()
            .min_by(|a, b| self.compare_semesters(a, b))
            .map(str::to_string)
    }

    /// The filtered semester, else the latest one with rows in the whole
    /// dataset. Never narrowed by role, so every caller agrees on it.
    fn current_semester(&self, ctx: &ViewContext) -> Option<String> {
        ctx.filters.semester_id.clone().or_else(|| {
            let ids: HashSet<&str> = self.rows.iter().map(|r| r.semester_id.as_str()).collect();
            self.latest_semester(ids)
        })
    }

    /// Roster entries the caller may see, narrowed by the student-level
    /// filters.
    fn students_in_scope(&self, ctx: &ViewContext) -> Vec<&'a Student> {
        let taught: Option<HashSet<&str>> = (ctx.role == Role::Faculty).then(|| {
            self.rows
                .iter()
                .filter(|row| ctx.permits(row))
                .map(|row| row.student_id.as_str())
                .collect()
        });

        let dataset: &'a Dataset = self.dataset;
        dataset
            .students
            .iter()
            .filter(|s| ctx.permits_student(&s.id))
            .filter(|s| taught.as_ref().map_or(true, |ids| ids.contains(s.id.as_str())))
            .filter(|s| {
                let f = &ctx.filters;
                f.course.as_deref().map_or(true, |c| same_text(&s.course, c))
                    && f.year_level.map_or(true, |y| s.year_level == Some(y))
                    && f.student_id.as_deref().map_or(true, |id| s.id == id)
            })
            .collect()
    }

    fn summarize_group(&self, group: String, rows: &[&ResolvedRow]) -> GroupSummaryRow {
        let students: HashSet<&str> = rows.iter().map(|r| r.student_id.as_str()).collect();
        let counts = PassCounts::tally(rows.iter().map(|r| r.grade), &self.thresholds);
        GroupSummaryRow {
            group,
            students: students.len(),
            rows: rows.len(),
            mean_grade: mean_grade(rows.iter().map(|r| r.grade)).map(round2),
            pass_rate: counts.pass_rate(),
        }
    }

    pub fn subject_pass_rates(&self, ctx: &ViewContext) -> View<SubjectPassRow> {
        let selected = self.select(ctx);
        let mut groups: BTreeMap<String, Vec<&ResolvedRow>> = BTreeMap::new();
        for &row in &selected {
            let code = row.subject_code.clone().unwrap_or_else(|| UNKNOWN_LABEL.to_string());
            groups.entry(code).or_default().push(row);
        }

        let mut rows: Vec<SubjectPassRow> = groups
            .into_iter()
            .map(|(code, members)| {
                let counts = PassCounts::tally(members.iter().map(|r| r.grade), &self.thresholds);
                SubjectPassRow {
                    description: members[0].subject_description.clone(),
                    subject_code: code,
                    enrolled: members.len(),
                    passed: counts.pass,
                    failed: counts.fail,
                    incomplete: counts.incomplete,
                    pass_rate: counts.pass_rate(),
                    mean_grade: mean_grade(members.iter().map(|r| r.grade)).map(round2),
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            cmp_opt_asc(a.pass_rate, b.pass_rate)
                .then_with(|| b.enrolled.cmp(&a.enrolled))
                .then_with(|| a.subject_code.cmp(&b.subject_code))
        });

        let overall = PassCounts::tally(selected.iter().map(|r| r.grade), &self.thresholds);
        let subjects = rows.len();
        View::new("Subject Pass Rates", rows)
            .count("subjects", subjects)
            .stat("overall_pass_rate", overall.pass_rate())
            .stat("mean_grade", mean_grade(selected.iter().map(|r| r.grade)).map(round2))
    }

    pub fn failure_rates(&self, ctx: &ViewContext) -> View<FailureRateRow> {
        let selected = self.select(ctx);
        let mut groups: BTreeMap<(Option<String>, String), Vec<&ResolvedRow>> = BTreeMap::new();
        for &row in &selected {
            let Some(code) = row.subject_code.clone() else {
                continue;
            };
            groups.entry((row.teacher_id.clone(), code)).or_default().push(row);
        }

        let mut rows: Vec<FailureRateRow> = groups
            .into_iter()
            .filter_map(|((teacher_id, subject_code), members)| {
                let rate = failure_rate(members.iter().map(|r| r.grade), &self.thresholds)?;
                Some(FailureRateRow {
                    teacher_name: members[0].teacher_name.clone(),
                    description: members[0].subject_description.clone(),
                    teacher_id,
                    subject_code,
                    failures: rate.failures,
                    attempts: rate.attempts,
                    failure_rate: rate.rate,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.failure_rate
                .total_cmp(&a.failure_rate)
                .then_with(|| b.attempts.cmp(&a.attempts))
                .then_with(|| b.failures.cmp(&a.failures))
                .then_with(|| a.teacher_name.cmp(&b.teacher_name))
                .then_with(|| a.subject_code.cmp(&b.subject_code))
        });

        let overall = failure_rate(selected.iter().map(|r| r.grade), &self.thresholds);
        let groups = rows.len();
        View::new("Subject Failure Rates", rows)
            .count("groups", groups)
            .stat("overall_failure_rate", overall.map(|r| r.rate))
    }

    pub fn year_level_summary(&self, ctx: &ViewContext) -> View<GroupSummaryRow> {
        let selected = self.select(ctx);
        let mut groups: BTreeMap<Option<u8>, Vec<&ResolvedRow>> = BTreeMap::new();
        for &row in &selected {
            groups.entry(row.year_level).or_default().push(row);
        }

        // BTreeMap puts None first; unassigned reads better last.
        let mut ordered: Vec<(Option<u8>, Vec<&ResolvedRow>)> = groups.into_iter().collect();
        ordered.sort_by_key(|(level, _)| (level.is_none(), *level));

        let rows: Vec<GroupSummaryRow> = ordered
            .into_iter()
            .map(|(level, members)| {
                let label = level.map_or_else(|| "Unassigned".to_string(), |l| format!("Year {l}"));
                self.summarize_group(label, &members)
            })
            .collect();
        let levels = rows.len();
        View::new("Year Level Summary", rows).count("year_levels", levels)
    }

    pub fn semester_summary(&self, ctx: &ViewContext) -> View<GroupSummaryRow> {
        let selected = self.select(ctx);
        let mut groups: HashMap<&str, Vec<&ResolvedRow>> = HashMap::new();
        for &row in &selected {
            groups.entry(row.semester_id.as_str()).or_default().push(row);
        }

        let mut ordered: Vec<(&str, Vec<&ResolvedRow>)> = groups.into_iter().collect();
        ordered.sort_by(|(a, _), (b, _)| self.compare_semesters(a, b));

        let rows: Vec<GroupSummaryRow> = ordered
            .into_iter()
            .map(|(_, members)| self.summarize_group(members[0].semester_label.clone(), &members))
            .collect();
        let semesters = rows.len();
        View::new("Semester Summary", rows).count("semesters", semesters)
    }

    pub fn academic_standing(&self, ctx: &ViewContext) -> View<StandingRow> {
        let selected = self.select(ctx);
        let mut groups: HashMap<(&str, &str), Vec<&ResolvedRow>> = HashMap::new();
        for &row in &selected {
            groups
                .entry((row.student_id.as_str(), row.semester_id.as_str()))
                .or_default()
                .push(row);
        }

        let mut rows: Vec<StandingRow> = groups
            .into_values()
            .map(|members| {
                let first = members[0];
                let gpa = mean_grade(members.iter().map(|r| r.grade));
                StandingRow {
                    student_id: first.student_id.clone(),
                    student_name: first.student_name.clone(),
                    course: first.course.clone(),
                    year_level: first.year_level,
                    semester_id: first.semester_id.clone(),
                    semester_label: first.semester_label.clone(),
                    subjects: members.len(),
                    gpa: gpa.map(round2),
                    standing: gpa.map(|g| academic_standing(g, &self.thresholds)),
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            self.compare_semesters(&a.semester_id, &b.semester_id)
                .then_with(|| cmp_opt_desc(a.gpa, b.gpa))
                .then_with(|| a.student_name.cmp(&b.student_name))
                .then_with(|| a.student_id.cmp(&b.student_id))
        });

        let tally = |standing: Option<Standing>| rows.iter().filter(|r| r.standing == standing).count();
        let deans_list = tally(Some(Standing::DeansList));
        let good = tally(Some(Standing::GoodStanding));
        let probation = tally(Some(Standing::Probation));
        let ungraded = tally(None);
        View::new("Academic Standing", rows)
            .count("deans_list", deans_list)
            .count("good_standing", good)
            .count("probation", probation)
            .count("not_graded", ungraded)
    }

    /// Risk over the current semester: the filtered one, else the latest
    /// semester in the dataset.
    pub fn student_risk(&self, ctx: &ViewContext) -> View<RiskRow> {
        let scoped = self.select_any_semester(ctx);
        let Some(current) = self.current_semester(ctx) else {
            return View::new("Student Risk", Vec::new())
                .count("students", 0)
                .count("needs_intervention", 0)
                .count("on_track", 0);
        };

        let mut groups: BTreeMap<&str, Vec<&ResolvedRow>> = BTreeMap::new();
        for row in scoped.into_iter().filter(|r| r.semester_id == current) {
            groups.entry(row.student_id.as_str()).or_default().push(row);
        }

        let mut rows: Vec<RiskRow> = groups
            .into_values()
            .filter_map(|members| {
                let risk = assess_risk(members.iter().map(|r| r.grade), &self.thresholds)?;
                let first = members[0];
                Some(RiskRow {
                    student_id: first.student_id.clone(),
                    student_name: first.student_name.clone(),
                    course: first.course.clone(),
                    year_level: first.year_level,
                    semester_label: first.semester_label.clone(),
                    subjects: members.len(),
                    average: risk.average,
                    failed_count: risk.failed_count,
                    status: risk.status,
                    reasons: risk.reasons,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            let flagged = |r: &RiskRow| r.status != RiskStatus::NeedsIntervention;
            flagged(a)
                .cmp(&flagged(b))
                .then_with(|| a.average.total_cmp(&b.average))
                .then_with(|| a.student_name.cmp(&b.student_name))
        });

        let flagged = rows
            .iter()
            .filter(|r| r.status == RiskStatus::NeedsIntervention)
            .count();
        let students = rows.len();
        View::new("Student Risk", rows)
            .count("students", students)
            .count("needs_intervention", flagged)
            .count("on_track", students - flagged)
    }

    pub fn retention(&self, ctx: &ViewContext) -> View<RetentionRow> {
        let scoped = self.select_any_semester(ctx);
        let latest = self.current_semester(ctx);

        let mut by_student: HashMap<&str, Vec<&ResolvedRow>> = HashMap::new();
        for &row in &scoped {
            by_student.entry(row.student_id.as_str()).or_default().push(row);
        }

        let mut rows: Vec<RetentionRow> = self
            .students_in_scope(ctx)
            .into_iter()
            .map(|student| {
                let history = by_student.get(student.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                let semesters: HashSet<&str> = history.iter().map(|r| r.semester_id.as_str()).collect();
                let latest_gpa = latest.as_deref().and_then(|latest| {
                    mean_grade(
                        history
                            .iter()
                            .filter(|r| r.semester_id == latest)
                            .map(|r| r.grade),
                    )
                });
                RetentionRow {
                    student_id: student.id.clone(),
                    student_name: student.name.clone(),
                    course: student.course.clone(),
                    year_level: student.year_level,
                    semesters_enrolled: semesters.len(),
                    latest_gpa: latest_gpa.map(round2),
                    status: retention_status(!history.is_empty(), latest_gpa, &self.thresholds),
                }
            })
            .collect();
        let order = |status: RetentionStatus| match status {
            RetentionStatus::Dropped => 0,
            RetentionStatus::AtRisk => 1,
            RetentionStatus::Retained => 2,
        };
        rows.sort_by(|a, b| {
            order(a.status)
                .cmp(&order(b.status))
                .then_with(|| a.student_name.cmp(&b.student_name))
                .then_with(|| a.student_id.cmp(&b.student_id))
        });

        let count = |status: RetentionStatus| rows.iter().filter(|r| r.status == status).count();
        let retained = count(RetentionStatus::Retained);
        let at_risk = count(RetentionStatus::AtRisk);
        let dropped = count(RetentionStatus::Dropped);
        let total = rows.len();
        View::new("Retention", rows)
            .count("retained", retained)
            .count("at_risk", at_risk)
            .count("dropped", dropped)
            .stat("retention_rate", percent(retained, total))
    }

    /// Ranks are computed over the whole class and then narrowed to the
    /// caller, so a student sees their true standing in the section.
    pub fn class_rank(&self, ctx: &ViewContext) -> View<RankRow> {
        let mut groups: BTreeMap<(String, Option<String>, &str), Vec<&ResolvedRow>> = BTreeMap::new();
        for row in self.rows.iter().filter(|r| Self::matches(&ctx.filters, r, true)) {
            let Some(code) = row.subject_code.as_deref() else {
                continue;
            };
            groups
                .entry((normalize_code(code), row.section.clone(), row.semester_id.as_str()))
                .or_default()
                .push(row);
        }

        let mut ranked: Vec<(&str, RankRow)> = Vec::new();
        for members in groups.into_values() {
            let grades: Vec<_> = members.iter().map(|r| r.grade).collect();
            let ranks = dense_rank(&grades);
            for (row, rank) in members.into_iter().zip(ranks) {
                if !ctx.permits(row) {
                    continue;
                }
                ranked.push((
                    row.semester_id.as_str(),
                    RankRow {
                        subject_code: row.subject_code.clone().unwrap_or_default(),
                        section: row.section.clone(),
                        semester_label: row.semester_label.clone(),
                        student_id: row.student_id.clone(),
                        student_name: row.student_name.clone(),
                        grade: row.grade.numeric(),
                        rank,
                    },
                ));
            }
        }
        ranked.sort_by(|(sa, a), (sb, b)| {
            a.subject_code
                .cmp(&b.subject_code)
                .then_with(|| a.section.cmp(&b.section))
                .then_with(|| self.compare_semesters(sa, sb))
                .then_with(|| match (a.rank, b.rank) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
                .then_with(|| a.student_name.cmp(&b.student_name))
        });

        let rows: Vec<RankRow> = ranked.into_iter().map(|(_, row)| row).collect();
        let ranked_count = rows.iter().filter(|r| r.rank.is_some()).count();
        View::new("Class Rank", rows).count("ranked", ranked_count)
    }

    fn passed_codes(&self, student_id: &str) -> HashSet<String> {
        self.rows
            .iter()
            .filter(|r| r.student_id == student_id)
            .filter(|r| pass_status(r.grade, &self.thresholds) == PassStatus::Pass)
            .filter_map(|r| r.subject_code.as_deref().map(normalize_code))
            .collect()
    }

    /// Eligibility for `filters.subject_code`. Passed subjects are taken
    /// from the student's whole history, not the filtered rows.
    pub fn prerequisite_eligibility(&self, ctx: &ViewContext) -> View<EligibilityRow> {
        let target = ctx.filters.subject_code.as_deref().and_then(|code| {
            let wanted = normalize_code(code);
            self.dataset
                .subjects
                .iter()
                .find(|s| normalize_code(&s.code) == wanted)
        });
        let Some(target) = target else {
            return View::new("Prerequisite Eligibility", Vec::new())
                .count("eligible", 0)
                .count("ineligible", 0);
        };

        let mut rows: Vec<EligibilityRow> = self
            .students_in_scope(ctx)
            .into_iter()
            .map(|student| {
                let missing = missing_prerequisites(&target.prerequisites, &self.passed_codes(&student.id));
                EligibilityRow {
                    student_id: student.id.clone(),
                    student_name: student.name.clone(),
                    course: student.course.clone(),
                    year_level: student.year_level,
                    eligible: missing.is_empty(),
                    missing,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.eligible
                .cmp(&a.eligible)
                .then_with(|| a.student_name.cmp(&b.student_name))
                .then_with(|| a.student_id.cmp(&b.student_id))
        });

        let eligible = rows.iter().filter(|r| r.eligible).count();
        let ineligible = rows.len() - eligible;
        View::new("Prerequisite Eligibility", rows)
            .count("eligible", eligible)
            .count("ineligible", ineligible)
            .count("prerequisites", target.prerequisites.len())
    }

    fn curriculum_for(&self, course: &str) -> Option<&'a Curriculum> {
        let dataset: &'a Dataset = self.dataset;
        dataset
            .curricula
            .iter()
            .filter(|c| same_text(&c.course_code, course) || same_text(&c.course_name, course))
            .max_by(|a, b| a.curriculum_year.cmp(&b.curriculum_year))
    }

    /// Progress of one student through their course's curriculum.
    pub fn curriculum_evaluation(&self, ctx: &ViewContext) -> View<CurriculumRow> {
        let empty = || View::new("Curriculum Evaluation", Vec::new());
        let student_id = match (ctx.role, &ctx.filters.student_id) {
            (_, Some(id)) => id.clone(),
            (Role::Student, None) => match &ctx.user_id {
                Some(id) => id.clone(),
                None => return empty(),
            },
            _ => return empty(),
        };
        let scoped = ViewContext {
            filters: ViewFilters {
                student_id: Some(student_id.clone()),
                ..ViewFilters::default()
            },
            ..ctx.clone()
        };
        let Some(student) = self.students_in_scope(&scoped).into_iter().next() else {
            return empty();
        };
        let Some(curriculum) = self.curriculum_for(&student.course) else {
            return empty();
        };

        let mut attempts: HashMap<String, Vec<&ResolvedRow>> = HashMap::new();
        for row in self.rows.iter().filter(|r| r.student_id == student.id) {
            if let Some(code) = row.subject_code.as_deref() {
                attempts.entry(normalize_code(code)).or_default().push(row);
            }
        }

        let mut rows: Vec<CurriculumRow> = curriculum
            .subjects
            .iter()
            .map(|entry| {
                let taken = attempts
                    .get(&normalize_code(&entry.subject_code))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let best = taken
                    .iter()
                    .filter_map(|r| r.grade.numeric())
                    .max_by(|a, b| a.total_cmp(b));
                let status = match best {
                    _ if taken.is_empty() => CurriculumStatus::NotTaken,
                    Some(grade) if grade >= self.thresholds.passing => CurriculumStatus::Passed,
                    Some(_) => CurriculumStatus::Failed,
                    None => CurriculumStatus::Incomplete,
                };
                CurriculumRow {
                    year_level: entry.year_level,
                    term: entry.term,
                    subject_code: entry.subject_code.clone(),
                    subject_name: entry.subject_name.clone(),
                    units: entry.units,
                    attempts: taken.len(),
                    best_grade: best,
                    status,
                }
            })
            .collect();
        rows.sort_by_key(|r| (r.year_level.is_none(), r.year_level, r.term));

        let passed: Vec<&CurriculumRow> = rows
            .iter()
            .filter(|r| r.status == CurriculumStatus::Passed)
            .collect();
        let passed_count = passed.len();
        let units_earned: f64 = passed.iter().map(|r| r.units).sum();
        let units_total: f64 = rows.iter().map(|r| r.units).sum();
        let total = rows.len();
        View::new("Curriculum Evaluation", rows)
            .count("subjects", total)
            .count("passed", passed_count)
            .stat("completion_percent", percent(passed_count, total))
            .stat("units_earned", Some(units_earned))
            .stat("units_total", Some(units_total))
    }

    pub fn submission_completeness(&self, ctx: &ViewContext) -> View<CompletenessRow> {
        let selected = self.select(ctx);
        let mut groups: BTreeMap<(Option<String>, &str), Vec<&ResolvedRow>> = BTreeMap::new();
        for &row in &selected {
            groups
                .entry((row.teacher_id.clone(), row.semester_id.as_str()))
                .or_default()
                .push(row);
        }

        let mut rows: Vec<CompletenessRow> = groups
            .into_iter()
            .map(|((teacher_id, semester_id), members)| {
                let graded = members.iter().filter(|r| r.grade.numeric().is_some()).count();
                CompletenessRow {
                    teacher_name: members[0].teacher_name.clone(),
                    semester_label: members[0].semester_label.clone(),
                    teacher_id,
                    semester_id: semester_id.to_string(),
                    total: members.len(),
                    graded,
                    missing: members.len() - graded,
                    completeness: percent(graded, members.len()),
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            cmp_opt_asc(a.completeness, b.completeness)
                .then_with(|| b.total.cmp(&a.total))
                .then_with(|| a.teacher_name.cmp(&b.teacher_name))
        });

        let total: usize = rows.iter().map(|r| r.total).sum();
        let graded: usize = rows.iter().map(|r| r.graded).sum();
        View::new("Grade Submission Completeness", rows)
            .count("rows", total)
            .count("graded", graded)
            .stat("completeness", percent(graded, total))
    }
}

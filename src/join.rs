use std::collections::HashMap;

use tracing::debug;

use crate::models::{Dataset, GradeRow, ResolvedRow, Semester, Student, Subject, Teacher};

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Id lookups over the reference tables of one dataset.
pub struct ReferenceIndex<'a> {
    students: HashMap<&'a str, &'a Student>,
    subjects: HashMap<&'a str, &'a Subject>,
    semesters: HashMap<&'a str, &'a Semester>,
    teachers: HashMap<&'a str, &'a Teacher>,
}

impl<'a> ReferenceIndex<'a> {
    pub fn new(dataset: &'a Dataset) -> Self {
        Self {
            students: dataset.students.iter().map(|s| (s.id.as_str(), s)).collect(),
            subjects: dataset.subjects.iter().map(|s| (s.code.as_str(), s)).collect(),
            semesters: dataset.semesters.iter().map(|s| (s.id.as_str(), s)).collect(),
            teachers: dataset.teachers.iter().map(|t| (t.id.as_str(), t)).collect(),
        }
    }

    pub fn student(&self, id: &str) -> Option<&'a Student> {
        self.students.get(id).copied()
    }

    pub fn subject(&self, code: &str) -> Option<&'a Subject> {
        self.subjects.get(code).copied()
    }

    pub fn semester(&self, id: &str) -> Option<&'a Semester> {
        self.semesters.get(id).copied()
    }

    pub fn teacher(&self, id: &str) -> Option<&'a Teacher> {
        self.teachers.get(id).copied()
    }

    pub fn teacher_name(&self, id: Option<&str>) -> String {
        match id.and_then(|id| self.teacher(id)) {
            Some(teacher) if !teacher.name.is_empty() => teacher.name.clone(),
            _ => UNKNOWN_LABEL.to_string(),
        }
    }

    pub fn semester_label(&self, id: &str) -> String {
        self.semester(id)
            .map(Semester::label)
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }

    /// Left-joins every reference table onto the row. A miss yields the
    /// fallback label rather than dropping the row.
    pub fn resolve(&self, row: GradeRow) -> ResolvedRow {
        let student = self.student(&row.student_id);
        if student.is_none() {
            debug!(student_id = %row.student_id, "student not found in roster");
        }

        let subject = row.subject_code.as_deref().and_then(|code| self.subject(code));
        if subject.is_none() {
            debug!(subject_code = ?row.subject_code, "subject not found in catalog");
        }

        let semester = self.semester(&row.semester_id);
        if semester.is_none() {
            debug!(semester_id = %row.semester_id, "semester not found");
        }

        let teacher_name = self.teacher_name(row.teacher_id.as_deref());
        if row.teacher_id.is_some() && teacher_name == UNKNOWN_LABEL {
            debug!(teacher_id = ?row.teacher_id, "teacher not found in roster");
        }

        ResolvedRow {
            student_name: student
                .map(|s| s.name.clone())
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            course: student
                .map(|s| s.course.clone())
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            year_level: student.and_then(|s| s.year_level),
            semester_label: semester
                .map(Semester::label)
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            term: semester.map(|s| s.term).unwrap_or_default(),
            school_year: semester.and_then(|s| s.school_year),
            subject_description: subject
                .map(|s| s.description.clone())
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            units: subject.map(|s| s.units).unwrap_or(0.0),
            teacher_name,
            student_id: row.student_id,
            semester_id: row.semester_id,
            subject_code: row.subject_code,
            teacher_id: row.teacher_id,
            section: row.section,
            grade: row.grade,
        }
    }
}

pub fn resolve_all<I>(index: &ReferenceIndex<'_>, rows: I) -> Vec<ResolvedRow>
where
    I: IntoIterator<Item = GradeRow>,
{
    rows.into_iter().map(|row| index.resolve(row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GradeValue, SemesterTerm};
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset {
            students: vec![serde_json::from_value(json!({
                "_id": "S1", "Name": "Dana Cruz", "Course": "BSCS", "YearLevel": 2
            }))
            .unwrap()],
            subjects: vec![serde_json::from_value(json!({
                "_id": "MATH1", "Description": "College Algebra", "Units": 3
            }))
            .unwrap()],
            semesters: vec![serde_json::from_value(json!({
                "_id": "T1", "Semester": "FirstSem", "SchoolYear": 2024
            }))
            .unwrap()],
            teachers: vec![serde_json::from_value(json!({"_id": "TA", "Name": "Prof. Reyes"})).unwrap()],
            ..Dataset::default()
        }
    }

    fn row(subject: &str, teacher: &str) -> GradeRow {
        GradeRow {
            student_id: "S1".to_string(),
            semester_id: "T1".to_string(),
            subject_code: Some(subject.to_string()),
            teacher_id: Some(teacher.to_string()),
            grade: GradeValue::Numeric(88.0),
            section: None,
        }
    }

    #[test]
    fn attaches_reference_labels() {
        let data = dataset();
        let index = ReferenceIndex::new(&data);
        let resolved = index.resolve(row("MATH1", "TA"));

        assert_eq!(resolved.student_name, "Dana Cruz");
        assert_eq!(resolved.course, "BSCS");
        assert_eq!(resolved.year_level, Some(2));
        assert_eq!(resolved.subject_description, "College Algebra");
        assert_eq!(resolved.units, 3.0);
        assert_eq!(resolved.teacher_name, "Prof. Reyes");
        assert_eq!(resolved.semester_label, "First Semester 2024");
        assert_eq!(resolved.term, SemesterTerm::First);
    }

    #[test]
    fn misses_fall_back_to_unknown() {
        let data = dataset();
        let index = ReferenceIndex::new(&data);
        let mut orphan = row("PHYS9", "TZ");
        orphan.student_id = "S404".to_string();
        orphan.semester_id = "T404".to_string();

        let resolved = resolve_all(&index, vec![orphan]);
        assert_eq!(resolved.len(), 1);
        let resolved = &resolved[0];
        assert_eq!(resolved.student_name, UNKNOWN_LABEL);
        assert_eq!(resolved.subject_description, UNKNOWN_LABEL);
        assert_eq!(resolved.teacher_name, UNKNOWN_LABEL);
        assert_eq!(resolved.semester_label, UNKNOWN_LABEL);
        assert_eq!(resolved.units, 0.0);
        assert_eq!(resolved.grade, GradeValue::Numeric(88.0));
    }
}

//! Expands enrollment records into one row per subject attempt.
//!
//! Legacy records store the parallel fields as a scalar, a list, or not at
//! all. Everything is normalized to a list here so nothing downstream has to
//! care which vintage a record came from.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{id_from_value, EnrollmentRecord, GradeRow, GradeValue};

/// Scalar ⇒ single-element list, null ⇒ empty list.
pub fn one_or_many(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

pub fn de_code_sequence<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Option<String>>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(one_or_many(value).iter().map(id_from_value).collect())
}

pub fn de_code_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(one_or_many(value).iter().filter_map(id_from_value).collect())
}

pub fn de_grade_sequence<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<GradeValue>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(one_or_many(value).iter().map(GradeValue::from_value).collect())
}

/// Width of the record: the longest of the three parallel sequences.
pub fn row_count(record: &EnrollmentRecord) -> usize {
    record
        .subject_codes
        .len()
        .max(record.grades.len())
        .max(record.teachers.len())
}

/// Yields exactly `row_count(record)` rows. A short sequence contributes
/// nulls at the missing positions instead of shortening the output.
pub fn flatten(record: &EnrollmentRecord) -> impl Iterator<Item = GradeRow> + '_ {
    (0..row_count(record)).map(move |i| GradeRow {
        student_id: record.student_id.clone(),
        semester_id: record.semester_id.clone(),
        subject_code: record.subject_codes.get(i).cloned().flatten(),
        teacher_id: record.teachers.get(i).cloned().flatten(),
        grade: record.grades.get(i).copied().unwrap_or(GradeValue::Unknown),
        section: record.section.clone(),
    })
}

pub fn flatten_all(records: &[EnrollmentRecord]) -> impl Iterator<Item = GradeRow> + '_ {
    records.iter().flat_map(|record| flatten(record))
}

use std::cmp::{Ordering, Reverse};
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::flatten;

/// One snapshot per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Students,
    Grades,
    Subjects,
    Semesters,
    Teachers,
    Curricula,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Students,
        Collection::Grades,
        Collection::Subjects,
        Collection::Semesters,
        Collection::Teachers,
        Collection::Curricula,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Students => "students",
            Collection::Grades => "grades",
            Collection::Subjects => "subjects",
            Collection::Semesters => "semesters",
            Collection::Teachers => "teachers",
            Collection::Curricula => "curricula",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grade cell as it appears in an enrollment record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeValue {
    Numeric(f64),
    Incomplete,
    Unknown,
}

const INCOMPLETE_CODES: [&str; 7] = ["INC", "DRP", "W", "NG", "DROPPED", "INCOMPLETE", "WITHDRAWN"];

impl GradeValue {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map_or(GradeValue::Unknown, Self::from_number),
            Value::String(s) => Self::parse(s),
            _ => GradeValue::Unknown,
        }
    }

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse::<f64>() {
            return Self::from_number(n);
        }
        let upper = trimmed.to_ascii_uppercase();
        if INCOMPLETE_CODES.contains(&upper.as_str()) {
            GradeValue::Incomplete
        } else {
            GradeValue::Unknown
        }
    }

    fn from_number(n: f64) -> Self {
        if n.is_finite() && (0.0..=100.0).contains(&n) {
            GradeValue::Numeric(n)
        } else {
            GradeValue::Unknown
        }
    }

    pub fn numeric(&self) -> Option<f64> {
        match self {
            GradeValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }
}

impl Serialize for GradeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GradeValue::Numeric(n) => serializer.serialize_f64(*n),
            GradeValue::Incomplete => serializer.serialize_str("INC"),
            GradeValue::Unknown => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SemesterTerm {
    First,
    Second,
    Summer,
    #[default]
    Unknown,
}

impl SemesterTerm {
    pub fn parse(raw: &str) -> Self {
        let label = raw.trim().to_ascii_lowercase();
        if label.starts_with("first") || label.starts_with("1") {
            SemesterTerm::First
        } else if label.starts_with("second") || label.starts_with("2") {
            SemesterTerm::Second
        } else if label.starts_with("summer") || label.starts_with("mid") {
            SemesterTerm::Summer
        } else {
            SemesterTerm::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SemesterTerm::First => "First Semester",
            SemesterTerm::Second => "Second Semester",
            SemesterTerm::Summer => "Summer",
            SemesterTerm::Unknown => "Unknown Term",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Student {
    #[serde(flatten, deserialize_with = "de_student_key")]
    pub id: String,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Course", alias = "course", default)]
    pub course: String,
    #[serde(rename = "YearLevel", alias = "yearLevel", default, deserialize_with = "de_opt_year_level")]
    pub year_level: Option<u8>,
    #[serde(rename = "Status", alias = "status", default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subject {
    #[serde(flatten, deserialize_with = "de_subject_key")]
    pub code: String,
    #[serde(rename = "Description", alias = "description", default)]
    pub description: String,
    #[serde(rename = "Units", alias = "units", default, deserialize_with = "de_lenient_f64")]
    pub units: f64,
    #[serde(rename = "LecHours", default, deserialize_with = "de_opt_f64")]
    pub lecture_hours: Option<f64>,
    #[serde(rename = "LabHours", default, deserialize_with = "de_opt_f64")]
    pub lab_hours: Option<f64>,
    #[serde(rename = "Teacher", alias = "TeacherID", default, deserialize_with = "de_opt_id")]
    pub teacher_id: Option<String>,
    #[serde(
        rename = "Prerequisites",
        alias = "PreRequisite",
        default,
        deserialize_with = "flatten::de_code_list"
    )]
    pub prerequisites: Vec<String>,
    #[serde(rename = "YearLevel", default, deserialize_with = "de_opt_year_level")]
    pub year_level: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Semester {
    #[serde(flatten, deserialize_with = "de_semester_key")]
    pub id: String,
    #[serde(rename = "Semester", alias = "semester", default, deserialize_with = "de_term")]
    pub term: SemesterTerm,
    #[serde(rename = "SchoolYear", alias = "schoolYear", default, deserialize_with = "de_opt_year")]
    pub school_year: Option<i32>,
}

impl Semester {
    pub fn label(&self) -> String {
        match self.school_year {
            Some(year) => format!("{} {}", self.term.label(), year),
            None => self.term.label().to_string(),
        }
    }

    /// School year descending, then term order ascending.
    pub fn sort_key(&self) -> (Reverse<i32>, SemesterTerm) {
        (Reverse(self.school_year.unwrap_or(i32::MIN)), self.term)
    }

    pub fn chronological(a: &Semester, b: &Semester) -> Ordering {
        a.sort_key().cmp(&b.sort_key())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Teacher {
    #[serde(flatten, deserialize_with = "de_teacher_key")]
    pub id: String,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurriculumEntry {
    #[serde(rename = "subjectCode", alias = "SubjectCode", deserialize_with = "de_id")]
    pub subject_code: String,
    #[serde(rename = "subjectName", alias = "Description", default)]
    pub subject_name: String,
    #[serde(rename = "yearLevel", alias = "YearLevel", default, deserialize_with = "de_opt_year_level")]
    pub year_level: Option<u8>,
    #[serde(rename = "semester", alias = "Semester", default, deserialize_with = "de_term")]
    pub term: SemesterTerm,
    #[serde(rename = "units", alias = "Units", default, deserialize_with = "de_lenient_f64")]
    pub units: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Curriculum {
    #[serde(rename = "courseCode", alias = "CourseCode")]
    pub course_code: String,
    #[serde(rename = "courseName", alias = "CourseName", default)]
    pub course_name: String,
    #[serde(rename = "curriculumYear", alias = "CurriculumYear", default, deserialize_with = "de_opt_id")]
    pub curriculum_year: Option<String>,
    #[serde(rename = "subjects", alias = "Subjects", default)]
    pub subjects: Vec<CurriculumEntry>,
}

/// One per (student, semester). The three sequences are index-aligned.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentRecord {
    #[serde(rename = "_id", default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(rename = "StudentID", deserialize_with = "de_id")]
    pub student_id: String,
    #[serde(rename = "SemesterID", deserialize_with = "de_id")]
    pub semester_id: String,
    #[serde(rename = "SubjectCodes", default, deserialize_with = "flatten::de_code_sequence")]
    pub subject_codes: Vec<Option<String>>,
    #[serde(rename = "Grades", default, deserialize_with = "flatten::de_grade_sequence")]
    pub grades: Vec<GradeValue>,
    #[serde(rename = "Teachers", default, deserialize_with = "flatten::de_code_sequence")]
    pub teachers: Vec<Option<String>>,
    #[serde(rename = "SectionCode", default, deserialize_with = "de_opt_id")]
    pub section: Option<String>,
}

/// Row-level view of one subject attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeRow {
    pub student_id: String,
    pub semester_id: String,
    pub subject_code: Option<String>,
    pub teacher_id: Option<String>,
    pub grade: GradeValue,
    pub section: Option<String>,
}

/// A grade row with every reference lookup attached.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedRow {
    pub student_id: String,
    pub student_name: String,
    pub course: String,
    pub year_level: Option<u8>,
    pub semester_id: String,
    pub semester_label: String,
    pub term: SemesterTerm,
    pub school_year: Option<i32>,
    pub subject_code: Option<String>,
    pub subject_description: String,
    pub units: f64,
    pub teacher_id: Option<String>,
    pub teacher_name: String,
    pub section: Option<String>,
    pub grade: GradeValue,
}

/// Typed tables for one cache generation.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub students: Vec<Student>,
    pub grades: Vec<EnrollmentRecord>,
    pub subjects: Vec<Subject>,
    pub semesters: Vec<Semester>,
    pub teachers: Vec<Teacher>,
    pub curricula: Vec<Curriculum>,
}

pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(id_from_value),
        _ => None,
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value).ok_or_else(|| D::Error::custom("expected a string or numeric id"))
}

/// Reads the key out of the fields no other member claimed. The business
/// key wins over `_id`, which in exported documents is often an ObjectId.
fn keyed_id<'de, D: Deserializer<'de>>(deserializer: D, key: &str) -> Result<String, D::Error> {
    let fields = Map::<String, Value>::deserialize(deserializer)?;
    fields
        .get(key)
        .and_then(id_from_value)
        .or_else(|| fields.get("_id").and_then(id_from_value))
        .ok_or_else(|| D::Error::custom(format!("missing {key} or _id")))
}

fn de_student_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    keyed_id(deserializer, "StudentID")
}

fn de_subject_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    keyed_id(deserializer, "SubjectCode")
}

fn de_semester_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    keyed_id(deserializer, "SemesterID")
}

fn de_teacher_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    keyed_id(deserializer, "TeacherID")
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(id_from_value(&value))
}

fn leading_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return Some(n);
    }
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<f64>().ok()
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

fn de_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

fn de_lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(de_opt_f64(deserializer)?.unwrap_or(0.0))
}

// Accepts 2, "2", "2nd Year".
fn de_opt_year_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value)
        .filter(|n| (1.0..=10.0).contains(n))
        .map(|n| n as u8))
}

// Accepts 2023, "2023", "2023-2024".
fn de_opt_year<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).map(|n| n as i32))
}

fn de_term<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SemesterTerm, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => SemesterTerm::parse(&s),
        Value::Number(n) => SemesterTerm::parse(&n.to_string()),
        _ => SemesterTerm::Unknown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grade_values_decode_sentinels_and_numbers() {
        assert_eq!(GradeValue::from_value(&json!(88)), GradeValue::Numeric(88.0));
        assert_eq!(GradeValue::from_value(&json!("74.5")), GradeValue::Numeric(74.5));
        assert_eq!(GradeValue::from_value(&json!("inc")), GradeValue::Incomplete);
        assert_eq!(GradeValue::from_value(&json!("DRP")), GradeValue::Incomplete);
        assert_eq!(GradeValue::from_value(&json!(null)), GradeValue::Unknown);
        assert_eq!(GradeValue::from_value(&json!(140)), GradeValue::Unknown);
        assert_eq!(GradeValue::from_value(&json!("n/a")), GradeValue::Unknown);
    }

    #[test]
    fn semester_terms_parse_leniently() {
        assert_eq!(SemesterTerm::parse("FirstSem"), SemesterTerm::First);
        assert_eq!(SemesterTerm::parse("2nd"), SemesterTerm::Second);
        assert_eq!(SemesterTerm::parse("Summer"), SemesterTerm::Summer);
        assert_eq!(SemesterTerm::parse("Fall"), SemesterTerm::Unknown);
    }

    #[test]
    fn semesters_sort_newest_year_first_then_term() {
        let mut semesters: Vec<Semester> = vec![
            serde_json::from_value(json!({"_id": "a", "Semester": "Second", "SchoolYear": 2023})).unwrap(),
            serde_json::from_value(json!({"_id": "b", "Semester": "First", "SchoolYear": 2024})).unwrap(),
            serde_json::from_value(json!({"_id": "c", "Semester": "First", "SchoolYear": 2023})).unwrap(),
        ];
        semesters.sort_by(Semester::chronological);
        let ids: Vec<&str> = semesters.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(semesters[0].label(), "First Semester 2024");
    }

    #[test]
    fn business_keys_win_over_document_ids() {
        let student: Student = serde_json::from_value(json!({
            "_id": {"$oid": "65f0"},
            "StudentID": "S1",
            "Name": "Dana"
        }))
        .unwrap();
        assert_eq!(student.id, "S1");
        assert_eq!(student.name, "Dana");

        let subject: Subject =
            serde_json::from_value(json!({"_id": {"$oid": "65f1"}, "SubjectCode": "MATH1", "Units": 3})).unwrap();
        assert_eq!(subject.code, "MATH1");
        let semester: Semester =
            serde_json::from_value(json!({"_id": "x", "SemesterID": "SY2024-1", "Semester": "First"})).unwrap();
        assert_eq!(semester.id, "SY2024-1");
        let teacher: Teacher = serde_json::from_value(json!({"_id": 9, "TeacherID": "T-100"})).unwrap();
        assert_eq!(teacher.id, "T-100");

        // A document id alone still keys the record.
        let teacher: Teacher = serde_json::from_value(json!({"_id": {"$oid": "65f2"}})).unwrap();
        assert_eq!(teacher.id, "65f2");
        assert!(serde_json::from_value::<Teacher>(json!({"Name": "No Key"})).is_err());
    }

    #[test]
    fn students_accept_numeric_ids_and_year_labels() {
        let student: Student = serde_json::from_value(json!({
            "_id": 20231001,
            "Name": "Dana Cruz",
            "Course": "BSCS",
            "YearLevel": "2nd Year"
        }))
        .unwrap();
        assert_eq!(student.id, "20231001");
        assert_eq!(student.year_level, Some(2));
        assert!(student.status.is_none());
    }

    #[test]
    fn object_ids_unwrap() {
        assert_eq!(
            id_from_value(&json!({"$oid": "65f0c0ffee"})),
            Some("65f0c0ffee".to_string())
        );
        assert_eq!(id_from_value(&json!("  ")), None);
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::flatten;
use crate::metrics::normalize_code;
use crate::models::{id_from_value, Collection};
use crate::store::{record_matches, Record, RecordStore};

#[derive(Debug, Clone, Deserialize)]
pub struct GradeUpdate {
    pub student_id: String,
    pub subject_code: String,
    pub semester_id: String,
    pub grade: Option<f64>,
    pub teacher_id: String,
}

impl GradeUpdate {
    /// Returns the grade once every field is present and in range.
    pub fn validate(&self) -> Result<f64> {
        let required = [
            ("student_id", &self.student_id),
            ("subject_code", &self.subject_code),
            ("semester_id", &self.semester_id),
            ("teacher_id", &self.teacher_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EngineError::validation(format!("{field} is required")));
            }
        }

        let grade = self
            .grade
            .ok_or_else(|| EngineError::validation("grade is required"))?;
        if !grade.is_finite() || !(0.0..=100.0).contains(&grade) {
            return Err(EngineError::validation(format!(
                "grade {grade} is outside 0-100"
            )));
        }
        Ok(grade)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Created,
    Overwritten { index: usize },
    Appended { index: usize },
}

/// Raw parallel sequence of a stored record, scalar or list.
fn cells(record: Option<&Value>, field: &str) -> Vec<Value> {
    record
        .and_then(|r| r.get(field))
        .cloned()
        .map(flatten::one_or_many)
        .unwrap_or_default()
}

/// Builds the patch for one grade on the stored record, creating the record
/// if needed. Only the target cell changes; every other cell is written back
/// exactly as stored so sentinels such as `"DRP"` survive.
pub fn apply_grade(
    existing: Option<&Value>,
    update: &GradeUpdate,
    grade: f64,
) -> (Record, UpdateOutcome) {
    let code = update.subject_code.trim();
    let teacher = update.teacher_id.trim();

    let mut codes = cells(existing, "SubjectCodes");
    let mut grades = cells(existing, "Grades");
    let mut teachers = cells(existing, "Teachers");
    let width = codes.len().max(grades.len()).max(teachers.len());
    codes.resize(width, Value::Null);
    grades.resize(width, Value::Null);
    teachers.resize(width, Value::Null);

    let wanted = normalize_code(code);
    let position = codes
        .iter()
        .position(|c| id_from_value(c).is_some_and(|c| normalize_code(&c) == wanted));

    let outcome = match position {
        Some(index) => {
            grades[index] = json!(grade);
            teachers[index] = json!(teacher);
            UpdateOutcome::Overwritten { index }
        }
        None => {
            codes.push(json!(code));
            grades.push(json!(grade));
            teachers.push(json!(teacher));
            if existing.is_some() {
                UpdateOutcome::Appended { index: width }
            } else {
                UpdateOutcome::Created
            }
        }
    };

    let mut patch = Record::new();
    if outcome == UpdateOutcome::Created {
        patch.insert("_id".to_string(), json!(Uuid::new_v4().to_string()));
    }
    patch.insert("SubjectCodes".to_string(), Value::Array(codes));
    patch.insert("Grades".to_string(), Value::Array(grades));
    patch.insert("Teachers".to_string(), Value::Array(teachers));
    (patch, outcome)
}

/// Serializes grade updates per (student, semester) and invalidates the
/// grades snapshot after each write.
pub struct GradeWriter {
    store: RecordStore,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl GradeWriter {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &(String, String)) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    pub async fn apply(&self, update: &GradeUpdate) -> Result<UpdateOutcome> {
        let grade = match update.validate() {
            Ok(grade) => grade,
            Err(err) => {
                warn!(error = %err, "grade update rejected");
                return Err(err);
            }
        };

        let key = (
            update.student_id.trim().to_string(),
            update.semester_id.trim().to_string(),
        );
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.write(update, grade, &key.0, &key.1).await
        };
        // Only the map and this call hold the lock: nobody is waiting on it.
        self.locks.remove_if(&key, |_, held| Arc::strong_count(held) == 2);
        result
    }

    async fn write(
        &self,
        update: &GradeUpdate,
        grade: f64,
        student_id: &str,
        semester_id: &str,
    ) -> Result<UpdateOutcome> {
        let mut predicate = Record::new();
        predicate.insert("StudentID".to_string(), json!(student_id));
        predicate.insert("SemesterID".to_string(), json!(semester_id));

        let records = self.store.load_fresh(Collection::Grades).await?;
        let existing = records.iter().find(|r| record_matches(r, &predicate));
        if let Some(raw) = existing {
            // Match the stored id types so the source-side predicate hits.
            for field in ["StudentID", "SemesterID"] {
                if let Some(value) = raw.get(field) {
                    predicate.insert(field.to_string(), value.clone());
                }
            }
        }

        let (patch, outcome) = apply_grade(existing, update, grade);
        self.store
            .write_update(Collection::Grades, &predicate, &patch, true)
            .await?;

        info!(
            student_id,
            semester_id,
            subject_code = %update.subject_code.trim(),
            grade,
            outcome = ?outcome,
            "grade recorded"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;
    use crate::models::GradeValue;
    use crate::store::FileSnapshotSource;
    use std::time::Duration;

    fn update(subject: &str, grade: Option<f64>) -> GradeUpdate {
        GradeUpdate {
            student_id: "S1".to_string(),
            subject_code: subject.to_string(),
            semester_id: "T1".to_string(),
            grade,
            teacher_id: "TA".to_string(),
        }
    }

    #[test]
    fn rejects_out_of_range_and_missing_fields() {
        assert!(update("MATH1", Some(101.0)).validate().is_err());
        assert!(update("MATH1", Some(-1.0)).validate().is_err());
        assert!(update("MATH1", Some(f64::NAN)).validate().is_err());
        assert!(update("MATH1", None).validate().is_err());
        let err = update("  ", Some(80.0)).validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid grade update: subject_code is required");
        assert_eq!(update("MATH1", Some(100.0)).validate().unwrap(), 100.0);
    }

    #[test]
    fn creates_single_element_record() {
        let (patch, outcome) = apply_grade(None, &update("MATH1", Some(85.0)), 85.0);
        assert_eq!(outcome, UpdateOutcome::Created);
        assert!(patch.contains_key("_id"));
        assert_eq!(patch["SubjectCodes"], json!(["MATH1"]));
        assert_eq!(patch["Grades"], json!([85.0]));
        assert_eq!(patch["Teachers"], json!(["TA"]));
    }

    #[test]
    fn overwrites_matching_subject_in_place() {
        let existing = json!({
            "StudentID": "S1", "SemesterID": "T1",
            "SubjectCodes": ["ENG1", "math1"], "Grades": [80, 60], "Teachers": ["TB", "TC"]
        });
        let (patch, outcome) = apply_grade(Some(&existing), &update("MATH1", Some(85.0)), 85.0);
        assert_eq!(outcome, UpdateOutcome::Overwritten { index: 1 });
        assert!(!patch.contains_key("_id"));
        assert_eq!(patch["SubjectCodes"], json!(["ENG1", "math1"]));
        assert_eq!(patch["Grades"], json!([80, 85.0]));
        assert_eq!(patch["Teachers"], json!(["TB", "TA"]));
    }

    #[test]
    fn appends_after_padding_misaligned_sequences() {
        let existing = json!({
            "StudentID": "S1", "SemesterID": "T1",
            "SubjectCodes": ["ENG1", "SCI1"], "Grades": 80, "Teachers": []
        });
        let (patch, outcome) = apply_grade(Some(&existing), &update("MATH1", Some(91.0)), 91.0);
        assert_eq!(outcome, UpdateOutcome::Appended { index: 2 });
        assert_eq!(patch["SubjectCodes"], json!(["ENG1", "SCI1", "MATH1"]));
        assert_eq!(patch["Grades"], json!([80, null, 91.0]));
        assert_eq!(patch["Teachers"], json!([null, null, "TA"]));
    }

    #[tokio::test]
    async fn untouched_cells_keep_their_stored_values() {
        let snapshots = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            snapshots.path().join("grades.json"),
            r#"[{"_id": "E1", "StudentID": "S1", "SemesterID": "T1",
                 "SubjectCodes": ["MATH1", "ENG1", "SCI1", "PE1"],
                 "Grades": [70, "DRP", "W", "n/a"],
                 "Teachers": ["TA", "TB", "TC", "TD"]}]"#,
        )
        .unwrap();

        let store = RecordStore::new(
            Arc::new(FileSnapshotSource::new(snapshots.path())),
            cache_dir.path(),
            Duration::from_secs(60),
            16,
        );
        let writer = GradeWriter::new(store);
        writer.apply(&update("MATH1", Some(85.0))).await.unwrap();

        let text = std::fs::read_to_string(snapshots.path().join("grades.json")).unwrap();
        let stored: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(stored[0]["Grades"], json!([85.0, "DRP", "W", "n/a"]));
        assert_eq!(stored[0]["Teachers"], json!(["TA", "TB", "TC", "TD"]));
        assert_eq!(stored[0]["_id"], json!("E1"));
        assert!(writer.locks.is_empty());
    }

    #[tokio::test]
    async fn update_is_visible_on_next_read() {
        let snapshots = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            snapshots.path().join("grades.json"),
            r#"[{"_id": "E1", "StudentID": "S1", "SemesterID": "T1",
                 "SubjectCodes": ["MATH1", "ENG1"], "Grades": [70, 60], "Teachers": ["TA", "TB"]}]"#,
        )
        .unwrap();

        let store = RecordStore::new(
            Arc::new(FileSnapshotSource::new(snapshots.path())),
            cache_dir.path(),
            Duration::from_secs(3600),
            16,
        );
        let before = store.load_all().await;
        assert_eq!(before.grades[0].grades[0], GradeValue::Numeric(70.0));

        let writer = GradeWriter::new(store.clone());
        let outcome = writer.apply(&update("MATH1", Some(85.0))).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Overwritten { index: 0 });

        let after = store.load_all().await;
        assert_eq!(after.grades.len(), 1);
        let rows: Vec<_> = flatten(&after.grades[0]).collect();
        assert_eq!(rows[0].grade, GradeValue::Numeric(85.0));
        assert_eq!(rows[1].grade, GradeValue::Numeric(60.0));
        assert_eq!(after.grades[0].id.as_deref(), Some("E1"));
    }

    #[tokio::test]
    async fn invalid_update_writes_nothing() {
        let snapshots = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(
            Arc::new(FileSnapshotSource::new(snapshots.path())),
            cache_dir.path(),
            Duration::from_secs(60),
            16,
        );
        let writer = GradeWriter::new(store);
        let err = writer.apply(&update("MATH1", Some(120.0))).await.unwrap_err();
        assert!(err.is_validation());
        assert!(!snapshots.path().join("grades.json").exists());
    }

    #[tokio::test]
    async fn concurrent_updates_to_one_record_are_not_lost() {
        let snapshots = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(
            Arc::new(FileSnapshotSource::new(snapshots.path())),
            cache_dir.path(),
            Duration::from_secs(60),
            16,
        );
        let writer = Arc::new(GradeWriter::new(store.clone()));

        let mut handles = Vec::new();
        for code in ["A1", "B1", "C1", "D1", "E1"] {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.apply(&update(code, Some(80.0))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let dataset = store.load_all().await;
        assert_eq!(dataset.grades.len(), 1);
        assert_eq!(dataset.grades[0].subject_codes.len(), 5);
        assert_eq!(dataset.grades[0].grades.len(), 5);
        assert!(writer.locks.is_empty());
    }
}

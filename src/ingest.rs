use std::path::Path;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::warn;

use crate::models::Collection;
use crate::store::{Record, RecordStore};
use crate::update::{GradeUpdate, GradeWriter};

fn as_record(value: Value) -> anyhow::Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("seed entry is not an object: {other}"),
    }
}

/// Upserts a record keyed by its `_id`.
async fn upsert(store: &RecordStore, collection: Collection, value: Value) -> anyhow::Result<()> {
    let mut record = as_record(value)?;
    let id = record
        .remove("_id")
        .context("seed entry is missing an _id")?;
    let mut predicate = Record::new();
    predicate.insert("_id".to_string(), id);
    store
        .write_update(collection, &predicate, &record, true)
        .await
        .with_context(|| format!("failed to seed {collection}"))?;
    Ok(())
}

pub async fn seed(store: &RecordStore) -> anyhow::Result<()> {
    let students = vec![
        json!({"_id": "2024-0001", "Name": "Avery Santos", "Course": "BSCS", "YearLevel": 1, "Status": "Regular"}),
        json!({"_id": "2024-0002", "Name": "Jules Moreno", "Course": "BSCS", "YearLevel": 1, "Status": "Regular"}),
        json!({"_id": "2023-0107", "Name": "Kiara Patel", "Course": "BSIT", "YearLevel": 2, "Status": "Irregular"}),
        json!({"_id": "2022-0311", "Name": "Marco Dela Cruz", "Course": "BSCS", "YearLevel": 3, "Status": "Regular"}),
    ];
    let teachers = vec![
        json!({"_id": "T-100", "Name": "Prof. Lourdes Reyes"}),
        json!({"_id": "T-200", "Name": "Prof. Daniel Uy"}),
    ];
    let subjects = vec![
        json!({"_id": "MATH101", "Description": "College Algebra", "Units": 3, "LecHours": 3, "LabHours": 0, "Teacher": "T-100", "YearLevel": 1}),
        json!({"_id": "ENG101", "Description": "Purposive Communication", "Units": 3, "LecHours": 3, "LabHours": 0, "Teacher": "T-200", "YearLevel": 1}),
        json!({"_id": "CS101", "Description": "Introduction to Computing", "Units": 3, "LecHours": 2, "LabHours": 3, "Teacher": "T-100", "YearLevel": 1}),
        json!({"_id": "CS102", "Description": "Computer Programming 1", "Units": 3, "LecHours": 2, "LabHours": 3, "Teacher": "T-100", "YearLevel": 1, "Prerequisites": ["CS101"]}),
        json!({"_id": "MATH102", "Description": "Trigonometry", "Units": 3, "LecHours": 3, "LabHours": 0, "Teacher": "T-200", "YearLevel": 1, "Prerequisites": ["MATH101"]}),
    ];
    let semesters = vec![
        json!({"_id": "SY2024-1", "Semester": "FirstSem", "SchoolYear": 2024}),
        json!({"_id": "SY2023-2", "Semester": "SecondSem", "SchoolYear": 2023}),
    ];
    let curricula = vec![json!({
        "_id": "BSCS-2023",
        "courseCode": "BSCS",
        "courseName": "Bachelor of Science in Computer Science",
        "curriculumYear": "2023",
        "subjects": [
            {"subjectCode": "MATH101", "subjectName": "College Algebra", "yearLevel": 1, "semester": "First", "units": 3},
            {"subjectCode": "ENG101", "subjectName": "Purposive Communication", "yearLevel": 1, "semester": "First", "units": 3},
            {"subjectCode": "CS101", "subjectName": "Introduction to Computing", "yearLevel": 1, "semester": "First", "units": 3},
            {"subjectCode": "CS102", "subjectName": "Computer Programming 1", "yearLevel": 1, "semester": "Second", "units": 3},
            {"subjectCode": "MATH102", "subjectName": "Trigonometry", "yearLevel": 1, "semester": "Second", "units": 3}
        ]
    })];
    let grades = vec![
        json!({"_id": "E-0001", "StudentID": "2024-0001", "SemesterID": "SY2024-1", "SectionCode": "CS1A",
               "SubjectCodes": ["MATH101", "ENG101", "CS101"], "Grades": [95, 60, 88], "Teachers": ["T-100", "T-200", "T-100"]}),
        json!({"_id": "E-0002", "StudentID": "2024-0002", "SemesterID": "SY2024-1", "SectionCode": "CS1A",
               "SubjectCodes": ["MATH101", "ENG101", "CS101"], "Grades": [82, 91, "INC"], "Teachers": ["T-100", "T-200", "T-100"]}),
        json!({"_id": "E-0003", "StudentID": "2023-0107", "SemesterID": "SY2023-2",
               "SubjectCodes": ["MATH101", "CS101"], "Grades": [72, 79], "Teachers": ["T-100", "T-100"]}),
        json!({"_id": "E-0004", "StudentID": "2023-0107", "SemesterID": "SY2024-1",
               "SubjectCodes": ["MATH102", "ENG101"], "Grades": [68], "Teachers": ["T-200"]}),
    ];

    let tables = [
        (Collection::Students, students),
        (Collection::Teachers, teachers),
        (Collection::Subjects, subjects),
        (Collection::Semesters, semesters),
        (Collection::Curricula, curricula),
        (Collection::Grades, grades),
    ];
    for (collection, records) in tables {
        for record in records {
            upsert(store, collection, record).await?;
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub applied: usize,
    pub rejected: Vec<(usize, String)>,
}

/// Each CSV row is one grade update. Invalid rows are reported and skipped.
pub async fn import_csv(writer: &GradeWriter, csv_path: &Path) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<GradeUpdate>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let update = match result {
            Ok(update) => update,
            Err(err) => {
                warn!(line, error = %err, "unreadable grade row");
                summary.rejected.push((line, err.to_string()));
                continue;
            }
        };

        match writer.apply(&update).await {
            Ok(_) => summary.applied += 1,
            Err(err) if err.is_validation() => {
                summary.rejected.push((line, err.to_string()));
            }
            Err(err) => return Err(err).context(format!("grade import stopped at line {line}")),
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::store::FileSnapshotSource;
    use crate::views::{Analytics, ViewContext};
    use std::sync::Arc;
    use std::time::Duration;

    fn store(dir: &Path, cache: &Path) -> RecordStore {
        RecordStore::new(
            Arc::new(FileSnapshotSource::new(dir)),
            cache,
            Duration::from_secs(60),
            16,
        )
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let snapshots = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let store = store(snapshots.path(), cache.path());

        seed(&store).await.unwrap();
        seed(&store).await.unwrap();

        let dataset = store.load_all().await;
        assert_eq!(dataset.students.len(), 4);
        assert_eq!(dataset.grades.len(), 4);
        assert_eq!(dataset.curricula[0].subjects.len(), 5);

        let analytics = Analytics::new(&dataset, Thresholds::default());
        assert!(!analytics.failure_rates(&ViewContext::default()).is_empty());
    }

    #[tokio::test]
    async fn import_applies_valid_rows_and_reports_the_rest() {
        let snapshots = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let csv_path = snapshots.path().join("grades.csv");
        std::fs::write(
            &csv_path,
            "student_id,subject_code,semester_id,grade,teacher_id\n\
             S1,MATH1,T1,88,TA\n\
             S1,ENG1,T1,105,TB\n\
             S1,SCI1,T1,,TC\n\
             S2,MATH1,T1,74,TA\n",
        )
        .unwrap();

        let writer = GradeWriter::new(store(snapshots.path(), cache.path()));
        let summary = import_csv(&writer, &csv_path).await.unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.rejected.len(), 2);
        assert_eq!(summary.rejected[0].0, 3);
        assert_eq!(summary.rejected[1].0, 4);
    }
}

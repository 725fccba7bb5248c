use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid grade update: {0}")]
    Validation(String),

    #[error("snapshot `{collection}` is malformed: {reason}")]
    MalformedSnapshot { collection: String, reason: String },

    #[error("snapshot source unavailable: {0}")]
    Source(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl EngineError {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn malformed<C: Into<String>, R: Into<String>>(collection: C, reason: R) -> Self {
        EngineError::MalformedSnapshot {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_descriptive() {
        let err = EngineError::validation("grade 101 is outside 0-100");
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "invalid grade update: grade 101 is outside 0-100"
        );
    }

    #[test]
    fn malformed_names_the_collection() {
        let err = EngineError::malformed("grades", "expected an array of records");
        assert!(!err.is_validation());
        assert!(err.to_string().contains("`grades`"));
    }

    #[test]
    fn migration_failures_convert_into_engine_errors() {
        let err = EngineError::from(sqlx::migrate::MigrateError::VersionMissing(20260101000000));
        assert!(matches!(err, EngineError::Migration(_)));
        assert!(!err.is_validation());
        assert!(err.to_string().starts_with("migration failed:"));
    }
}

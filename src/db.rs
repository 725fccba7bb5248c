use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::Collection;
use crate::store::{merge_patch, Record, SnapshotSource};

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Collections stored as JSONB documents in `academic.records`.
pub struct PgSnapshotSource {
    pool: PgPool,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshotSource {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self, collection: Collection) -> Result<Vec<Value>> {
        let rows = sqlx::query(
            "SELECT payload FROM academic.records WHERE collection = $1 ORDER BY created_at, id",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(row.try_get::<Value, _>("payload")?);
        }
        Ok(records)
    }

    async fn write_update(
        &self,
        collection: Collection,
        predicate: &Record,
        patch: &Record,
        upsert: bool,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE academic.records
            SET payload = payload || $3, updated_at = now()
            WHERE collection = $1 AND payload @> $2
            "#,
        )
        .bind(collection.as_str())
        .bind(Value::Object(predicate.clone()))
        .bind(Value::Object(patch.clone()))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let written = if updated == 0 && upsert {
            let mut payload = Value::Object(predicate.clone());
            merge_patch(&mut payload, patch);
            sqlx::query(
                r#"
                INSERT INTO academic.records (id, collection, payload)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(collection.as_str())
            .bind(payload)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            updated
        };

        tx.commit().await?;
        Ok(written)
    }
}

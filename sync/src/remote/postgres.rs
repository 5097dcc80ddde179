//! Postgres-backed remote store.
//!
//! Records of every entity type live in one `entity_records` table, keyed by
//! `(entity_type, record_id)`, with the field map in a JSONB column.

use super::RemoteStore;
use crate::error::RemoteError;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use vestry_engine::{EntityRecord, Fields};

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> Result<Pool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub entity_type: String,
    pub record_id: String,
    pub fields: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            entity_type: row.try_get("entity_type")?,
            record_id: row.try_get("record_id")?,
            fields: row.try_get("fields")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredRecord {
    /// Convert database row to an engine record.
    pub fn to_record(&self) -> Result<EntityRecord, RemoteError> {
        match &self.fields {
            serde_json::Value::Object(fields) => {
                Ok(EntityRecord::new(self.record_id.clone(), fields.clone()))
            }
            other => Err(RemoteError::InvalidRecord(
                vestry_engine::Error::InvalidRecord(format!(
                    "{}/{} has non-object fields: {}",
                    self.entity_type, self.record_id, other
                )),
            )),
        }
    }
}

/// Remote store over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgRemoteStore {
    pool: Pool,
}

impl PgRemoteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn map_write_error(e: sqlx::Error) -> RemoteError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.code().as_deref() {
            // PostgreSQL unique violation code is "23505"
            Some("23505") => return RemoteError::Rejected(db_err.message().to_string()),
            // insufficient_privilege
            Some("42501") => return RemoteError::Unauthorized(db_err.message().to_string()),
            _ => {}
        }
    }

    match e {
        sqlx::Error::Io(io) => RemoteError::Network(io.to_string()),
        sqlx::Error::PoolTimedOut => RemoteError::Network("connection pool timed out".into()),
        other => RemoteError::Database(other),
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn insert(
        &self,
        entity_type: &str,
        record: EntityRecord,
    ) -> Result<EntityRecord, RemoteError> {
        let stored = sqlx::query_as::<_, StoredRecord>(
            r#"
            INSERT INTO entity_records (entity_type, record_id, fields)
            VALUES ($1, $2, $3)
            RETURNING entity_type, record_id, fields, created_at, updated_at
            "#,
        )
        .bind(entity_type)
        .bind(&record.id)
        .bind(serde_json::Value::Object(record.fields))
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;

        stored.to_record()
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), RemoteError> {
        let result = sqlx::query(
            r#"
            UPDATE entity_records
            SET fields = fields || $3, updated_at = now()
            WHERE entity_type = $1 AND record_id = $2
            "#,
        )
        .bind(entity_type)
        .bind(id)
        .bind(serde_json::Value::Object(fields))
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(RemoteError::NotFound {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, entity_type: &str, id: &str) -> Result<(), RemoteError> {
        sqlx::query("DELETE FROM entity_records WHERE entity_type = $1 AND record_id = $2")
            .bind(entity_type)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn fetch_all(&self, entity_type: &str) -> Result<Vec<EntityRecord>, RemoteError> {
        let rows = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT entity_type, record_id, fields, created_at, updated_at
            FROM entity_records
            WHERE entity_type = $1
            ORDER BY created_at, record_id
            "#,
        )
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await
        .map_err(map_write_error)?;

        rows.iter().map(StoredRecord::to_record).collect()
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(fields: serde_json::Value) -> StoredRecord {
        StoredRecord {
            entity_type: "members".into(),
            record_id: "m-1".into(),
            fields,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn row_converts_to_record() {
        let record = row(json!({"first_name": "Grace", "id": "stale"}))
            .to_record()
            .unwrap();

        assert_eq!(record.id, "m-1");
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn non_object_fields_are_invalid() {
        assert!(matches!(
            row(json!([1, 2])).to_record(),
            Err(RemoteError::InvalidRecord(_))
        ));
    }

    #[test]
    fn pool_timeout_maps_to_network() {
        assert!(map_write_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(matches!(
            map_write_error(sqlx::Error::RowNotFound),
            RemoteError::Database(_)
        ));
    }
}

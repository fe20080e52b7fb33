//! SQLite persistence for materials, finished session records, and the
//! observations feeding the estimator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS materials (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        material_type TEXT NOT NULL DEFAULT 'book',
        size_units REAL NOT NULL,
        unit_label TEXT NOT NULL DEFAULT 'pages',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        material_id TEXT NOT NULL REFERENCES materials(id),
        session_type TEXT NOT NULL,
        status TEXT NOT NULL,
        planned_units REAL,
        covered_units REAL NOT NULL DEFAULT 0,
        productivity_score REAL,
        pause_count INTEGER NOT NULL DEFAULT 0,
        active_seconds REAL NOT NULL DEFAULT 0,
        total_seconds REAL NOT NULL DEFAULT 0,
        started_at TEXT NOT NULL,
        ended_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS observations (
        id TEXT PRIMARY KEY,
        material_id TEXT NOT NULL REFERENCES materials(id),
        session_id TEXT,
        duration_seconds REAL NOT NULL,
        size_units REAL NOT NULL,
        partial INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sessions_material ON sessions(material_id)",
    "CREATE INDEX IF NOT EXISTS idx_observations_material ON observations(material_id)",
];

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRecord {
    pub id: String,
    pub title: String,
    pub material_type: String,
    pub size_units: f64,
    pub unit_label: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub material_id: String,
    pub session_type: String,
    pub status: String,
    pub planned_units: Option<f64>,
    pub covered_units: f64,
    pub productivity_score: Option<f64>,
    pub pause_count: i64,
    pub active_seconds: f64,
    pub total_seconds: f64,
    pub started_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ObservationRecord {
    pub id: String,
    pub material_id: String,
    pub session_id: Option<String>,
    pub duration_seconds: f64,
    pub size_units: f64,
    pub partial: bool,
    pub created_at: String,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // In-memory databases live per connection; a larger pool would hand
        // out empty databases.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        // Reaping an idle connection would drop an in-memory database, so
        // connections are kept for the life of the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(database_url)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!("database ready at {database_url}");
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn insert_material(&self, material: &MaterialRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO materials (id, title, material_type, size_units, unit_label, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&material.id)
        .bind(&material.title)
        .bind(&material.material_type)
        .bind(material.size_units)
        .bind(&material.unit_label)
        .bind(&material.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_material(&self, id: &str) -> Result<Option<MaterialRecord>, StoreError> {
        let row = sqlx::query_as::<_, MaterialRecord>("SELECT * FROM materials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_materials(&self) -> Result<Vec<MaterialRecord>, StoreError> {
        let rows =
            sqlx::query_as::<_, MaterialRecord>("SELECT * FROM materials ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Insert-or-replace a session row. The in-memory session is the source
    /// of truth while it lives; this keeps the durable copy in step.
    pub async fn upsert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions
                (id, material_id, session_type, status, planned_units, covered_units,
                 productivity_score, pause_count, active_seconds, total_seconds,
                 started_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                covered_units = excluded.covered_units,
                productivity_score = excluded.productivity_score,
                pause_count = excluded.pause_count,
                active_seconds = excluded.active_seconds,
                total_seconds = excluded.total_seconds,
                ended_at = excluded.ended_at",
        )
        .bind(&session.id)
        .bind(&session.material_id)
        .bind(&session.session_type)
        .bind(&session.status)
        .bind(session.planned_units)
        .bind(session.covered_units)
        .bind(session.productivity_score)
        .bind(session.pause_count)
        .bind(session.active_seconds)
        .bind(session.total_seconds)
        .bind(&session.started_at)
        .bind(&session.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_sessions(
        &self,
        material_id: Option<&str>,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let rows = match material_id {
            Some(material_id) => {
                sqlx::query_as::<_, SessionRecord>(
                    "SELECT * FROM sessions WHERE material_id = ? ORDER BY started_at",
                )
                .bind(material_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions ORDER BY started_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn insert_observation(
        &self,
        observation: &ObservationRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO observations
                (id, material_id, session_id, duration_seconds, size_units, partial, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&observation.id)
        .bind(&observation.material_id)
        .bind(&observation.session_id)
        .bind(observation.duration_seconds)
        .bind(observation.size_units)
        .bind(observation.partial)
        .bind(&observation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn observations_for_material(
        &self,
        material_id: &str,
    ) -> Result<Vec<ObservationRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ObservationRecord>(
            "SELECT * FROM observations WHERE material_id = ? ORDER BY created_at",
        )
        .bind(material_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        Store::connect("sqlite::memory:").await.unwrap()
    }

    fn material(id: &str, size: f64) -> MaterialRecord {
        MaterialRecord {
            id: id.to_string(),
            title: "Linear Algebra".to_string(),
            material_type: "book".to_string(),
            size_units: size,
            unit_label: "pages".to_string(),
            created_at: timestamp(Utc::now()),
        }
    }

    #[tokio::test]
    async fn materials_round_trip() {
        let store = store().await;
        store.insert_material(&material("m1", 320.0)).await.unwrap();

        let found = store.get_material("m1").await.unwrap().unwrap();
        assert_eq!(found.title, "Linear Algebra");
        assert_eq!(found.size_units, 320.0);
        assert!(store.get_material("missing").await.unwrap().is_none());
        assert_eq!(store.list_materials().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_upsert_updates_in_place() {
        let store = store().await;
        store.insert_material(&material("m1", 100.0)).await.unwrap();

        let mut session = SessionRecord {
            id: "s1".to_string(),
            material_id: "m1".to_string(),
            session_type: "study".to_string(),
            status: "running".to_string(),
            planned_units: Some(20.0),
            covered_units: 0.0,
            productivity_score: None,
            pause_count: 0,
            active_seconds: 0.0,
            total_seconds: 0.0,
            started_at: timestamp(Utc::now()),
            ended_at: None,
        };
        store.upsert_session(&session).await.unwrap();

        session.status = "completed".to_string();
        session.active_seconds = 900.0;
        session.ended_at = Some(timestamp(Utc::now()));
        store.upsert_session(&session).await.unwrap();

        let rows = store.list_sessions(Some("m1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "completed");
        assert_eq!(rows[0].active_seconds, 900.0);
    }

    #[tokio::test]
    async fn observations_come_back_in_order() {
        let store = store().await;
        store.insert_material(&material("m1", 100.0)).await.unwrap();

        for (i, duration) in [60.0, 75.0, 50.0].iter().enumerate() {
            store
                .insert_observation(&ObservationRecord {
                    id: format!("o{i}"),
                    material_id: "m1".to_string(),
                    session_id: None,
                    duration_seconds: *duration,
                    size_units: 10.0,
                    partial: i == 2,
                    created_at: format!("2026-08-0{}T10:00:00+00:00", i + 1),
                })
                .await
                .unwrap();
        }

        let rows = store.observations_for_material("m1").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].duration_seconds, 60.0);
        assert!(rows[2].partial);
    }
}

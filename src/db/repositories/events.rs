use crate::db::models::{DetectionResult, Event, ThreatAssessment};
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    timestamp: DateTime<Utc>,
    frame_ref: Option<String>,
    motion_level: f64,
    detections: Json<Vec<DetectionResult>>,
    summary: String,
    summary_degraded: bool,
    threat: Json<ThreatAssessment>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            timestamp: row.timestamp,
            frame_ref: row.frame_ref,
            motion_level: row.motion_level,
            detections: row.detections.0,
            summary: row.summary,
            summary_degraded: row.summary_degraded,
            threat: row.threat.0,
        }
    }
}

/// Events repository for handling event operations
#[derive(Clone)]
pub struct EventsRepository {
    pool: Arc<PgPool>,
}

impl EventsRepository {
    /// Create a new events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new event
    pub async fn create(&self, event: &Event) -> Result<Uuid, Error> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO events (
                id, timestamp, frame_ref, motion_level, detections, summary, summary_degraded, threat
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(event.timestamp)
        .bind(&event.frame_ref)
        .bind(event.motion_level)
        .bind(Json(&event.detections))
        .bind(&event.summary)
        .bind(event.summary_degraded)
        .bind(Json(&event.threat))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to create event: {}", e)))?;

        Ok(id)
    }

    /// Get event by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Event>, Error> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, timestamp, frame_ref, motion_level, detections, summary, summary_degraded, threat
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get event by ID: {}", e)))?;

        Ok(row.map(Event::from))
    }

    /// Get the most recent events
    pub async fn get_recent(&self, limit: i64) -> Result<Vec<Event>, Error> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, timestamp, frame_ref, motion_level, detections, summary, summary_degraded, threat
            FROM events
            ORDER BY timestamp DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recent events: {}", e)))?;

        Ok(rows.into_iter().map(Event::from).collect())
    }
}

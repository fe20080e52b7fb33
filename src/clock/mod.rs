//! The session clock: owns every live session, serializes state changes
//! per session, and keeps the store and the realtime hub in step.

pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::estimation::{self, Estimate, EstimationPolicy, Observation};
use crate::realtime::hub::{RealtimeHub, SessionEvent};
use crate::store::{
    timestamp, MaterialRecord, ObservationRecord, SessionRecord, Store, StoreError,
};

pub use session::{Session, SessionSnapshot, SessionStatus, SessionType};

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("cannot {action} a session that is {from}")]
    InvalidTransition {
        action: &'static str,
        from: &'static str,
    },
    #[error("material already has an active session: {active_id}")]
    ExclusiveSessionActive { active_id: String },
    #[error("cannot {action}: session is already {status}")]
    AlreadyTerminal {
        action: &'static str,
        status: &'static str,
    },
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("material not found: {0}")]
    MaterialNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SessionClock {
    store: Store,
    hub: Arc<RealtimeHub>,
    policy: EstimationPolicy,
    exclusive: bool,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionClock {
    pub fn new(
        store: Store,
        hub: Arc<RealtimeHub>,
        policy: EstimationPolicy,
        exclusive: bool,
    ) -> Self {
        Self {
            store,
            hub,
            policy,
            exclusive,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new running session against a material.
    pub async fn start(
        &self,
        material_id: &str,
        session_type: SessionType,
        planned_units: Option<f64>,
    ) -> Result<SessionSnapshot, ClockError> {
        self.store
            .get_material(material_id)
            .await?
            .ok_or_else(|| ClockError::MaterialNotFound(material_id.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let session = Session::new(
            id.clone(),
            material_id.to_string(),
            session_type,
            planned_units,
        );
        let snapshot = session.snapshot();
        let record = record_of(&session);

        {
            // The exclusivity scan and the insert share one write lock, so
            // two concurrent starts cannot both pass the check.
            let mut sessions = self.sessions.write().await;
            if self.exclusive {
                for (active_id, handle) in sessions.iter() {
                    let other = handle.lock().await;
                    if other.material_id == material_id && !other.status.is_terminal() {
                        return Err(ClockError::ExclusiveSessionActive {
                            active_id: active_id.clone(),
                        });
                    }
                }
            }
            sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        }

        // A session the store never saw must not hold the exclusivity slot.
        if let Err(err) = self.store.upsert_session(&record).await {
            warn!(session_id = %id, "rolling back session start: {err}");
            self.sessions.write().await.remove(&id);
            return Err(err.into());
        }

        info!(session_id = %id, material_id, "session started");
        self.hub
            .publish(&id, SessionEvent::Started(snapshot.clone()))
            .await;
        Ok(snapshot)
    }

    pub async fn pause(&self, id: &str) -> Result<SessionSnapshot, ClockError> {
        let handle = self.require_live(id, "pause").await?;
        let mut session = handle.lock().await;
        session.pause()?;
        let snapshot = session.snapshot();
        self.store.upsert_session(&record_of(&session)).await?;
        self.hub
            .publish(id, SessionEvent::Paused(snapshot.clone()))
            .await;
        Ok(snapshot)
    }

    pub async fn resume(&self, id: &str) -> Result<SessionSnapshot, ClockError> {
        let handle = self.require_live(id, "resume").await?;
        let mut session = handle.lock().await;
        session.resume()?;
        let snapshot = session.snapshot();
        self.store.upsert_session(&record_of(&session)).await?;
        self.hub
            .publish(id, SessionEvent::Resumed(snapshot.clone()))
            .await;
        Ok(snapshot)
    }

    pub async fn complete(
        &self,
        id: &str,
        covered_units: Option<f64>,
    ) -> Result<SessionSnapshot, ClockError> {
        self.finish(id, covered_units, false).await
    }

    pub async fn abandon(
        &self,
        id: &str,
        covered_units: Option<f64>,
    ) -> Result<SessionSnapshot, ClockError> {
        self.finish(id, covered_units, true).await
    }

    async fn finish(
        &self,
        id: &str,
        covered_units: Option<f64>,
        abandoned: bool,
    ) -> Result<SessionSnapshot, ClockError> {
        let action = if abandoned { "abandon" } else { "complete" };
        let handle = self.require_live(id, action).await?;
        let mut session = handle.lock().await;
        let material_id = session.material_id.clone();
        if abandoned {
            if let Some(units) = covered_units {
                session.covered_units = units.max(0.0);
            }
            session.abandon()?;
        } else {
            // Completing without a covered count falls back to what was
            // planned, then to the whole material.
            let covered = match covered_units.or(session.planned_units) {
                Some(units) => Some(units),
                None => self
                    .store
                    .get_material(&material_id)
                    .await?
                    .map(|m| m.size_units),
            };
            session.complete(covered)?;
        }
        let snapshot = session.snapshot();
        self.store.upsert_session(&record_of(&session)).await?;

        // What this session tells the estimator about pace. Sessions that
        // covered nothing measurable carry no pace evidence.
        if snapshot.covered_units > 0.0 && snapshot.active_seconds > 0.0 {
            let observation = ObservationRecord {
                id: Uuid::new_v4().to_string(),
                material_id: material_id.clone(),
                session_id: Some(id.to_string()),
                duration_seconds: snapshot.active_seconds,
                size_units: snapshot.covered_units,
                partial: abandoned,
                created_at: timestamp(Utc::now()),
            };
            self.store.insert_observation(&observation).await?;
        }
        drop(session);

        info!(
            session_id = id,
            status = snapshot.status.as_str(),
            "session finished"
        );

        // The refreshed estimate goes out before the terminal event, since
        // observers stop reading once they see the session end.
        match self.estimate_for(&material_id).await {
            Ok((_, estimate)) => {
                self.hub
                    .publish(id, SessionEvent::EstimateUpdated(estimate))
                    .await;
            }
            Err(err) => warn!(session_id = id, "estimate refresh failed: {err}"),
        }

        let event = if abandoned {
            SessionEvent::Abandoned(snapshot.clone())
        } else {
            SessionEvent::Completed(snapshot.clone())
        };
        self.hub.publish(id, event).await;

        self.sessions.write().await.remove(id);
        self.hub.close_session(id).await;
        Ok(snapshot)
    }

    /// Point-in-time view of a session, live or finished.
    pub async fn snapshot(&self, id: &str) -> Result<SessionSnapshot, ClockError> {
        if let Some(handle) = self.live(id).await {
            let session = handle.lock().await;
            return Ok(session.snapshot());
        }
        let record = self
            .store
            .get_session(id)
            .await?
            .ok_or_else(|| ClockError::SessionNotFound(id.to_string()))?;
        Ok(snapshot_of_record(&record))
    }

    pub async fn list(
        &self,
        material_id: Option<&str>,
    ) -> Result<Vec<SessionSnapshot>, ClockError> {
        let records = self.store.list_sessions(material_id).await?;
        let mut snapshots = Vec::with_capacity(records.len());
        for record in &records {
            // Live sessions report their ticking clock, not the last
            // persisted value.
            match self.live(&record.id).await {
                Some(handle) => snapshots.push(handle.lock().await.snapshot()),
                None => snapshots.push(snapshot_of_record(record)),
            }
        }
        Ok(snapshots)
    }

    /// Fresh estimate for a material from everything observed so far.
    pub async fn estimate_for(
        &self,
        material_id: &str,
    ) -> Result<(MaterialRecord, Estimate), ClockError> {
        let material = self
            .store
            .get_material(material_id)
            .await?
            .ok_or_else(|| ClockError::MaterialNotFound(material_id.to_string()))?;
        let records = self.store.observations_for_material(material_id).await?;
        let observations: Vec<Observation> = records
            .iter()
            .map(|r| Observation {
                duration_seconds: r.duration_seconds,
                size_units: r.size_units,
                partial: r.partial,
            })
            .collect();
        let estimate = estimation::estimate(material.size_units, &observations, &self.policy);
        Ok((material, estimate))
    }

    /// Handle to a live session, if it exists and has not ended.
    pub async fn live(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Resolve a session that can still change. A session that exists but
    /// already ended is reported as terminal, not missing.
    async fn require_live(
        &self,
        id: &str,
        action: &'static str,
    ) -> Result<Arc<Mutex<Session>>, ClockError> {
        if let Some(handle) = self.live(id).await {
            return Ok(handle);
        }
        match self.store.get_session(id).await? {
            Some(record) => Err(ClockError::AlreadyTerminal {
                action,
                status: SessionStatus::parse(&record.status)
                    .unwrap_or(SessionStatus::Abandoned)
                    .as_str(),
            }),
            None => Err(self.missing(id)),
        }
    }

    fn missing(&self, id: &str) -> ClockError {
        ClockError::SessionNotFound(id.to_string())
    }
}

fn record_of(session: &Session) -> SessionRecord {
    SessionRecord {
        id: session.id.clone(),
        material_id: session.material_id.clone(),
        session_type: session.session_type.as_str().to_string(),
        status: session.status.as_str().to_string(),
        planned_units: session.planned_units,
        covered_units: session.covered_units,
        productivity_score: session.productivity_score,
        pause_count: session.pause_count as i64,
        active_seconds: session.active_seconds(),
        total_seconds: session.total_seconds(),
        started_at: timestamp(session.started_at),
        ended_at: session.ended_at.map(timestamp),
    }
}

fn snapshot_of_record(record: &SessionRecord) -> SessionSnapshot {
    SessionSnapshot {
        id: record.id.clone(),
        material_id: record.material_id.clone(),
        session_type: SessionType::parse(&record.session_type).unwrap_or_default(),
        status: SessionStatus::parse(&record.status).unwrap_or(SessionStatus::Abandoned),
        planned_units: record.planned_units,
        covered_units: record.covered_units,
        productivity_score: record.productivity_score,
        pause_count: record.pause_count.max(0) as u32,
        active_seconds: record.active_seconds,
        total_seconds: record.total_seconds,
        break_seconds: (record.total_seconds - record.active_seconds).max(0.0),
        units_per_minute: session::units_per_minute(record.covered_units, record.active_seconds),
        started_at: parse_timestamp(&record.started_at),
        ended_at: record.ended_at.as_deref().map(parse_timestamp),
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::ClockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Study,
    Exercise,
    Review,
    Practice,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Study => "study",
            Self::Exercise => "exercise",
            Self::Review => "review",
            Self::Practice => "practice",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "study" => Some(Self::Study),
            "exercise" => Some(Self::Exercise),
            "review" => Some(Self::Review),
            "practice" => Some(Self::Practice),
            _ => None,
        }
    }
}

/// One timed work session against a material.
///
/// Elapsed time is measured against monotonic instants, never wall-clock
/// subtraction, so a paused session accumulates exactly nothing no matter
/// how long it sits. `anchor` is `Some` only while the session is running.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub material_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub planned_units: Option<f64>,
    pub covered_units: f64,
    pub productivity_score: Option<f64>,
    pub pause_count: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    opened: Instant,
    anchor: Option<Instant>,
    active_ms: u64,
    total_ms: Option<u64>,
}

impl Session {
    pub fn new(
        id: String,
        material_id: String,
        session_type: SessionType,
        planned_units: Option<f64>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            material_id,
            session_type,
            status: SessionStatus::Running,
            planned_units,
            covered_units: 0.0,
            productivity_score: None,
            pause_count: 0,
            started_at: Utc::now(),
            ended_at: None,
            opened: now,
            anchor: Some(now),
            active_ms: 0,
            total_ms: None,
        }
    }

    pub fn pause(&mut self) -> Result<(), ClockError> {
        self.guard_live("pause")?;
        match self.status {
            SessionStatus::Running => {
                self.freeze_clock();
                self.status = SessionStatus::Paused;
                self.pause_count += 1;
                Ok(())
            }
            from => Err(ClockError::InvalidTransition {
                action: "pause",
                from: from.as_str(),
            }),
        }
    }

    pub fn resume(&mut self) -> Result<(), ClockError> {
        self.guard_live("resume")?;
        match self.status {
            SessionStatus::Paused => {
                self.anchor = Some(Instant::now());
                self.status = SessionStatus::Running;
                Ok(())
            }
            from => Err(ClockError::InvalidTransition {
                action: "resume",
                from: from.as_str(),
            }),
        }
    }

    pub fn complete(
        &mut self,
        covered_units: Option<f64>,
    ) -> Result<(), ClockError> {
        self.guard_live("complete")?;
        self.terminate(SessionStatus::Completed, covered_units);
        Ok(())
    }

    pub fn abandon(&mut self) -> Result<(), ClockError> {
        self.guard_live("abandon")?;
        self.terminate(SessionStatus::Abandoned, None);
        Ok(())
    }

    fn guard_live(&self, action: &'static str) -> Result<(), ClockError> {
        if self.status.is_terminal() {
            Err(ClockError::AlreadyTerminal {
                action,
                status: self.status.as_str(),
            })
        } else {
            Ok(())
        }
    }

    fn terminate(&mut self, status: SessionStatus, covered_units: Option<f64>) {
        self.freeze_clock();
        self.total_ms = Some(self.opened.elapsed().as_millis() as u64);
        self.status = status;
        self.ended_at = Some(Utc::now());
        if let Some(units) = covered_units {
            self.covered_units = units.max(0.0);
        }
        let total = self.total_seconds();
        if total > 0.0 {
            self.productivity_score = Some(((self.active_seconds() / total) * 100.0).round());
        }
    }

    /// Fold the running stretch since `anchor` into the accumulator.
    fn freeze_clock(&mut self) {
        if let Some(anchor) = self.anchor.take() {
            self.active_ms += anchor.elapsed().as_millis() as u64;
        }
    }

    pub fn active_seconds(&self) -> f64 {
        let live_ms = self
            .anchor
            .map(|a| a.elapsed().as_millis() as u64)
            .unwrap_or(0);
        (self.active_ms + live_ms) as f64 / 1000.0
    }

    pub fn total_seconds(&self) -> f64 {
        match self.total_ms {
            Some(ms) => ms as f64 / 1000.0,
            None => self.opened.elapsed().as_millis() as f64 / 1000.0,
        }
    }

    pub fn break_seconds(&self) -> f64 {
        (self.total_seconds() - self.active_seconds()).max(0.0)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let active = self.active_seconds();
        SessionSnapshot {
            id: self.id.clone(),
            material_id: self.material_id.clone(),
            session_type: self.session_type,
            status: self.status,
            planned_units: self.planned_units,
            covered_units: self.covered_units,
            productivity_score: self.productivity_score,
            pause_count: self.pause_count,
            active_seconds: active,
            total_seconds: self.total_seconds(),
            break_seconds: self.break_seconds(),
            units_per_minute: units_per_minute(self.covered_units, active),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Immutable view of a session at one point in time, as serialized to
/// clients and broadcast to stream observers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub material_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub planned_units: Option<f64>,
    pub covered_units: f64,
    pub productivity_score: Option<f64>,
    pub pause_count: u32,
    pub active_seconds: f64,
    pub total_seconds: f64,
    pub break_seconds: f64,
    /// Reading speed over the active clock, once units were covered.
    pub units_per_minute: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Covered units per active minute, when both are known.
pub(crate) fn units_per_minute(covered_units: f64, active_seconds: f64) -> Option<f64> {
    if covered_units > 0.0 && active_seconds > 0.0 {
        Some(covered_units / (active_seconds / 60.0))
    } else {
        None
    }
}

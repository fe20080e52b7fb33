use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::clock::session::SessionSnapshot;
use crate::estimation::Estimate;

/// Buffered events per observer. A slow observer that falls further behind
/// than this starts losing its oldest events; nobody else is affected.
const CHANNEL_CAPACITY: usize = 256;

/// What a new observer sees first: the session as it stands plus the
/// material's current estimate, so nobody starts blind on either.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub estimate: Estimate,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    Snapshot(SessionView),
    Started(SessionSnapshot),
    Paused(SessionSnapshot),
    Resumed(SessionSnapshot),
    Completed(SessionSnapshot),
    Abandoned(SessionSnapshot),
    TimerTick {
        #[serde(rename = "activeSeconds")]
        active_seconds: f64,
        display: String,
    },
    EstimateUpdated(Estimate),
    Ping,
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Started(_) => "started",
            Self::Paused(_) => "paused",
            Self::Resumed(_) => "resumed",
            Self::Completed(_) => "completed",
            Self::Abandoned(_) => "abandoned",
            Self::TimerTick { .. } => "timer_tick",
            Self::EstimateUpdated(_) => "estimate_updated",
            Self::Ping => "ping",
        }
    }

    /// Terminal events are the last thing observers of a session see.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Abandoned(_))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub event: SessionEvent,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(session_id: &str, event: SessionEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub sessions: usize,
    pub subscribers: usize,
}

/// Fan-out hub for live session events.
///
/// Every observer gets its own bounded channel, so one stalled consumer can
/// only lose its own events. A new subscriber's snapshot is pushed into its
/// channel before the registry lock is released; publishes take the lock
/// after that, so the snapshot always arrives before any later event.
pub struct RealtimeHub {
    sessions: RwLock<HashMap<String, HashMap<String, broadcast::Sender<EventEnvelope>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register an observer for a session. The returned receiver already
    /// holds the snapshot event as its first item.
    pub async fn subscribe(
        self: Arc<Self>,
        session_id: &str,
        view: SessionView,
    ) -> (SubscriptionGuard, broadcast::Receiver<EventEnvelope>) {
        let subscriber_id = Uuid::new_v4().to_string();
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);

        let mut sessions = self.sessions.write().await;
        let _ = tx.send(EventEnvelope::new(session_id, SessionEvent::Snapshot(view)));
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(subscriber_id.clone(), tx);
        drop(sessions);

        debug!(session_id, %subscriber_id, "observer subscribed");
        let guard = SubscriptionGuard {
            hub: self,
            session_id: session_id.to_string(),
            subscriber_id,
        };
        (guard, rx)
    }

    /// Deliver an event to every observer of a session, in publish order.
    /// Observers with no live receiver are skipped silently.
    pub async fn publish(&self, session_id: &str, event: SessionEvent) {
        let envelope = EventEnvelope::new(session_id, event);
        let sessions = self.sessions.read().await;
        if let Some(subscribers) = sessions.get(session_id) {
            for tx in subscribers.values() {
                let _ = tx.send(envelope.clone());
            }
        }
    }

    /// Drop one observer. Safe to call more than once.
    pub async fn unsubscribe(&self, session_id: &str, subscriber_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(subscribers) = sessions.get_mut(session_id) {
            if subscribers.remove(subscriber_id).is_some() {
                debug!(session_id, subscriber_id, "observer unsubscribed");
            }
            if subscribers.is_empty() {
                sessions.remove(session_id);
            }
        }
    }

    /// Drop every observer entry for a session. Called after the terminal
    /// event has been published; in-flight receivers still drain what they
    /// already have.
    pub async fn close_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(session_id).is_some() {
            debug!(session_id, "session channels closed");
        }
    }

    pub async fn stats(&self) -> HubStats {
        let sessions = self.sessions.read().await;
        HubStats {
            sessions: sessions.len(),
            subscribers: sessions.values().map(HashMap::len).sum(),
        }
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters its subscription when dropped, so a disconnecting client
/// cleans up even on abrupt socket loss.
pub struct SubscriptionGuard {
    hub: Arc<RealtimeHub>,
    session_id: String,
    subscriber_id: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let hub = Arc::clone(&self.hub);
        let session_id = std::mem::take(&mut self.session_id);
        let subscriber_id = std::mem::take(&mut self.subscriber_id);
        tokio::spawn(async move {
            hub.unsubscribe(&session_id, &subscriber_id).await;
        });
    }
}

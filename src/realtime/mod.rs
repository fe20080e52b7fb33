//! Live session streams over WebSocket.
//!
//! Each observer gets the current snapshot first, then lifecycle and
//! estimate events in publish order, interleaved with a once-a-second
//! timer tick while the session is running and a keepalive ping.

pub mod hub;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::clock::{SessionSnapshot, SessionStatus};
use crate::response::AppError;
use crate::routes::clock_error;
use crate::state::AppState;

use self::hub::{EventEnvelope, SessionEvent, SessionView};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn session_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let session = state
        .clock()
        .snapshot(&session_id)
        .await
        .map_err(clock_error)?;
    let (_, estimate) = state
        .clock()
        .estimate_for(&session.material_id)
        .await
        .map_err(clock_error)?;
    let view = SessionView { session, estimate };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, view)))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String, view: SessionView) {
    // A finished session still yields its snapshot, then the stream ends.
    let mut finished = view.session.status.is_terminal();
    let (_guard, mut events) = Arc::clone(state.hub()).subscribe(&session_id, view).await;

    // The session may have ended between the snapshot and the registration;
    // that terminal event went to a registry this observer was not in yet.
    let mut late_terminal = None;
    if !finished {
        if let Ok(current) = state.clock().snapshot(&session_id).await {
            if current.status.is_terminal() {
                finished = true;
                late_terminal = terminal_event_for(current);
            }
        }
    }

    let (mut sink, mut source) = socket.split();

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    let mut ping = tokio::time::interval(PING_INTERVAL);
    // The first interval fire is immediate; the snapshot already covers it.
    tick.tick().await;
    ping.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(envelope) => {
                    let terminal = envelope.event.is_terminal()
                        || (finished && matches!(envelope.event, SessionEvent::Snapshot(_)));
                    if send_event(&mut sink, &envelope).await.is_err() {
                        break;
                    }
                    if terminal {
                        if let Some(event) = late_terminal.take() {
                            let envelope = EventEnvelope::new(&session_id, event);
                            let _ = send_event(&mut sink, &envelope).await;
                        }
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%session_id, skipped, "observer lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            },

            _ = tick.tick() => {
                // Ticks are generated per observer from the live clock, so a
                // stalled observer cannot delay anyone else's timer.
                if let Some(handle) = state.clock().live(&session_id).await {
                    let (active, running) = {
                        let session = handle.lock().await;
                        (session.active_seconds(), session.status == SessionStatus::Running)
                    };
                    if running {
                        let envelope = EventEnvelope::new(&session_id, SessionEvent::TimerTick {
                            active_seconds: active,
                            display: format_clock(active),
                        });
                        if send_event(&mut sink, &envelope).await.is_err() {
                            break;
                        }
                    }
                }
            }

            _ = ping.tick() => {
                let envelope = EventEnvelope::new(&session_id, SessionEvent::Ping);
                if send_event(&mut sink, &envelope).await.is_err() {
                    break;
                }
            }

            msg = source.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Inbound application messages are ignored; the stream is
                // one-way.
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(%session_id, "stream closed");
}

/// The lifecycle event a finished snapshot stands in for, when the real
/// one was published to a registry the observer had not joined yet.
fn terminal_event_for(snapshot: SessionSnapshot) -> Option<SessionEvent> {
    match snapshot.status {
        SessionStatus::Completed => Some(SessionEvent::Completed(snapshot)),
        SessionStatus::Abandoned => Some(SessionEvent::Abandoned(snapshot)),
        _ => None,
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    envelope: &EventEnvelope,
) -> Result<(), ()> {
    let text = serde_json::to_string(envelope).map_err(|_| ())?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}

/// HH:MM:SS wall display of the active clock.
pub fn format_clock(active_seconds: f64) -> String {
    let total = active_seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::clock::SessionClock;
use crate::config::Config;
use crate::realtime::hub::RealtimeHub;
use crate::store::Store;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    config: Config,
    store: Store,
    hub: Arc<RealtimeHub>,
    clock: SessionClock,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        let hub = Arc::new(RealtimeHub::new());
        let clock = SessionClock::new(
            store.clone(),
            Arc::clone(&hub),
            config.estimation_policy(),
            config.exclusive_sessions,
        );
        Self {
            inner: Arc::new(Inner {
                started_at: Instant::now(),
                started_at_utc: Utc::now(),
                config,
                store,
                hub,
                clock,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.inner.hub
    }

    pub fn clock(&self) -> &SessionClock {
        &self.inner.clock
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at_utc
    }
}

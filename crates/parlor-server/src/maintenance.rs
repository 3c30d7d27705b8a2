use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::info;

use parlor_auth::{RateGuard, SessionBinder};
use parlor_gateway::dispatcher::Dispatcher;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Background task that drops expired rate windows and idle sessions, and
/// pulls connections of dropped sessions out of their rooms.
pub async fn run_maintenance_loop(
    rate_guard: Arc<RateGuard>,
    sessions: SessionBinder,
    dispatcher: Dispatcher,
    interval: Duration,
) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;
        sweep_once(&rate_guard, &sessions, &dispatcher).await;
    }
}

pub async fn sweep_once(rate_guard: &RateGuard, sessions: &SessionBinder, dispatcher: &Dispatcher) -> (usize, usize) {
    sweep_at(rate_guard, sessions, dispatcher, Instant::now(), Utc::now()).await
}

/// One sweep against explicit clocks. Returns (rate windows, idle sessions) dropped.
pub async fn sweep_at(
    rate_guard: &RateGuard,
    sessions: &SessionBinder,
    dispatcher: &Dispatcher,
    now: Instant,
    wall: DateTime<Utc>,
) -> (usize, usize) {
    let windows = rate_guard.sweep(now);
    let idle = sessions.sweep(wall);
    let evicted = dispatcher.evict_sessions(&idle).await;
    if windows > 0 || !idle.is_empty() {
        info!(
            "Maintenance: dropped {} rate windows, {} idle sessions ({} live connections evicted)",
            windows,
            idle.len(),
            evicted
        );
    }
    (windows, idle.len())
}

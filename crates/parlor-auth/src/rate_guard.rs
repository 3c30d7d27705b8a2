use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Request classes with independent budgets, so a burst in one class never
/// eats into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Login,
    Verify,
    SetHandle,
    Chat,
    Message,
}

impl EndpointClass {
    pub fn limit(self) -> u32 {
        match self {
            Self::Login | Self::SetHandle => 5,
            Self::Verify => 20,
            Self::Chat | Self::Message => 30,
        }
    }

    pub fn window(self) -> Duration {
        match self {
            Self::Message => Duration::from_secs(10),
            _ => Duration::from_secs(60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Verify => "verify",
            Self::SetHandle => "set_handle",
            Self::Chat => "chat",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed-window request counter keyed by client address and endpoint class.
///
/// Windows reset wholesale, so a burst straddling a boundary can reach twice the
/// nominal rate. Counters are process-local.
#[derive(Default)]
pub struct RateGuard {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request from `client` against `class`'s budget.
    pub fn allow(&self, client: &str, class: EndpointClass) -> bool {
        let allowed = self.allow_at(
            &format!("{}:{}", class, client),
            class.limit(),
            class.window(),
            Instant::now(),
        );
        if !allowed {
            warn!("Rate limit hit: {} from {}", class, client);
        }
        allowed
    }

    pub fn allow_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            // Poisoned: fail open.
            return true;
        };

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + window,
        });
        if now >= entry.resets_at {
            entry.count = 0;
            entry.resets_at = now + window;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= limit
    }

    /// Drop windows that have already expired. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let Ok(mut windows) = self.windows.lock() else {
            return 0;
        };
        let before = windows.len();
        windows.retain(|_, w| w.resets_at > now);
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

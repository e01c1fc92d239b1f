//! services/analyzer/src/rate_limit.rs
//!
//! A fixed-window request limiter shared by every classification call, plus a
//! pause that callers set when the service itself reports a rate limit.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug)]
struct LimiterState {
    window_started_at: Instant,
    count: u32,
    paused_until: Option<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(LimiterState {
                window_started_at: Instant::now(),
                count: 0,
                paused_until: None,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Waits until a request slot is available, then takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = self.try_acquire(Instant::now());
            match wait {
                None => return,
                Some(wait) => {
                    debug!("Rate limiter full, waiting {:?}", wait);
                    sleep(wait).await;
                }
            }
        }
    }

    /// Takes a slot if one is free, otherwise returns how long to wait.
    fn try_acquire(&self, now: Instant) -> Option<Duration> {
        let mut state = self.lock_state();

        if let Some(until) = state.paused_until {
            if now < until {
                return Some(until - now);
            }
            state.paused_until = None;
        }

        if now.saturating_duration_since(state.window_started_at) >= self.window {
            state.window_started_at = now;
            state.count = 0;
        }

        if state.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(state.window_started_at);
            return Some(self.window.saturating_sub(elapsed).max(Duration::from_millis(1)));
        }

        state.count = state.count.saturating_add(1);
        None
    }

    /// Blocks every caller for at least `duration`. Never shortens an existing pause.
    pub fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.lock_state();
        state.paused_until = Some(match state.paused_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    pub fn paused_for(&self) -> Option<Duration> {
        let now = Instant::now();
        self.lock_state()
            .paused_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

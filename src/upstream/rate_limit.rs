//! Dual-window token budget for the upstream charting API
//!
//! Tracks requests per one-second window and per 24-hour day. A full
//! per-second window suspends the caller until the window rolls over; a
//! full day fails the call with `QuotaExceeded`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ChartApiError, ChartApiResult};

const WINDOW: Duration = Duration::from_secs(1);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Limits for one endpoint family
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub requests_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            requests_per_day: 500,
        }
    }
}

#[derive(Debug)]
struct RateLimitState {
    requests_this_window: u32,
    window_started_at: Instant,
    requests_today: u32,
    day_started_at: Instant,
}

impl RateLimitState {
    fn new(now: Instant) -> Self {
        Self {
            requests_this_window: 0,
            window_started_at: now,
            requests_today: 0,
            day_started_at: now,
        }
    }

    fn roll_day(&mut self, now: Instant) {
        if now.duration_since(self.day_started_at) >= DAY {
            self.requests_today = 0;
            self.day_started_at = now;
        }
    }

    fn roll_window(&mut self, now: Instant) {
        if now.duration_since(self.window_started_at) >= WINDOW {
            self.requests_this_window = 0;
            self.window_started_at = now;
        }
    }

    fn day_resets_at(&self, now: Instant) -> DateTime<Utc> {
        let remaining = DAY.saturating_sub(now.duration_since(self.day_started_at));
        Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// Point-in-time view of a budget, for callers that surface remaining quota
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub remaining_this_second: u32,
    pub remaining_today: u32,
    pub day_resets_at: DateTime<Utc>,
}

/// In-process limiter. One instance per endpoint family / API key; it does
/// not coordinate with other processes.
#[derive(Debug)]
pub struct TokenBudget {
    config: RateLimitConfig,
    state: Mutex<RateLimitState>,
}

impl TokenBudget {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RateLimitState::new(Instant::now())),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait for capacity and consume one request from both windows.
    ///
    /// Fails immediately with `QuotaExceeded` when the daily budget is spent;
    /// that error is never waited out here. A caller that finds the current
    /// window full reserves a slot in the next one before sleeping, so
    /// waiters are admitted in arrival order.
    pub async fn admit(&self) -> ChartApiResult<()> {
        if self.config.requests_per_second == 0 {
            return Err(ChartApiError::Config(
                "requests_per_second must be greater than zero".to_string(),
            ));
        }

        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            state.roll_day(now);
            if state.requests_today >= self.config.requests_per_day {
                let resets_at = state.day_resets_at(now);
                warn!(
                    requests_today = state.requests_today,
                    daily_limit = self.config.requests_per_day,
                    "Daily chart API quota exhausted until {}",
                    resets_at
                );
                return Err(ChartApiError::QuotaExceeded { resets_at });
            }

            state.roll_window(now);
            if state.requests_this_window >= self.config.requests_per_second {
                // window_started_at may already lie in the future when earlier waiters reserved it
                state.window_started_at += WINDOW;
                state.requests_this_window = 0;
            }
            state.requests_this_window += 1;
            state.requests_today += 1;

            state.window_started_at.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("Per-second budget full, slot reserved {:?} ahead", wait);
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> BudgetSnapshot {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.roll_day(now);
        state.roll_window(now);

        BudgetSnapshot {
            remaining_this_second: self
                .config
                .requests_per_second
                .saturating_sub(state.requests_this_window),
            remaining_today: self.config.requests_per_day.saturating_sub(state.requests_today),
            day_resets_at: state.day_resets_at(now),
        }
    }
}

//! Fixed-window rate limiter for pool entries.
//!
//! Epistemic foundation:
//! - K_i: Quotas are configured per backend (second / minute / day / tokens)
//! - K_i: Windows are fixed and deterministic, never sliding
//! - B_i: A request may be admitted → Acquire::Allowed | Denied
//! - I^B: How long the caller should wait is only known at denial time

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Quotas for one limiter. `None` means unlimited for that window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_second: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_day: Option<u32>,
    pub tokens_per_day: Option<u32>,
}

impl RateLimits {
    /// True if no window is configured.
    pub fn is_unlimited(&self) -> bool {
        self.requests_per_second.is_none()
            && self.requests_per_minute.is_none()
            && self.requests_per_day.is_none()
            && self.tokens_per_day.is_none()
    }
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// One unit was consumed from every configured window
    Allowed,
    /// Nothing was consumed; the earliest exhausted window resets after `retry_after`
    Denied { retry_after: Duration },
}

impl Acquire {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Acquire::Allowed)
    }
}

/// A single fixed window with its own counter.
#[derive(Debug)]
struct Window {
    name: &'static str,
    cap: u64,
    period: Duration,
    used: u64,
    /// Start of the current window. `None` until first use for
    /// windows anchored lazily (the day windows).
    started_at: Option<Instant>,
}

impl Window {
    fn new(name: &'static str, cap: u32, period: Duration, anchor: Option<Instant>) -> Self {
        Self {
            name,
            cap: u64::from(cap),
            period,
            used: 0,
            started_at: anchor,
        }
    }

    /// Move to the window containing `now`, resetting the counter if a
    /// boundary was crossed. Boundaries advance in whole periods.
    fn roll(&mut self, now: Instant) {
        let Some(start) = self.started_at else {
            return;
        };

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.period {
            return;
        }

        let periods = elapsed.as_nanos() / self.period.as_nanos();
        let advance = self.period.as_nanos().saturating_mul(periods);
        let advance = u64::try_from(advance).unwrap_or(u64::MAX);
        self.started_at = Some(start + Duration::from_nanos(advance));
        self.used = 0;
    }

    fn exhausted(&self) -> bool {
        self.used >= self.cap
    }

    fn resets_in(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(start) => (start + self.period).saturating_duration_since(now),
            None => self.period,
        }
    }

    fn consume(&mut self, now: Instant, amount: u64) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.used = self.used.saturating_add(amount);
    }
}

#[derive(Debug)]
struct LimiterState {
    requests: Vec<Window>,
    tokens: Option<Window>,
}

impl LimiterState {
    fn windows_mut(&mut self) -> impl Iterator<Item = &mut Window> {
        self.requests.iter_mut().chain(self.tokens.iter_mut())
    }
}

/// Per-entry rate limiter over second, minute and day windows.
///
/// The second and minute windows are anchored at construction; the day
/// windows start on first use. The limiter never sleeps: it only decides.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    state: Mutex<LimiterState>,
    total_allowed: AtomicU64,
    total_denied: AtomicU64,
    total_tokens: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

impl RateLimiter {
    /// Create a limiter whose fixed windows start now.
    pub fn new(limits: RateLimits) -> Self {
        Self::new_at(limits, Instant::now())
    }

    /// Create a limiter whose second and minute windows start at `created`.
    pub fn new_at(limits: RateLimits, created: Instant) -> Self {
        let mut requests = Vec::with_capacity(3);
        if let Some(cap) = limits.requests_per_second {
            requests.push(Window::new("second", cap, SECOND, Some(created)));
        }
        if let Some(cap) = limits.requests_per_minute {
            requests.push(Window::new("minute", cap, MINUTE, Some(created)));
        }
        if let Some(cap) = limits.requests_per_day {
            requests.push(Window::new("day", cap, DAY, None));
        }
        let tokens = limits
            .tokens_per_day
            .map(|cap| Window::new("tokens_per_day", cap, DAY, None));

        Self {
            limits,
            state: Mutex::new(LimiterState { requests, tokens }),
            total_allowed: AtomicU64::new(0),
            total_denied: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Try to admit one request now.
    pub fn try_acquire(&self) -> Acquire {
        self.try_acquire_at(Instant::now())
    }

    /// Try to admit one request at `now`.
    ///
    /// All windows are checked under one lock. A unit is consumed from each
    /// request window only if none is exhausted; a spent token budget also
    /// denies.
    pub fn try_acquire_at(&self, now: Instant) -> Acquire {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        for window in state.windows_mut() {
            window.roll(now);
        }

        let exhausted = state
            .requests
            .iter()
            .chain(state.tokens.iter())
            .filter(|w| w.exhausted())
            .map(|w| (w.name, w.resets_in(now)))
            .min_by_key(|(_, wait)| *wait);

        if let Some((window, retry_after)) = exhausted {
            self.total_denied.fetch_add(1, Ordering::Relaxed);
            debug!(
                window = window,
                retry_after = ?retry_after,
                "Rate limit window exhausted"
            );
            return Acquire::Denied { retry_after };
        }

        for window in state.requests.iter_mut() {
            window.consume(now, 1);
        }
        if let Some(tokens) = state.tokens.as_mut() {
            // Start the token day on first admitted request
            tokens.consume(now, 0);
        }

        self.total_allowed.fetch_add(1, Ordering::Relaxed);
        Acquire::Allowed
    }

    /// Charge tokens against the daily token budget.
    pub fn record_tokens(&self, tokens: u64) {
        self.record_tokens_at(tokens, Instant::now());
    }

    pub fn record_tokens_at(&self, tokens: u64, now: Instant) {
        self.total_tokens.fetch_add(tokens, Ordering::Relaxed);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(window) = state.tokens.as_mut() {
            window.roll(now);
            window.consume(now, tokens);
            if window.exhausted() {
                debug!(used = window.used, cap = window.cap, "Daily token budget spent");
            }
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> RateLimiterStats {
        let total_allowed = self.total_allowed.load(Ordering::Relaxed);
        let total_denied = self.total_denied.load(Ordering::Relaxed);
        let total = total_allowed + total_denied;

        RateLimiterStats {
            total_allowed,
            total_denied,
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            denial_ratio: if total > 0 {
                total_denied as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_allowed: u64,
    pub total_denied: u64,
    pub total_tokens: u64,
    pub denial_ratio: f64,
}

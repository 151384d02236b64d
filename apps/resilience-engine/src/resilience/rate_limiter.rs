//! Multi-window adaptive rate limiter.
//!
//! Each API has independent per-minute, per-hour and per-day counters. A
//! window resets once its length has elapsed since its last reset; the reset
//! time becomes the moment of the check that observed it.
//!
//! # Adaptation
//!
//! After every recorded outcome the lifetime success rate is evaluated:
//!
//! - below `degrade_below` (0.95): minute and hour limits shrink by
//!   `degrade_factor` (0.8), never below 1
//! - above `recover_above` (0.98) with more than `min_samples` (100)
//!   requests: the minute limit grows by `recover_factor` (1.1), at least by
//!   one, up to the configured ceiling
//!
//! # Builtin profiles
//!
//! | API | per minute | per hour | per day |
//! |-----|-----------:|---------:|--------:|
//! | default | 60 | 1000 | 10000 |
//! | `github_api` | 60 | 5000 | 50000 |
//! | `max_api` | 100 | 6000 | 100000 |
//! | `telegram_api` | 30 | 1800 | 43200 |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::observability;

/// Rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    /// Sixty seconds.
    Minute,
    /// Sixty minutes.
    Hour,
    /// Twenty-four hours.
    Day,
}

impl Window {
    /// All windows, shortest first.
    pub const ALL: [Self; 3] = [Self::Minute, Self::Hour, Self::Day];

    /// Window length.
    #[must_use]
    pub const fn length(self) -> Duration {
        match self {
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(3600),
            Self::Day => Duration::from_secs(86_400),
        }
    }
}

/// Limits for the three windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimits {
    /// Requests per minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    /// Requests per hour.
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
    /// Requests per day.
    #[serde(default = "default_per_day")]
    pub per_day: u32,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
            per_day: default_per_day(),
        }
    }
}

const fn default_per_minute() -> u32 {
    60
}
const fn default_per_hour() -> u32 {
    1000
}
const fn default_per_day() -> u32 {
    10_000
}

impl WindowLimits {
    /// Create limits.
    #[must_use]
    pub const fn new(per_minute: u32, per_hour: u32, per_day: u32) -> Self {
        Self {
            per_minute,
            per_hour,
            per_day,
        }
    }

    /// GitHub REST API.
    #[must_use]
    pub const fn github_api() -> Self {
        Self::new(60, 5000, 50_000)
    }

    /// Exchange API.
    #[must_use]
    pub const fn max_api() -> Self {
        Self::new(100, 6000, 100_000)
    }

    /// Telegram bot API.
    #[must_use]
    pub const fn telegram_api() -> Self {
        Self::new(30, 1800, 43_200)
    }

    /// Builtin profile by API name.
    #[must_use]
    pub fn builtin(api: &str) -> Option<Self> {
        match api {
            "github_api" => Some(Self::github_api()),
            "max_api" => Some(Self::max_api()),
            "telegram_api" => Some(Self::telegram_api()),
            _ => None,
        }
    }

    const fn get(&self, window: Window) -> u32 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
            Window::Day => self.per_day,
        }
    }
}

/// Adaptive limit tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Enable adaptation.
    pub enabled: bool,
    /// Shrink limits when the success rate drops below this.
    pub degrade_below: f64,
    /// Grow the minute limit when the success rate exceeds this.
    pub recover_above: f64,
    /// Requests required before growing.
    pub min_samples: u64,
    /// Multiplier applied when shrinking.
    pub degrade_factor: f64,
    /// Multiplier applied when growing.
    pub recover_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            degrade_below: 0.95,
            recover_above: 0.98,
            min_samples: 100,
            degrade_factor: 0.8,
            recover_factor: 1.1,
        }
    }
}

/// Per-window request counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Requests in the current minute window.
    pub minute: u32,
    /// Requests in the current hour window.
    pub hour: u32,
    /// Requests in the current day window.
    pub day: u32,
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether a request may be made now.
    pub allowed: bool,
    /// Time until the soonest violated window resets (zero when allowed).
    pub wait_time: Duration,
    /// Current usage.
    pub usage: WindowUsage,
    /// Current (possibly adapted) limits.
    pub limits: WindowLimits,
    /// Lifetime success rate (0.0-1.0, 1.0 with no history).
    pub success_rate: f64,
}

/// Usage statistics for one API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiStats {
    /// API name.
    pub api_name: String,
    /// Current usage.
    pub usage: WindowUsage,
    /// Current limits.
    pub limits: WindowLimits,
    /// Configured ceiling limits.
    pub configured_limits: WindowLimits,
    /// Usage as percent of the minute limit.
    pub minute_usage_percentage: f64,
    /// Usage as percent of the hour limit.
    pub hour_usage_percentage: f64,
    /// Usage as percent of the day limit.
    pub day_usage_percentage: f64,
    /// Lifetime success rate (0.0-1.0).
    pub success_rate: f64,
    /// Lifetime request outcomes recorded.
    pub total_requests: u64,
    /// Lifetime successful outcomes.
    pub successful_requests: u64,
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    used: u32,
    last_reset: Instant,
}

/// Mutable per-API state.
#[derive(Debug)]
struct RateLimitState {
    limits: WindowLimits,
    ceiling: WindowLimits,
    minute: WindowCounter,
    hour: WindowCounter,
    day: WindowCounter,
    success_count: u64,
    total_count: u64,
}

impl RateLimitState {
    fn new(limits: WindowLimits, now: Instant) -> Self {
        let counter = WindowCounter {
            used: 0,
            last_reset: now,
        };
        Self {
            limits,
            ceiling: limits,
            minute: counter,
            hour: counter,
            day: counter,
            success_count: 0,
            total_count: 0,
        }
    }

    fn counter(&self, window: Window) -> &WindowCounter {
        match window {
            Window::Minute => &self.minute,
            Window::Hour => &self.hour,
            Window::Day => &self.day,
        }
    }

    fn counter_mut(&mut self, window: Window) -> &mut WindowCounter {
        match window {
            Window::Minute => &mut self.minute,
            Window::Hour => &mut self.hour,
            Window::Day => &mut self.day,
        }
    }

    fn reset_elapsed(&mut self, now: Instant) {
        for window in Window::ALL {
            let counter = self.counter_mut(window);
            if now.saturating_duration_since(counter.last_reset) >= window.length() {
                counter.used = 0;
                counter.last_reset = now;
            }
        }
    }

    fn usage(&self) -> WindowUsage {
        WindowUsage {
            minute: self.minute.used,
            hour: self.hour.used,
            day: self.day.used,
        }
    }

    fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            1.0
        } else {
            self.success_count as f64 / self.total_count as f64
        }
    }

    /// Evaluate limits at `now`; resets elapsed windows first.
    fn decide(&mut self, now: Instant) -> RateLimitDecision {
        self.reset_elapsed(now);

        let wait_time = Window::ALL
            .iter()
            .filter(|w| self.counter(**w).used >= self.limits.get(**w))
            .map(|w| {
                let reset_at = self.counter(*w).last_reset + w.length();
                reset_at.saturating_duration_since(now)
            })
            .min();

        RateLimitDecision {
            allowed: wait_time.is_none(),
            wait_time: wait_time.unwrap_or(Duration::ZERO),
            usage: self.usage(),
            limits: self.limits,
            success_rate: self.success_rate(),
        }
    }

    fn increment(&mut self) {
        for window in Window::ALL {
            let counter = self.counter_mut(window);
            counter.used = counter.used.saturating_add(1);
        }
    }
}

/// Per-API adaptive rate limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    default_limits: WindowLimits,
    configured: Mutex<HashMap<String, WindowLimits>>,
    adaptive: AdaptiveConfig,
    states: Mutex<HashMap<String, Arc<Mutex<RateLimitState>>>>,
}

impl RateLimiter {
    /// Limiter with default limits and the builtin profiles.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WindowLimits::default(), AdaptiveConfig::default())
    }

    /// Limiter with custom defaults and adaptation.
    #[must_use]
    pub fn with_config(default_limits: WindowLimits, adaptive: AdaptiveConfig) -> Self {
        Self {
            default_limits,
            configured: Mutex::new(HashMap::new()),
            adaptive,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Configure limits for `api`, replacing any adapted values.
    pub fn set_limits(&self, api: &str, limits: WindowLimits) {
        self.configured.lock().insert(api.to_string(), limits);
        let state = self.state(api);
        let mut state = state.lock();
        state.limits = limits;
        state.ceiling = limits;
        tracing::info!(
            api = api,
            per_minute = limits.per_minute,
            per_hour = limits.per_hour,
            per_day = limits.per_day,
            "Rate limits configured"
        );
    }

    fn configured_limits(&self, api: &str) -> WindowLimits {
        self.configured
            .lock()
            .get(api)
            .copied()
            .or_else(|| WindowLimits::builtin(api))
            .unwrap_or(self.default_limits)
    }

    fn state(&self, api: &str) -> Arc<Mutex<RateLimitState>> {
        if let Some(state) = self.states.lock().get(api) {
            return Arc::clone(state);
        }
        let limits = self.configured_limits(api);
        let mut states = self.states.lock();
        Arc::clone(
            states
                .entry(api.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RateLimitState::new(limits, Instant::now())))),
        )
    }

    /// Check whether a request to `api` is currently allowed.
    ///
    /// Does not consume capacity; see [`Self::try_acquire`].
    pub fn check(&self, api: &str) -> RateLimitDecision {
        self.check_at(api, Instant::now())
    }

    fn check_at(&self, api: &str, now: Instant) -> RateLimitDecision {
        self.state(api).lock().decide(now)
    }

    /// Check and, when allowed, reserve a slot in every window atomically.
    pub fn try_acquire(&self, api: &str) -> RateLimitDecision {
        self.try_acquire_at(api, Instant::now())
    }

    fn try_acquire_at(&self, api: &str, now: Instant) -> RateLimitDecision {
        let state = self.state(api);
        let mut state = state.lock();
        let mut decision = state.decide(now);
        if decision.allowed {
            state.increment();
            decision.usage = state.usage();
        } else {
            drop(state);
            observability::record_rate_limit_rejected(api, decision.wait_time.as_secs_f64());
        }
        decision
    }

    /// Count a request made to `api` and record its outcome.
    pub fn record(&self, api: &str, success: bool) {
        self.record_at(api, success, Instant::now());
    }

    fn record_at(&self, api: &str, success: bool, now: Instant) {
        let state = self.state(api);
        let mut state = state.lock();
        state.reset_elapsed(now);
        state.increment();
        self.apply_outcome(api, &mut state, success);
    }

    /// Record the outcome of a request whose slot was reserved with
    /// [`Self::try_acquire`].
    pub fn record_outcome(&self, api: &str, success: bool) {
        let state = self.state(api);
        let mut state = state.lock();
        self.apply_outcome(api, &mut state, success);
    }

    fn apply_outcome(&self, api: &str, state: &mut RateLimitState, success: bool) {
        state.total_count += 1;
        if success {
            state.success_count += 1;
        }
        if self.adaptive.enabled {
            self.adapt(api, state);
        }
    }

    fn adapt(&self, api: &str, state: &mut RateLimitState) {
        let rate = state.success_rate();
        let adaptive = &self.adaptive;

        if rate < adaptive.degrade_below {
            let shrink = |limit: u32| ((f64::from(limit) * adaptive.degrade_factor) as u32).max(1);
            let (minute, hour) = (shrink(state.limits.per_minute), shrink(state.limits.per_hour));
            if (minute, hour) != (state.limits.per_minute, state.limits.per_hour) {
                state.limits.per_minute = minute;
                state.limits.per_hour = hour;
                observability::record_rate_limit_adjustment(api, minute);
                tracing::warn!(
                    api = api,
                    success_rate = rate,
                    per_minute = minute,
                    per_hour = hour,
                    "Low success rate, reducing rate limits"
                );
            }
        } else if rate > adaptive.recover_above
            && state.total_count > adaptive.min_samples
            && state.limits.per_minute < state.ceiling.per_minute
        {
            let current = state.limits.per_minute;
            let grown = ((f64::from(current) * adaptive.recover_factor) as u32).max(current + 1);
            let minute = grown.min(state.ceiling.per_minute);
            state.limits.per_minute = minute;
            observability::record_rate_limit_adjustment(api, minute);
            tracing::info!(
                api = api,
                success_rate = rate,
                per_minute = minute,
                "High success rate, restoring rate limit"
            );
        }
    }

    /// Wait on the calling task until a request to `api` is allowed.
    ///
    /// Returns the total time waited. Does not reserve a slot.
    pub async fn wait_if_needed(&self, api: &str) -> Duration {
        let start = Instant::now();
        loop {
            let decision = self.check(api);
            if decision.allowed {
                return start.elapsed();
            }
            tracing::info!(
                api = api,
                wait_secs = decision.wait_time.as_secs_f64(),
                "Rate limited, waiting"
            );
            tokio::time::sleep(decision.wait_time.max(Duration::from_millis(1))).await;
        }
    }

    /// Wait until a slot can be reserved, then reserve it.
    ///
    /// Returns the total time waited.
    pub async fn acquire(&self, api: &str) -> Duration {
        let start = Instant::now();
        loop {
            let decision = self.try_acquire(api);
            if decision.allowed {
                return start.elapsed();
            }
            tracing::debug!(
                api = api,
                wait_secs = decision.wait_time.as_secs_f64(),
                "Rate limited, waiting for slot"
            );
            tokio::time::sleep(decision.wait_time.max(Duration::from_millis(1))).await;
        }
    }

    /// Usage statistics for `api`.
    pub fn get_api_stats(&self, api: &str) -> ApiStats {
        let ceiling = self.configured_limits(api);
        let state = self.state(api);
        let mut state = state.lock();
        state.reset_elapsed(Instant::now());

        let percent = |used: u32, limit: u32| {
            if limit == 0 {
                100.0
            } else {
                f64::from(used) / f64::from(limit) * 100.0
            }
        };

        ApiStats {
            api_name: api.to_string(),
            usage: state.usage(),
            limits: state.limits,
            configured_limits: ceiling,
            minute_usage_percentage: percent(state.minute.used, state.limits.per_minute),
            hour_usage_percentage: percent(state.hour.used, state.limits.per_hour),
            day_usage_percentage: percent(state.day.used, state.limits.per_day),
            success_rate: state.success_rate(),
            total_requests: state.total_count,
            successful_requests: state.success_count,
        }
    }

    /// Names of APIs seen so far, sorted.
    #[must_use]
    pub fn apis(&self) -> Vec<String> {
        let mut apis: Vec<String> = self.states.lock().keys().cloned().collect();
        apis.sort();
        apis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.set_limits("api", WindowLimits::new(per_minute, 1000, 10_000));
        limiter
    }

    #[test]
    fn test_builtin_profiles() {
        assert_eq!(WindowLimits::builtin("github_api"), Some(WindowLimits::new(60, 5000, 50_000)));
        assert_eq!(WindowLimits::builtin("max_api"), Some(WindowLimits::new(100, 6000, 100_000)));
        assert_eq!(WindowLimits::builtin("telegram_api"), Some(WindowLimits::new(30, 1800, 43_200)));
        assert_eq!(WindowLimits::builtin("unknown"), None);

        let limiter = RateLimiter::new();
        assert_eq!(limiter.check("telegram_api").limits.per_minute, 30);
        assert_eq!(limiter.check("other").limits, WindowLimits::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_window_blocks_at_limit() {
        let limiter = limiter(5);
        let now = Instant::now();
        for i in 0..5 {
            let decision = limiter.try_acquire_at("api", now);
            assert!(decision.allowed, "request {i} should pass");
        }
        let decision = limiter.try_acquire_at("api", now + Duration::from_secs(10));
        assert!(!decision.allowed);
        assert_eq!(decision.usage.minute, 5);
        assert_eq!(decision.wait_time, Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_boundary() {
        let limiter = limiter(2);
        let now = Instant::now();
        limiter.try_acquire_at("api", now);
        limiter.try_acquire_at("api", now);
        assert!(!limiter.check_at("api", now + Duration::from_secs(30)).allowed);

        let later = now + Duration::from_secs(60);
        let decision = limiter.check_at("api", later);
        assert!(decision.allowed);
        assert_eq!(decision.usage.minute, 0);
        assert_eq!(decision.usage.hour, 2);
    }

    #[test]
    fn test_check_does_not_consume() {
        let limiter = limiter(1);
        assert!(limiter.check("api").allowed);
        assert!(limiter.check("api").allowed);
        assert!(limiter.try_acquire("api").allowed);
        assert!(!limiter.check("api").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_minimum_of_violated_windows() {
        let limiter = RateLimiter::new();
        limiter.set_limits("api", WindowLimits::new(1, 1, 1000));
        let now = Instant::now();
        limiter.try_acquire_at("api", now);
        let decision = limiter.check_at("api", now + Duration::from_secs(20));
        assert!(!decision.allowed);
        assert_eq!(decision.wait_time, Duration::from_secs(40));
    }

    #[test]
    fn test_low_success_rate_shrinks_limits() {
        let limiter = RateLimiter::new();
        limiter.set_limits("api", WindowLimits::new(100, 1000, 10_000));
        limiter.record("api", false);

        let stats = limiter.get_api_stats("api");
        assert_eq!(stats.limits.per_minute, 80);
        assert_eq!(stats.limits.per_hour, 800);
        assert_eq!(stats.limits.per_day, 10_000);
        assert_eq!(stats.usage.minute, 1);
    }

    #[test]
    fn test_shrink_never_reaches_zero() {
        let limiter = RateLimiter::new();
        limiter.set_limits("api", WindowLimits::new(2, 2, 100));
        for _ in 0..10 {
            limiter.record_outcome("api", false);
        }
        let stats = limiter.get_api_stats("api");
        assert_eq!(stats.limits.per_minute, 1);
        assert_eq!(stats.limits.per_hour, 1);
    }

    #[test]
    fn test_high_success_rate_restores_up_to_ceiling() {
        let limiter = RateLimiter::new();
        limiter.set_limits("api", WindowLimits::new(10, 1000, 10_000));
        limiter.record_outcome("api", false);
        assert_eq!(limiter.get_api_stats("api").limits.per_minute, 8);

        // Raise the success rate above 0.98 with more than 100 samples
        for _ in 0..150 {
            limiter.record_outcome("api", true);
        }
        let stats = limiter.get_api_stats("api");
        assert!(stats.success_rate > 0.98);
        assert_eq!(stats.limits.per_minute, 10);
    }

    #[test]
    fn test_adaptation_disabled() {
        let limiter = RateLimiter::with_config(
            WindowLimits::default(),
            AdaptiveConfig {
                enabled: false,
                ..AdaptiveConfig::default()
            },
        );
        limiter.record("api", false);
        assert_eq!(limiter.get_api_stats("api").limits.per_minute, 60);
    }

    #[test]
    fn test_stats_percentages() {
        let limiter = limiter(10);
        for _ in 0..5 {
            limiter.try_acquire("api");
            limiter.record_outcome("api", true);
        }
        let stats = limiter.get_api_stats("api");
        assert!((stats.minute_usage_percentage - 50.0).abs() < 1e-9);
        assert!((stats.hour_usage_percentage - 0.5).abs() < 1e-9);
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.successful_requests, 5);
        assert_eq!(limiter.get_api_stats("api"), stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_call_waits_for_window_reset() {
        let limiter = limiter(5);
        for _ in 0..5 {
            assert_eq!(limiter.acquire("api").await, Duration::ZERO);
        }
        let waited = limiter.acquire("api").await;
        assert_eq!(waited, Duration::from_secs(60));
        assert_eq!(limiter.get_api_stats("api").usage.minute, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_if_needed_returns_immediately_when_allowed() {
        let limiter = limiter(5);
        assert_eq!(limiter.wait_if_needed("api").await, Duration::ZERO);
    }
}

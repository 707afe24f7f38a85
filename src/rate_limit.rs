//! Sliding-window rate limiting per logical model
//!
//! Dual budgets: requests per minute (a sorted window of admission
//! timestamps) and tokens per minute (a rolling counter that resets when its
//! window drifts past 60 s). The limiter is consulted before a provider call
//! with an estimate and updated with actual tokens afterwards, even on
//! failure, so retry storms cannot outrun the budget.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};

const WINDOW_SECS: f64 = 60.0;

/// Per-model request and token budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSpec {
    pub rpm: u32,
    pub tpm: u32,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            rpm: 60,
            tpm: 100_000,
        }
    }
}

/// Which budget produced a denial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Rpm,
    Tpm,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Rpm => "rpm",
            LimitKind::Tpm => "tpm",
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub wait_seconds: f64,
    pub reason: Option<LimitKind>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            wait_seconds: 0.0,
            reason: None,
        }
    }

    pub fn deny(wait_seconds: f64, reason: LimitKind) -> Self {
        Self {
            allowed: false,
            wait_seconds: wait_seconds.max(0.0),
            reason: Some(reason),
        }
    }
}

/// Current window usage against the configured limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitUsage {
    pub rpm_used: u32,
    pub rpm_limit: u32,
    pub tpm_used: u32,
    pub tpm_limit: u32,
}

/// Sliding-window limiter contract
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Would a request with `estimated_tokens` fit the current window?
    async fn check(&self, model: &str, estimated_tokens: u32) -> RateLimitDecision;

    /// Record an admitted request and its actual token consumption
    async fn record(&self, model: &str, tokens: u32);

    async fn get_usage(&self, model: &str) -> RateLimitUsage;

    /// Convenience: suspend for the advised wait, then return
    async fn wait_if_needed(&self, model: &str, estimated_tokens: u32) {
        let decision = self.check(model, estimated_tokens).await;
        if !decision.allowed {
            info!(
                model,
                wait_seconds = decision.wait_seconds,
                reason = decision.reason.map(|r| r.as_str()).unwrap_or(""),
                "rate limit wait"
            );
            tokio::time::sleep(Duration::from_secs_f64(decision.wait_seconds)).await;
        }
    }
}

#[derive(Debug)]
struct WindowData {
    requests: VecDeque<Instant>,
    tokens: u32,
    window_started: Instant,
}

impl WindowData {
    fn new(now: Instant) -> Self {
        Self {
            requests: VecDeque::new(),
            tokens: 0,
            window_started: now,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.requests.front() {
            if now.duration_since(*front).as_secs_f64() >= WINDOW_SECS {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        if now.duration_since(self.window_started).as_secs_f64() >= WINDOW_SECS {
            self.tokens = 0;
            self.window_started = now;
        }
    }
}

/// In-process limiter for tests and single-instance deployments
pub struct MemoryRateLimiter {
    default_limits: RateLimitSpec,
    model_limits: HashMap<String, RateLimitSpec>,
    windows: Mutex<HashMap<String, WindowData>>,
    /// Per-model FIFO gates so racing callers at the cap are admitted in
    /// arrival order (tokio mutexes are fair)
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryRateLimiter {
    pub fn new(default_limits: RateLimitSpec) -> Self {
        Self::with_model_limits(default_limits, HashMap::new())
    }

    pub fn with_model_limits(
        default_limits: RateLimitSpec,
        model_limits: HashMap<String, RateLimitSpec>,
    ) -> Self {
        Self {
            default_limits,
            model_limits,
            windows: Mutex::new(HashMap::new()),
            gates: DashMap::new(),
        }
    }

    fn limits_for(&self, model: &str) -> RateLimitSpec {
        self.model_limits
            .get(model)
            .copied()
            .unwrap_or(self.default_limits)
    }

    fn gate_for(&self, model: &str) -> Arc<Mutex<()>> {
        self.gates
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, model: &str, estimated_tokens: u32) -> RateLimitDecision {
        let limits = self.limits_for(model);
        let now = Instant::now();

        let mut windows = self.windows.lock().await;
        let data = windows
            .entry(model.to_string())
            .or_insert_with(|| WindowData::new(now));
        data.prune(now);

        if data.requests.len() as u32 >= limits.rpm {
            let oldest = data.requests.front().copied().unwrap_or(now);
            let wait = WINDOW_SECS - now.duration_since(oldest).as_secs_f64();
            return RateLimitDecision::deny(wait, LimitKind::Rpm);
        }

        if data.tokens.saturating_add(estimated_tokens) > limits.tpm {
            return RateLimitDecision::deny(WINDOW_SECS, LimitKind::Tpm);
        }

        RateLimitDecision::allow()
    }

    async fn record(&self, model: &str, tokens: u32) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let data = windows
            .entry(model.to_string())
            .or_insert_with(|| WindowData::new(now));
        data.prune(now);
        data.requests.push_back(now);
        data.tokens = data.tokens.saturating_add(tokens);
        debug!(model, tokens, "rate limit recorded");
    }

    async fn get_usage(&self, model: &str) -> RateLimitUsage {
        let limits = self.limits_for(model);
        let now = Instant::now();

        let mut windows = self.windows.lock().await;
        let data = windows
            .entry(model.to_string())
            .or_insert_with(|| WindowData::new(now));
        data.prune(now);

        RateLimitUsage {
            rpm_used: data.requests.len() as u32,
            rpm_limit: limits.rpm,
            tpm_used: data.tokens,
            tpm_limit: limits.tpm,
        }
    }

    async fn wait_if_needed(&self, model: &str, estimated_tokens: u32) {
        let gate = self.gate_for(model);
        let _guard = gate.lock().await;

        let decision = self.check(model, estimated_tokens).await;
        if !decision.allowed {
            info!(
                model,
                wait_seconds = decision.wait_seconds,
                reason = decision.reason.map(|r| r.as_str()).unwrap_or(""),
                "rate limit wait"
            );
            tokio::time::sleep(Duration::from_secs_f64(decision.wait_seconds)).await;
        }
    }
}

/// Redis-backed limiter sharing state across gateway instances.
/// Per model: `ratelimit:rpm:<model>` sorted set of admission timestamps,
/// `ratelimit:tpm:<model>` token counter expiring with the window.
/// Fails open when the backend is unreachable.
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    default_limits: RateLimitSpec,
    model_limits: HashMap<String, RateLimitSpec>,
}

impl RedisRateLimiter {
    pub async fn connect(url: &str, default_limits: RateLimitSpec) -> GatewayResult<Self> {
        let client = redis::Client::open(url).map_err(|e| GatewayError::Other {
            message: format!("invalid redis url: {}", e),
        })?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| GatewayError::Other {
                message: format!("redis connection failed: {}", e),
            })?;
        Ok(Self::with_connection(conn, default_limits))
    }

    pub fn with_connection(conn: ConnectionManager, default_limits: RateLimitSpec) -> Self {
        Self {
            conn,
            default_limits,
            model_limits: HashMap::new(),
        }
    }

    pub fn with_model_limits(mut self, model_limits: HashMap<String, RateLimitSpec>) -> Self {
        self.model_limits = model_limits;
        self
    }

    fn limits_for(&self, model: &str) -> RateLimitSpec {
        self.model_limits
            .get(model)
            .copied()
            .unwrap_or(self.default_limits)
    }

    fn rpm_key(model: &str) -> String {
        format!("ratelimit:rpm:{}", model)
    }

    fn tpm_key(model: &str) -> String {
        format!("ratelimit:tpm:{}", model)
    }

    fn epoch_now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    async fn check_inner(
        &self,
        model: &str,
        estimated_tokens: u32,
    ) -> Result<RateLimitDecision, redis::RedisError> {
        let limits = self.limits_for(model);
        let now = Self::epoch_now();
        let window_start = now - WINDOW_SECS;
        let mut conn = self.conn.clone();

        let rpm_key = Self::rpm_key(model);
        let rpm_count: u32 = conn.zcount(&rpm_key, window_start, now).await?;

        if rpm_count >= limits.rpm {
            let oldest: Vec<(String, f64)> = conn.zrange_withscores(&rpm_key, 0, 0).await?;
            if let Some((_, oldest_score)) = oldest.first() {
                let wait = WINDOW_SECS - (now - oldest_score);
                return Ok(RateLimitDecision::deny(wait, LimitKind::Rpm));
            }
        }

        let tpm_used: Option<i64> = conn.get(Self::tpm_key(model)).await?;
        let tpm_used = tpm_used.unwrap_or(0).max(0) as u32;
        if tpm_used.saturating_add(estimated_tokens) > limits.tpm {
            return Ok(RateLimitDecision::deny(WINDOW_SECS, LimitKind::Tpm));
        }

        Ok(RateLimitDecision::allow())
    }

    async fn record_inner(&self, model: &str, tokens: u32) -> Result<(), redis::RedisError> {
        let now = Self::epoch_now();
        let mut conn = self.conn.clone();

        let rpm_key = Self::rpm_key(model);
        // Unique member so concurrent admissions at the same timestamp all count
        let member = format!("{}:{}", now, uuid::Uuid::new_v4());
        conn.zadd::<_, f64, String, ()>(&rpm_key, member, now).await?;
        conn.zrembyscore::<_, f64, f64, ()>(&rpm_key, 0.0, now - WINDOW_SECS)
            .await?;
        conn.expire::<_, ()>(&rpm_key, 120).await?;

        let tpm_key = Self::tpm_key(model);
        conn.incr::<_, i64, i64>(&tpm_key, tokens as i64).await?;
        conn.expire::<_, ()>(&tpm_key, 60).await?;

        debug!(model, tokens, "rate limit recorded");
        Ok(())
    }

    async fn usage_inner(&self, model: &str) -> Result<RateLimitUsage, redis::RedisError> {
        let limits = self.limits_for(model);
        let now = Self::epoch_now();
        let mut conn = self.conn.clone();

        let rpm_used: u32 = conn
            .zcount(Self::rpm_key(model), now - WINDOW_SECS, now)
            .await?;
        let tpm_used: Option<i64> = conn.get(Self::tpm_key(model)).await?;

        Ok(RateLimitUsage {
            rpm_used,
            rpm_limit: limits.rpm,
            tpm_used: tpm_used.unwrap_or(0).max(0) as u32,
            tpm_limit: limits.tpm,
        })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, model: &str, estimated_tokens: u32) -> RateLimitDecision {
        match self.check_inner(model, estimated_tokens).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(model, error = %e, "rate limit check failed, allowing request");
                RateLimitDecision::allow()
            }
        }
    }

    async fn record(&self, model: &str, tokens: u32) {
        if let Err(e) = self.record_inner(model, tokens).await {
            warn!(model, error = %e, "rate limit record failed");
        }
    }

    async fn get_usage(&self, model: &str) -> RateLimitUsage {
        match self.usage_inner(model).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(model, error = %e, "rate limit usage lookup failed");
                RateLimitUsage::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rpm: u32, tpm: u32) -> MemoryRateLimiter {
        MemoryRateLimiter::new(RateLimitSpec { rpm, tpm })
    }

    #[tokio::test]
    async fn test_first_request_allowed() {
        let limiter = limiter(5, 1000);
        let decision = limiter.check("gpt-4", 0).await;
        assert!(decision.allowed);
        assert_eq!(decision.wait_seconds, 0.0);
    }

    #[tokio::test]
    async fn test_rpm_denial_at_cap() {
        let limiter = limiter(5, 1_000_000);
        for _ in 0..5 {
            assert!(limiter.check("gpt-4", 10).await.allowed);
            limiter.record("gpt-4", 10).await;
        }

        let decision = limiter.check("gpt-4", 10).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(LimitKind::Rpm));
        assert!(decision.wait_seconds > 0.0 && decision.wait_seconds <= 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_window_rolls_over() {
        let limiter = limiter(5, 1_000_000);
        for _ in 0..5 {
            limiter.record("gpt-4", 10).await;
        }
        assert!(!limiter.check("gpt-4", 10).await.allowed);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("gpt-4", 10).await.allowed);
        assert_eq!(limiter.get_usage("gpt-4").await.rpm_used, 0);
    }

    #[tokio::test]
    async fn test_tpm_denial() {
        let limiter = limiter(100, 1000);
        limiter.record("gpt-4", 1000).await;

        let decision = limiter.check("gpt-4", 100).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(LimitKind::Tpm));
        assert_eq!(decision.wait_seconds, 60.0);
    }

    #[tokio::test]
    async fn test_usage_counts() {
        let limiter = limiter(10, 1000);
        limiter.record("gpt-4", 100).await;
        limiter.record("gpt-4", 200).await;

        let usage = limiter.get_usage("gpt-4").await;
        assert_eq!(usage.rpm_used, 2);
        assert_eq!(usage.tpm_used, 300);
        assert_eq!(usage.rpm_limit, 10);
        assert_eq!(usage.tpm_limit, 1000);
    }

    #[tokio::test]
    async fn test_model_specific_limits() {
        let mut overrides = HashMap::new();
        overrides.insert("gpt-4".to_string(), RateLimitSpec { rpm: 5, tpm: 500 });
        let limiter = MemoryRateLimiter::with_model_limits(
            RateLimitSpec { rpm: 10, tpm: 1000 },
            overrides,
        );

        let gpt4 = limiter.get_usage("gpt-4").await;
        assert_eq!(gpt4.rpm_limit, 5);
        assert_eq!(gpt4.tpm_limit, 500);

        let other = limiter.get_usage("gpt-3.5-turbo").await;
        assert_eq!(other.rpm_limit, 10);
        assert_eq!(other.tpm_limit, 1000);
    }

    #[tokio::test]
    async fn test_wait_if_needed_returns_immediately_under_cap() {
        let limiter = limiter(5, 1000);
        let start = Instant::now();
        limiter.wait_if_needed("gpt-4", 10).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_if_needed_sleeps_out_the_window() {
        let limiter = limiter(1, 1_000_000);
        limiter.record("gpt-4", 1).await;

        // Denied now; wait_if_needed suspends for the advised time
        let before = Instant::now();
        limiter.wait_if_needed("gpt-4", 1).await;
        let waited = before.elapsed().as_secs_f64();
        assert!(waited > 59.0 && waited <= 61.0);
    }

    #[tokio::test]
    async fn test_different_models_have_separate_windows() {
        let limiter = limiter(1, 1000);
        limiter.record("gpt-4", 1).await;
        assert!(!limiter.check("gpt-4", 0).await.allowed);
        assert!(limiter.check("claude-3-haiku", 0).await.allowed);
    }
}

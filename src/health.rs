//! Model health checking with TTL-cached records
//!
//! Probes are concurrency-bounded and deduplicated: concurrent checks of the
//! same model share one probe through a per-model lock, and `check_all`
//! fans out under a semaphore.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::error::GatewayResult;

const RETRY_SPACING: Duration = Duration::from_millis(500);

/// Issues the actual probe; the adapter is the production implementation
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, model: &str) -> GatewayResult<()>;
}

#[async_trait]
impl HealthProbe for Adapter {
    async fn probe(&self, model: &str) -> GatewayResult<()> {
        self.probe_model(model).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Outcome of the most recent probe of one model
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    pub model: String,
    pub status: HealthStatus,
    pub latency_ms: f64,
    pub error: Option<String>,
    pub last_check_epoch: f64,
    /// Monotonically increments until a successful probe resets it
    pub consecutive_failures: u32,
}

/// Aggregate view over a `check_all` sweep
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub models: HashMap<String, HealthRecord>,
    pub healthy_count: usize,
    pub total_count: usize,
    pub check_duration_ms: f64,
}

#[derive(Clone)]
struct CachedHealth {
    record: HealthRecord,
    checked_at: Instant,
}

/// TTL-cached health checker over a probe
pub struct HealthChecker {
    probe: Arc<dyn HealthProbe>,
    default_models: Vec<String>,
    cache_ttl: Duration,
    max_retries: u32,
    records: DashMap<String, CachedHealth>,
    probe_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HealthChecker {
    pub fn new(probe: Arc<dyn HealthProbe>, default_models: Vec<String>) -> Self {
        Self {
            probe,
            default_models,
            cache_ttl: Duration::from_secs(60),
            max_retries: 1,
            records: DashMap::new(),
            probe_locks: DashMap::new(),
        }
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn fresh_record(&self, model: &str) -> Option<HealthRecord> {
        self.records.get(model).and_then(|cached| {
            if cached.checked_at.elapsed() < self.cache_ttl {
                Some(cached.record.clone())
            } else {
                None
            }
        })
    }

    fn lock_for(&self, model: &str) -> Arc<Mutex<()>> {
        self.probe_locks
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn epoch_now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Check one model, serving a cached record while it is fresh
    pub async fn check_model(&self, model: &str, force: bool) -> HealthRecord {
        if !force {
            if let Some(record) = self.fresh_record(model) {
                debug!(model, "health cache hit");
                return record;
            }
        }

        let lock = self.lock_for(model);
        let _guard = lock.lock().await;

        // Another caller may have refreshed the record while we waited
        if !force {
            if let Some(record) = self.fresh_record(model) {
                return record;
            }
        }

        let prior_failures = self
            .records
            .get(model)
            .map(|cached| cached.record.consecutive_failures)
            .unwrap_or(0);

        let started = Instant::now();
        let mut record = HealthRecord {
            model: model.to_string(),
            status: HealthStatus::Unknown,
            latency_ms: 0.0,
            error: None,
            last_check_epoch: Self::epoch_now(),
            consecutive_failures: prior_failures,
        };

        for attempt in 0..=self.max_retries {
            match self.probe.probe(model).await {
                Ok(()) => {
                    record.status = HealthStatus::Healthy;
                    record.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    record.error = None;
                    record.consecutive_failures = 0;
                    debug!(model, latency_ms = record.latency_ms, "health check passed");
                    break;
                }
                Err(error) => {
                    record.error = Some(error.to_string());
                    record.consecutive_failures += 1;

                    if attempt < self.max_retries {
                        debug!(model, attempt = attempt + 1, error = %error, "health check retry");
                        tokio::time::sleep(RETRY_SPACING).await;
                    } else {
                        record.status = HealthStatus::Unhealthy;
                        record.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                        warn!(model, error = %error, "health check failed");
                    }
                }
            }
        }

        self.records.insert(
            model.to_string(),
            CachedHealth {
                record: record.clone(),
                checked_at: Instant::now(),
            },
        );
        record
    }

    /// Probe several models in parallel, bounded by `concurrent_limit`
    pub async fn check_all(
        &self,
        models: Option<Vec<String>>,
        force: bool,
        concurrent_limit: usize,
    ) -> HealthReport {
        let models = models.unwrap_or_else(|| self.default_models.clone());
        if models.is_empty() {
            return HealthReport {
                overall_status: HealthStatus::Unknown,
                models: HashMap::new(),
                healthy_count: 0,
                total_count: 0,
                check_duration_ms: 0.0,
            };
        }

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(concurrent_limit.max(1)));

        let checks = models.iter().map(|model| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.check_model(model, force).await
            }
        });
        let results = futures::future::join_all(checks).await;

        let healthy_count = results
            .iter()
            .filter(|record| record.status == HealthStatus::Healthy)
            .count();
        let total_count = results.len();
        let overall_status = if healthy_count == total_count {
            HealthStatus::Healthy
        } else if healthy_count > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        let check_duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            ?overall_status,
            healthy_count, total_count, check_duration_ms, "health sweep completed"
        );

        HealthReport {
            overall_status,
            models: results
                .into_iter()
                .map(|record| (record.model.clone(), record))
                .collect(),
            healthy_count,
            total_count,
            check_duration_ms,
        }
    }

    /// Models whose current record is healthy
    pub fn get_healthy_models(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|entry| entry.record.status == HealthStatus::Healthy)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub async fn is_model_healthy(&self, model: &str, force: bool) -> bool {
        self.check_model(model, force).await.status == HealthStatus::Healthy
    }

    pub fn cached_health(&self, model: &str) -> Option<HealthRecord> {
        self.records.get(model).map(|cached| cached.record.clone())
    }

    pub fn clear_cache(&self) {
        self.records.clear();
        debug!("health cache cleared");
    }
}

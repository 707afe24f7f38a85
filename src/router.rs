//! Deployment routing: load balancing, cooldown and model fallback
//!
//! Each logical model maps to a pool of deployments (provider + credential +
//! endpoint). A call picks one deployment by the configured strategy, walks
//! the remaining pool on failure and finally descends the fallback chain of
//! alternate models. Cooldown is per-deployment: sibling deployments of the
//! same model stay eligible.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::config::{GatewaySettings, RoutingStrategy};
use crate::contracts::{ChunkStream, CompletionRequest, CompletionResponse};
use crate::error::{GatewayError, GatewayResult};
use crate::providers::{anthropic, deepseek, openai, ProviderClient};
use crate::registry::{ModelRegistry, Provider};

/// Smoothing factor for the latency moving average
const LATENCY_EMA_ALPHA: f64 = 0.3;

/// A concrete instance of a logical model
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    /// Unique within the router
    pub id: String,
    /// The logical model this deployment serves
    pub model_name: String,
    pub provider: Provider,
    pub api_key: String,
    pub base_url: Option<String>,
    pub rpm_cap: Option<u32>,
    pub tpm_cap: Option<u32>,
}

impl DeploymentConfig {
    pub fn new(
        model_name: impl Into<String>,
        provider: Provider,
        api_key: impl Into<String>,
    ) -> Self {
        let model_name = model_name.into();
        Self {
            id: format!("{}-{}", model_name, uuid::Uuid::new_v4()),
            model_name,
            provider,
            api_key: api_key.into(),
            base_url: None,
            rpm_cap: None,
            tpm_cap: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[derive(Default)]
struct DeploymentState {
    consecutive_failures: AtomicU32,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    cooldown_until: Mutex<Option<Instant>>,
    latency_ema_ms: Mutex<Option<f64>>,
}

/// Pool entry: configuration, live client and runtime state
pub struct Deployment {
    pub config: DeploymentConfig,
    client: Arc<dyn ProviderClient>,
    state: DeploymentState,
}

impl Deployment {
    fn new(config: DeploymentConfig, client: Arc<dyn ProviderClient>) -> Self {
        Self {
            config,
            client,
            state: DeploymentState::default(),
        }
    }

    pub fn in_cooldown(&self) -> bool {
        let cooldown = self.state.cooldown_until.lock().expect("state lock poisoned");
        match *cooldown {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn latency_ema_ms(&self) -> Option<f64> {
        *self.state.latency_ema_ms.lock().expect("state lock poisoned")
    }

    pub fn success_count(&self) -> u64 {
        self.state.total_successes.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u64 {
        self.state.total_failures.load(Ordering::SeqCst)
    }

    fn record_success(&self, latency_ms: Option<f64>) {
        self.state.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.total_successes.fetch_add(1, Ordering::SeqCst);
        if let Some(sample) = latency_ms {
            let mut ema = self.state.latency_ema_ms.lock().expect("state lock poisoned");
            *ema = Some(match *ema {
                Some(current) => current * (1.0 - LATENCY_EMA_ALPHA) + sample * LATENCY_EMA_ALPHA,
                None => sample,
            });
        }
    }

    /// Returns true when this failure tripped the cooldown
    fn record_failure(&self, allowed_fails: u32, cooldown: Duration) -> bool {
        self.state.total_failures.fetch_add(1, Ordering::SeqCst);
        let failures = self.state.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= allowed_fails {
            let mut until = self.state.cooldown_until.lock().expect("state lock poisoned");
            *until = Some(Instant::now() + cooldown);
            return true;
        }
        false
    }
}

/// Router tunables
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    /// Cap on cross-deployment and fallback attempts beyond the first call
    pub num_retries: u32,
    /// Consecutive failures before a deployment cools down
    pub allowed_fails: u32,
    pub cooldown_secs: u64,
    /// Explicit fallback chains per logical model
    pub fallbacks: HashMap<String, Vec<String>>,
    /// Chain applied to models without an explicit entry
    pub default_fallbacks: Vec<String>,
    /// Context-length failures abort routing unless this is set
    pub fallback_on_context_length: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::SimpleShuffle,
            num_retries: 3,
            allowed_fails: 2,
            cooldown_secs: 60,
            fallbacks: HashMap::new(),
            default_fallbacks: Vec::new(),
            fallback_on_context_length: false,
        }
    }
}

impl RouterConfig {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            strategy: settings.routing_strategy,
            num_retries: settings.max_retries,
            default_fallbacks: settings.fallback_models.clone(),
            ..Self::default()
        }
    }
}

/// The deployment router
pub struct Router {
    config: RouterConfig,
    adapter: Arc<Adapter>,
    registry: Arc<ModelRegistry>,
    pools: RwLock<HashMap<String, Vec<Arc<Deployment>>>>,
}

impl Router {
    pub fn new(adapter: Arc<Adapter>, registry: Arc<ModelRegistry>, config: RouterConfig) -> Self {
        Self {
            config,
            adapter,
            registry,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a deployment, building its provider client
    pub fn add_deployment(&self, config: DeploymentConfig) -> GatewayResult<()> {
        let client: Arc<dyn ProviderClient> = match config.provider {
            Provider::OpenAI => Arc::new(openai::create_client(
                config.api_key.clone(),
                config.base_url.clone(),
            )),
            Provider::Anthropic => Arc::new(anthropic::create_client(
                config.api_key.clone(),
                config.base_url.clone(),
            )),
            Provider::DeepSeek => Arc::new(deepseek::create_client(
                config.api_key.clone(),
                config.base_url.clone(),
            )),
            other => {
                return Err(GatewayError::InvalidRequest {
                    message: format!("provider {} has no deployment client", other),
                    param: Some("provider".to_string()),
                })
            }
        };
        self.add_deployment_with_client(config, client);
        Ok(())
    }

    /// Register a deployment around an existing client (tests, local stubs)
    pub fn add_deployment_with_client(
        &self,
        config: DeploymentConfig,
        client: Arc<dyn ProviderClient>,
    ) {
        let model = config.model_name.clone();
        let deployment = Arc::new(Deployment::new(config, client));
        let mut pools = self.pools.write().expect("pool lock poisoned");
        pools.entry(model).or_default().push(deployment);
    }

    pub fn deployments_for(&self, model: &str) -> Vec<Arc<Deployment>> {
        let pools = self.pools.read().expect("pool lock poisoned");
        pools.get(model).cloned().unwrap_or_default()
    }

    fn eligible(&self, model: &str, tried: &HashSet<String>) -> Vec<Arc<Deployment>> {
        self.deployments_for(model)
            .into_iter()
            .filter(|d| !tried.contains(&d.config.id) && !d.in_cooldown())
            .collect()
    }

    fn select(&self, candidates: &[Arc<Deployment>]) -> Option<Arc<Deployment>> {
        match self.config.strategy {
            RoutingStrategy::SimpleShuffle => candidates.choose(&mut rand::thread_rng()).cloned(),
            RoutingStrategy::LatencyBased => candidates
                .iter()
                .min_by(|a, b| {
                    let a = a.latency_ema_ms().unwrap_or(0.0);
                    let b = b.latency_ema_ms().unwrap_or(0.0);
                    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned(),
            RoutingStrategy::CostBased => candidates
                .iter()
                .min_by(|a, b| {
                    let cost = |d: &Arc<Deployment>| {
                        self.registry
                            .get(&d.config.model_name)
                            .map(|m| m.input_cost_per_1k)
                            .unwrap_or(f64::MAX)
                    };
                    let latency = |d: &Arc<Deployment>| d.latency_ema_ms().unwrap_or(0.0);
                    cost(a)
                        .partial_cmp(&cost(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(
                            latency(a)
                                .partial_cmp(&latency(b))
                                .unwrap_or(std::cmp::Ordering::Equal),
                        )
                })
                .cloned(),
        }
    }

    /// Fallback chain for a model, never including the model itself
    pub fn fallback_chain(&self, model: &str) -> Vec<String> {
        self.config
            .fallbacks
            .get(model)
            .unwrap_or(&self.config.default_fallbacks)
            .iter()
            .filter(|m| m.as_str() != model)
            .cloned()
            .collect()
    }

    fn should_abort(&self, error: &GatewayError) -> bool {
        if error.aborts_fallback() {
            return true;
        }
        matches!(error, GatewayError::ContextLength { .. })
            && !self.config.fallback_on_context_length
    }

    fn handle_failure(&self, deployment: &Deployment, error: &GatewayError) {
        let cooled = deployment.record_failure(
            self.config.allowed_fails,
            Duration::from_secs(self.config.cooldown_secs),
        );
        if cooled {
            warn!(
                deployment = %deployment.config.id,
                cooldown_secs = self.config.cooldown_secs,
                error = %error,
                "deployment entered cooldown"
            );
        } else {
            warn!(deployment = %deployment.config.id, error = %error, "deployment call failed");
        }
    }

    /// Route a blocking completion across the pool and fallback chain
    pub async fn complete(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse> {
        let max_attempts = self.config.num_retries + 1;
        let mut attempts = 0u32;
        let mut last_error: Option<GatewayError> = None;

        let mut chain = vec![request.model.clone()];
        chain.extend(self.fallback_chain(&request.model));

        'models: for (tier, model) in chain.iter().enumerate() {
            let mut routed = request.clone();
            routed.model = model.clone();
            let mut tried = HashSet::new();

            loop {
                if attempts >= max_attempts {
                    break 'models;
                }
                let candidates = self.eligible(model, &tried);
                let Some(deployment) = self.select(&candidates) else {
                    debug!(model = %model, "no eligible deployments, descending fallback chain");
                    continue 'models;
                };

                attempts += 1;
                debug!(
                    model = %model,
                    deployment = %deployment.config.id,
                    attempt = attempts,
                    fallback_tier = tier,
                    "routing completion"
                );

                match self
                    .adapter
                    .complete_on(deployment.client.as_ref(), &routed)
                    .await
                {
                    Ok(response) => {
                        deployment.record_success(Some(response.latency_ms));
                        info!(
                            model = %model,
                            deployment = %deployment.config.id,
                            attempts,
                            fallback_used = tier > 0,
                            "completion routed"
                        );
                        return Ok(response);
                    }
                    Err(error) => {
                        self.handle_failure(&deployment, &error);
                        if self.should_abort(&error) {
                            return Err(error);
                        }
                        tried.insert(deployment.config.id.clone());
                        last_error = Some(error);
                    }
                }
            }
        }

        Err(match last_error {
            Some(error) => error.exhausted(),
            None => GatewayError::ModelNotAvailable {
                model: request.model.clone(),
                message: "no deployments registered for this model".to_string(),
            },
        })
    }

    /// Route a streaming completion. Selection and fallback apply only until
    /// a stream is established; once the first chunk can flow, failures abort
    /// rather than re-order chunks through a retry.
    pub async fn stream_complete(&self, request: &CompletionRequest) -> GatewayResult<ChunkStream> {
        let max_attempts = self.config.num_retries + 1;
        let mut attempts = 0u32;
        let mut last_error: Option<GatewayError> = None;

        let mut chain = vec![request.model.clone()];
        chain.extend(self.fallback_chain(&request.model));

        'models: for model in &chain {
            let mut routed = request.clone();
            routed.model = model.clone();
            routed.stream = true;
            let mut tried = HashSet::new();

            loop {
                if attempts >= max_attempts {
                    break 'models;
                }
                let candidates = self.eligible(model, &tried);
                let Some(deployment) = self.select(&candidates) else {
                    continue 'models;
                };

                attempts += 1;
                match self
                    .adapter
                    .stream_complete_on(deployment.client.as_ref(), &routed)
                    .await
                {
                    Ok(stream) => {
                        deployment.record_success(None);
                        return Ok(stream);
                    }
                    Err(error) => {
                        self.handle_failure(&deployment, &error);
                        if self.should_abort(&error) {
                            return Err(error);
                        }
                        tried.insert(deployment.config.id.clone());
                        last_error = Some(error);
                    }
                }
            }
        }

        Err(match last_error {
            Some(error) => error.exhausted(),
            None => GatewayError::ModelNotAvailable {
                model: request.model.clone(),
                message: "no deployments registered for this model".to_string(),
            },
        })
    }
}

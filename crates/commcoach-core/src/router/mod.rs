//! Three-tier failover router.
//!
//! Requests go to the quota-limited tier first, then the self-hosted tier,
//! then the paid tier. Each attempt's outcome feeds the circuit breaker, the
//! quota window and the cost ledger. No lock is held while an adapter call is
//! in flight, so concurrent requests interleave freely; two of them may both
//! see quota left and overshoot the soft limit slightly, which is accepted.

pub mod health;
pub mod ledger;
pub mod rate;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, RouterConfig};
use crate::error::{ProviderError, RouterError};
use crate::provider::{self, AiProvider};
use crate::types::{
    GenerationConfig, GenerationResult, Prompt, ProviderId, ProviderOutput, StructuredOutput,
    StructuredResult,
};

use self::health::{HealthSettings, HealthTracker, ProviderHealth};
use self::ledger::{CostEntry, CostLedger};
use self::rate::{RateLimits, RateTracker, RateUsage};

/// The tier whose free quota is tracked by the rate window.
pub const QUOTA_TIER: ProviderId = ProviderId::Gemini;
/// The unlimited self-hosted tier.
pub const SELF_HOSTED_TIER: ProviderId = ProviderId::Ollama;
/// The pay-per-token tier, tried last.
pub const PAID_TIER: ProviderId = ProviderId::OpenRouter;

const NO_PROVIDER_AVAILABLE: &str = "no AI provider is currently available";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterSettings {
    pub health: HealthSettings,
    pub rate: RateLimits,
}

impl From<&RouterConfig> for RouterSettings {
    fn from(cfg: &RouterConfig) -> Self {
        Self {
            health: HealthSettings {
                failure_threshold: cfg.failure_threshold.max(1),
                reset_timeout: Duration::from_secs(cfg.reset_timeout_secs),
            },
            rate: RateLimits {
                per_minute: cfg.rate_limit_per_minute,
                per_day: cfg.rate_limit_per_day,
                ..RateLimits::default()
            },
        }
    }
}

/// Health view of one provider inside a [`StatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: ProviderId,
    pub configured: bool,
    #[serde(flatten)]
    pub health: ProviderHealth,
}

/// Read-only operational view of the router.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub providers: Vec<ProviderStatus>,
    pub rate_limit: RateUsage,
    pub priority: Vec<ProviderId>,
    pub costs: Vec<CostEntry>,
    pub total_cost_usd: f64,
}

/// Adapter outputs the router can bill.
trait Billed {
    fn cost(&self) -> f64;
}

impl Billed for ProviderOutput {
    fn cost(&self) -> f64 {
        self.cost
    }
}

impl Billed for StructuredOutput {
    fn cost(&self) -> f64 {
        self.cost
    }
}

struct Routed<T> {
    output: T,
    provider: ProviderId,
    fallback_used: bool,
    attempted: Vec<ProviderId>,
}

/// Multi-provider router with circuit breaking and soft quota tracking.
///
/// Construct one per process and share it (e.g. through
/// [`AppContext`](crate::context::AppContext)); all state lives in the
/// instance and is lost on restart.
pub struct AiRouter {
    providers: Vec<Arc<dyn AiProvider>>,
    health: HealthTracker,
    rate: RateTracker,
    ledger: CostLedger,
}

impl AiRouter {
    pub fn new(providers: Vec<Arc<dyn AiProvider>>, settings: RouterSettings) -> Self {
        for p in &providers {
            debug!("Registered {} provider (default model {})", p.id(), p.default_model());
        }
        Self {
            providers,
            health: HealthTracker::new(settings.health),
            rate: RateTracker::new(settings.rate),
            ledger: CostLedger::new(),
        }
    }

    /// Build adapters for every configured provider.
    pub fn from_config(config: &Config) -> Self {
        let providers = provider::create_providers(config);
        if providers.is_empty() {
            warn!("No AI provider is configured; every request will fail");
        }
        Self::new(providers, RouterSettings::from(&config.router))
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn rate(&self) -> &RateTracker {
        &self.rate
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    fn provider(&self, id: ProviderId) -> Option<Arc<dyn AiProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    /// Registered and holding the credentials it needs.
    fn is_usable(&self, id: ProviderId) -> bool {
        self.providers.iter().any(|p| p.id() == id && p.is_configured())
    }

    fn priority_with(&self, quota_available: bool, mut healthy: impl FnMut(ProviderId) -> bool) -> Vec<ProviderId> {
        let mut order = Vec::with_capacity(ProviderId::ALL.len());

        let quota_healthy = self.is_usable(QUOTA_TIER) && healthy(QUOTA_TIER);
        if quota_healthy && quota_available {
            order.push(QUOTA_TIER);
        }
        if self.is_usable(SELF_HOSTED_TIER) && healthy(SELF_HOSTED_TIER) {
            order.push(SELF_HOSTED_TIER);
        }
        if self.is_usable(PAID_TIER) && healthy(PAID_TIER) {
            order.push(PAID_TIER);
        }
        // Quota is soft, health is not: an over-quota but healthy tier stays
        // reachable as the last resort.
        if quota_healthy && !quota_available && !order.contains(&QUOTA_TIER) {
            order.push(QUOTA_TIER);
        }
        order
    }

    /// Current provider order. Applies the passive circuit reset and prunes
    /// the quota window as a side effect.
    pub fn provider_priority(&self) -> Vec<ProviderId> {
        let now = Instant::now();
        let quota_available = self.rate.can_use_at(now);
        self.priority_with(quota_available, |id| self.health.is_healthy_at(id, now))
    }

    /// Generate free text from the first provider that succeeds.
    ///
    /// Dropping the returned future cancels the in-flight provider call and
    /// no further providers are tried.
    pub async fn generate_content(
        &self,
        prompt: impl Into<Prompt>,
        config: &GenerationConfig,
    ) -> Result<GenerationResult, RouterError> {
        config.validate().map_err(RouterError::InvalidConfig)?;
        let prompt = prompt.into();
        let prompt = &prompt;

        let routed = self
            .route("generate_content", |provider| async move {
                let model = provider.resolve_model(config).to_string();
                provider.generate_content(&model, prompt, config).await
            })
            .await?;

        let output = routed.output;
        Ok(GenerationResult {
            text: output.text,
            provider: routed.provider,
            model: output.model,
            fallback_used: routed.fallback_used,
            attempted_providers: routed.attempted,
            cost: output.cost,
            usage: output.usage,
        })
    }

    /// Generate a JSON value conforming to `schema`. A reply that fails to
    /// parse counts as a provider failure, exactly like a transport error.
    pub async fn generate_structured_content(
        &self,
        prompt: impl Into<Prompt>,
        schema: &serde_json::Value,
        config: &GenerationConfig,
    ) -> Result<StructuredResult, RouterError> {
        config.validate().map_err(RouterError::InvalidConfig)?;
        let prompt = prompt.into();
        let prompt = &prompt;

        let routed = self
            .route("generate_structured_content", |provider| async move {
                let model = provider.resolve_model(config).to_string();
                provider
                    .generate_structured_content(&model, prompt, schema, config)
                    .await
            })
            .await?;

        let output = routed.output;
        Ok(StructuredResult {
            value: output.value,
            provider: routed.provider,
            model: output.model,
            fallback_used: routed.fallback_used,
            attempted_providers: routed.attempted,
            cost: output.cost,
        })
    }

    async fn route<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<Routed<T>, RouterError>
    where
        T: Billed,
        F: FnMut(Arc<dyn AiProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let priority = self.provider_priority();
        let primary = priority.first().copied();
        debug!("{} priority: {:?}", operation, priority);

        let mut attempted = Vec::with_capacity(priority.len());
        let mut last_error: Option<String> = None;

        for id in priority {
            let Some(provider) = self.provider(id) else {
                continue;
            };
            attempted.push(id);

            match call(provider).await {
                Ok(output) => {
                    self.record_success(id, output.cost());
                    let fallback_used = Some(id) != primary;
                    if fallback_used {
                        info!("{} served by fallback provider {} after {:?}", operation, id, attempted);
                    }
                    return Ok(Routed {
                        output,
                        provider: id,
                        fallback_used,
                        attempted,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!("{} via {} failed: {}", operation, id, message);
                    self.health.record_failure(id, &message);
                    last_error = Some(message);
                }
            }
        }

        Err(RouterError::AllProvidersExhausted {
            attempted,
            last_error: last_error.unwrap_or_else(|| NO_PROVIDER_AVAILABLE.to_string()),
        })
    }

    fn record_success(&self, id: ProviderId, cost: f64) {
        self.health.record_success(id);
        if id == QUOTA_TIER {
            self.rate.record_use();
        }
        self.ledger.record(id, cost);
    }

    /// Snapshot of health, quota, priority and spend. Never mutates state,
    /// so repeated calls without traffic in between return the same data.
    pub fn status(&self) -> StatusSnapshot {
        let now = Instant::now();
        let rate_limit = self.rate.usage_at(now);

        let providers = ProviderId::ALL
            .iter()
            .map(|&id| ProviderStatus {
                provider: id,
                configured: self.is_usable(id),
                health: self.health.peek(id, now),
            })
            .collect();

        let priority = self.priority_with(rate_limit.has_capacity(), |id| {
            self.health.peek(id, now).healthy
        });

        StatusSnapshot {
            providers,
            rate_limit,
            priority,
            costs: self.ledger.snapshot(),
            total_cost_usd: self.ledger.total_cost(),
        }
    }

    /// Clear quota windows, zero the ledger and force-close every circuit.
    pub fn reset(&self) {
        self.rate.reset();
        self.ledger.reset();
        self.health.reset();
        info!("Router state reset");
    }

    /// Probe every registered provider concurrently. Health state is left
    /// alone; only real requests move the circuit breaker.
    pub async fn check_availability(&self) -> BTreeMap<ProviderId, bool> {
        let probes = self.providers.iter().map(|p| {
            let p = p.clone();
            async move { (p.id(), p.is_available().await) }
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }
}

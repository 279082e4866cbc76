//! Model router
//!
//! The router owns the endpoint catalog plus the health, rate-limit, usage,
//! and spend state derived from reported call outcomes, and resolves each
//! completion request to the first admissible endpoint: the requested target
//! first, then the configured fallback chain in order.
//!
//! The router never performs network calls. Callers route, call the chosen
//! endpoint through their own adapter, then report the outcome back via
//! [`ModelRouter::record_usage`] so subsequent decisions see fresh state.

use crate::cost::CostLedger;
use crate::endpoint::{endpoint_key, ModelEndpoint};
use crate::error::{Error, Result};
use crate::health::ModelHealth;
use crate::params::{ModelParams, ParamOverrides, PresetCatalog};
use crate::rate::RateWindow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Provider targeted when a request names none
    pub default_provider: String,
    /// Model targeted when a request names none
    pub default_model: String,
    /// Ordered providers tried after the target endpoint
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    /// Whether fallback traversal is enabled at all
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
    /// Candidate list is truncated to this many fallbacks + the target
    #[serde(default = "default_max_fallback_attempts")]
    pub max_fallback_attempts: usize,
    /// Suggested caller-side delay between fallback calls; not enforced here
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_delay_ms: u64,
    /// Advisory health-check cadence for external probes; no internal timer
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Per-request spend cap (USD), unlimited when absent
    #[serde(default)]
    pub max_cost_per_request: Option<f64>,
    /// Per-UTC-day spend cap (USD), unlimited when absent
    #[serde(default)]
    pub max_cost_per_day: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_max_fallback_attempts() -> usize {
    3
}

fn default_fallback_delay_ms() -> u64 {
    1000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_provider: "anthropic".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            fallback_chain: Vec::new(),
            enable_fallback: true,
            max_fallback_attempts: default_max_fallback_attempts(),
            fallback_delay_ms: default_fallback_delay_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_cost_per_request: None,
            max_cost_per_day: None,
        }
    }
}

impl RouterConfig {
    /// Create a configuration with the given default target
    #[must_use]
    pub fn new(default_provider: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            default_provider: default_provider.into(),
            default_model: default_model.into(),
            ..Default::default()
        }
    }

    /// Set the fallback chain
    #[must_use]
    pub fn with_fallback_chain(mut self, providers: &[&str]) -> Self {
        self.fallback_chain = providers.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Set the fallback truncation limit
    #[must_use]
    pub fn with_max_fallback_attempts(mut self, max: usize) -> Self {
        self.max_fallback_attempts = max;
        self
    }

    /// Set the spend caps
    #[must_use]
    pub fn with_budgets(mut self, per_request: Option<f64>, per_day: Option<f64>) -> Self {
        self.max_cost_per_request = per_request;
        self.max_cost_per_day = per_day;
        self
    }
}

// ============================================================================
// Request / result types
// ============================================================================

/// A routing request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Explicit target provider (falls back to the router default)
    #[serde(default)]
    pub provider: Option<String>,
    /// Explicit target model (falls back to the router default)
    #[serde(default)]
    pub model: Option<String>,
    /// Named parameter preset
    #[serde(default)]
    pub preset: Option<String>,
    /// Use-case label used for preset matching when no preset is named
    #[serde(default)]
    pub use_case: Option<String>,
    /// Request-level parameter overrides (always win)
    #[serde(default)]
    pub overrides: ParamOverrides,
    /// Whether the request needs tool/function calling
    #[serde(default)]
    pub require_tools: bool,
    /// Whether the request needs image input
    #[serde(default)]
    pub require_vision: bool,
    /// Estimated input units, used for rate and budget admission
    #[serde(default)]
    pub estimated_input_units: u64,
    /// Estimated output units, used for rate and budget admission
    #[serde(default)]
    pub estimated_output_units: u64,
}

impl RouteRequest {
    /// Request targeting a specific endpoint
    #[must_use]
    pub fn to_endpoint(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            model: Some(model.into()),
            ..Default::default()
        }
    }

    /// Set estimated unit counts
    #[must_use]
    pub fn with_estimates(mut self, input_units: u64, output_units: u64) -> Self {
        self.estimated_input_units = input_units;
        self.estimated_output_units = output_units;
        self
    }

    /// Require tool support
    #[must_use]
    pub fn require_tools(mut self) -> Self {
        self.require_tools = true;
        self
    }

    /// Require vision support
    #[must_use]
    pub fn require_vision(mut self) -> Self {
        self.require_vision = true;
        self
    }

    fn capability_match(&self, endpoint: &ModelEndpoint) -> bool {
        (!self.require_tools || endpoint.supports_tools)
            && (!self.require_vision || endpoint.supports_vision)
    }
}

/// The outcome of a routing decision. Value type, not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    /// The chosen endpoint
    pub endpoint: ModelEndpoint,
    /// Effective model parameters after preset + override resolution
    pub params: ModelParams,
    /// Whether the chosen endpoint was not the first candidate
    pub is_fallback: bool,
    /// Candidates skipped before this one was admitted
    pub fallback_attempts: usize,
    /// Estimated cost (USD) for the request's unit estimates
    pub estimated_cost: f64,
    /// Human-readable explanation of the decision
    pub reason: String,
}

/// Per-endpoint usage counters, written only by `record_usage`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointUsage {
    /// Total recorded calls
    pub total_requests: u64,
    /// Successful calls
    pub successful_requests: u64,
    /// Failed calls
    pub failed_requests: u64,
    /// Input units consumed
    pub input_units: u64,
    /// Output units produced
    pub output_units: u64,
    /// Accumulated cost (USD)
    pub total_cost: f64,
    /// Running mean latency across recorded calls
    pub avg_latency_ms: f64,
}

impl EndpointUsage {
    fn record(&mut self, input_units: u64, output_units: u64, latency_ms: u64, success: bool, cost: f64) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        self.input_units += input_units;
        self.output_units += output_units;
        self.total_cost += cost;
        let n = self.total_requests as f64;
        self.avg_latency_ms = self.avg_latency_ms + (latency_ms as f64 - self.avg_latency_ms) / n;
    }
}

/// Aggregate usage across all endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Total recorded calls
    pub total_requests: u64,
    /// Successful calls
    pub successful_requests: u64,
    /// Failed calls
    pub failed_requests: u64,
    /// Accumulated cost (USD)
    pub total_cost: f64,
    /// Spend in the current UTC day
    pub daily_cost: f64,
    /// Per-provider request and cost totals
    pub by_provider: HashMap<String, ProviderUsage>,
}

/// Per-provider slice of [`RouterStats`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderUsage {
    /// Recorded calls for this provider
    pub requests: u64,
    /// Accumulated cost (USD) for this provider
    pub cost: f64,
}

// ============================================================================
// ModelRouter
// ============================================================================

/// The routing control plane: endpoint catalog plus health, rate, usage,
/// and spend state, all owned by this instance.
///
/// Construct explicitly and share via `Arc`; there is no process-wide
/// default instance.
pub struct ModelRouter {
    config: RouterConfig,
    presets: PresetCatalog,
    endpoints: RwLock<HashMap<String, ModelEndpoint>>,
    health: RwLock<HashMap<String, ModelHealth>>,
    rate: RwLock<HashMap<String, RateWindow>>,
    usage: RwLock<HashMap<String, EndpointUsage>>,
    costs: RwLock<CostLedger>,
}

impl ModelRouter {
    /// Create a router with the default preset catalog
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            presets: PresetCatalog::default(),
            endpoints: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            rate: RwLock::new(HashMap::new()),
            usage: RwLock::new(HashMap::new()),
            costs: RwLock::new(CostLedger::new()),
        }
    }

    /// Replace the preset catalog
    #[must_use]
    pub fn with_presets(mut self, presets: PresetCatalog) -> Self {
        self.presets = presets;
        self
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Catalog management
    // ------------------------------------------------------------------

    /// Upsert a catalog entry. Re-registration replaces the record wholesale
    /// and resets its health, usage, and rate-limit state.
    pub async fn register_endpoint(&self, endpoint: ModelEndpoint) {
        let key = endpoint.key();
        debug!(endpoint = %key, "Registering endpoint");

        self.endpoints.write().await.insert(key.clone(), endpoint);
        self.health.write().await.insert(key.clone(), ModelHealth::new());
        self.usage.write().await.insert(key.clone(), EndpointUsage::default());
        self.rate.write().await.insert(key, RateWindow::new());
    }

    /// Toggle an endpoint's routing eligibility, the only in-place mutation
    /// allowed on a registered record.
    pub async fn set_endpoint_enabled(
        &self,
        provider: &str,
        model: &str,
        enabled: bool,
    ) -> Result<()> {
        let key = endpoint_key(provider, model);
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .get_mut(&key)
            .ok_or_else(|| Error::UnknownEndpoint {
                provider: provider.to_string(),
                model: model.to_string(),
            })?;
        endpoint.enabled = enabled;
        info!(endpoint = %key, enabled, "Endpoint eligibility changed");
        Ok(())
    }

    /// List all registered endpoints
    pub async fn list_endpoints(&self) -> Vec<ModelEndpoint> {
        self.endpoints.read().await.values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Resolve a request to the first admissible endpoint.
    ///
    /// Fails with [`Error::NoAvailableEndpoint`] when every candidate is
    /// exhausted; the error is never retried internally, since retry policy
    /// belongs to the caller.
    #[instrument(skip(self, request))]
    pub async fn route(&self, request: &RouteRequest) -> Result<RouteResult> {
        let params = self.presets.resolve(
            request.preset.as_deref(),
            request.use_case.as_deref(),
            &request.overrides,
        );

        let target_provider = request
            .provider
            .as_deref()
            .unwrap_or(&self.config.default_provider);
        let target_model = request.model.as_deref().unwrap_or(&self.config.default_model);

        let candidates = self
            .build_candidates(target_provider, target_model, request)
            .await;

        if candidates.is_empty() {
            warn!(
                provider = target_provider,
                model = target_model,
                "No routing candidates"
            );
            return Err(Error::NoAvailableEndpoint {
                provider: target_provider.to_string(),
                model: target_model.to_string(),
                skipped: 0,
            });
        }

        let estimated_units = request.estimated_input_units + request.estimated_output_units;

        let health = self.health.read().await;
        let rate = self.rate.read().await;
        let costs = self.costs.read().await;

        let mut skipped = 0usize;
        for (index, endpoint) in candidates.iter().enumerate() {
            let key = endpoint.key();

            if let Some(h) = health.get(&key) {
                if h.circuit_open() {
                    debug!(endpoint = %key, "Skipping: circuit open");
                    skipped += 1;
                    continue;
                }
            }

            if let Some(window) = rate.get(&key) {
                if !window.admits(
                    endpoint.requests_per_minute,
                    endpoint.tokens_per_minute,
                    estimated_units,
                ) {
                    debug!(endpoint = %key, "Skipping: rate window exhausted");
                    skipped += 1;
                    continue;
                }
            }

            let estimated_cost = endpoint
                .estimate_cost(request.estimated_input_units, request.estimated_output_units);
            if !costs.admits(
                estimated_cost,
                self.config.max_cost_per_request,
                self.config.max_cost_per_day,
            ) {
                debug!(endpoint = %key, cost = estimated_cost, "Skipping: budget exceeded");
                skipped += 1;
                continue;
            }

            let is_fallback = index > 0;
            let reason = if is_fallback {
                format!("fallback to {} after {} candidates skipped", key, index)
            } else {
                format!("target endpoint {} admitted", key)
            };
            info!(
                endpoint = %key,
                is_fallback,
                fallback_attempts = index,
                "Route resolved"
            );
            return Ok(RouteResult {
                endpoint: endpoint.clone(),
                params,
                is_fallback,
                fallback_attempts: index,
                estimated_cost,
                reason,
            });
        }

        warn!(
            provider = target_provider,
            model = target_model,
            skipped,
            "All routing candidates exhausted"
        );
        Err(Error::NoAvailableEndpoint {
            provider: target_provider.to_string(),
            model: target_model.to_string(),
            skipped,
        })
    }

    /// Build the ordered candidate list: the exact target first, then every
    /// enabled capability-matching endpoint from each fallback provider by
    /// ascending priority, deduplicated and truncated.
    async fn build_candidates(
        &self,
        target_provider: &str,
        target_model: &str,
        request: &RouteRequest,
    ) -> Vec<ModelEndpoint> {
        let endpoints = self.endpoints.read().await;
        let target_key = endpoint_key(target_provider, target_model);
        let mut candidates = Vec::new();

        if let Some(target) = endpoints.get(&target_key) {
            if target.enabled && request.capability_match(target) {
                candidates.push(target.clone());
            }
        }

        if self.config.enable_fallback {
            for provider in &self.config.fallback_chain {
                let mut provider_endpoints: Vec<_> = endpoints
                    .values()
                    .filter(|e| {
                        e.provider == *provider
                            && e.enabled
                            && e.key() != target_key
                            && request.capability_match(e)
                    })
                    .cloned()
                    .collect();
                provider_endpoints.sort_by_key(|e| e.priority);
                candidates.extend(provider_endpoints);
            }
        }

        candidates.truncate(self.config.max_fallback_attempts + 1);
        candidates
    }

    // ------------------------------------------------------------------
    // Outcome reporting
    // ------------------------------------------------------------------

    /// Report one call's outcome. This is the only write path for usage
    /// counters, the rate window, spend, and derived health.
    #[instrument(skip(self))]
    pub async fn record_usage(
        &self,
        provider: &str,
        model: &str,
        input_units: u64,
        output_units: u64,
        latency_ms: u64,
        success: bool,
    ) -> Result<()> {
        let key = endpoint_key(provider, model);
        let cost = {
            let endpoints = self.endpoints.read().await;
            let endpoint = endpoints.get(&key).ok_or_else(|| Error::UnknownEndpoint {
                provider: provider.to_string(),
                model: model.to_string(),
            })?;
            endpoint.estimate_cost(input_units, output_units)
        };

        self.usage
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .record(input_units, output_units, latency_ms, success, cost);

        self.rate
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .record(input_units + output_units);

        self.costs.write().await.accumulate(cost);

        let mut health = self.health.write().await;
        let entry = health.entry(key.clone()).or_default();
        entry.record_outcome(latency_ms, success, None);
        if !entry.available {
            warn!(endpoint = %key, failures = entry.consecutive_failures, "Endpoint marked unavailable");
        }

        Ok(())
    }

    /// Manual health override: force an endpoint available
    pub async fn mark_available(&self, provider: &str, model: &str) -> Result<()> {
        let key = endpoint_key(provider, model);
        let mut health = self.health.write().await;
        let entry = health.get_mut(&key).ok_or_else(|| Error::UnknownEndpoint {
            provider: provider.to_string(),
            model: model.to_string(),
        })?;
        entry.mark_available();
        info!(endpoint = %key, "Endpoint manually marked available");
        Ok(())
    }

    /// Manual health override: force an endpoint unavailable
    pub async fn mark_unavailable(&self, provider: &str, model: &str, reason: &str) -> Result<()> {
        let key = endpoint_key(provider, model);
        let mut health = self.health.write().await;
        let entry = health.get_mut(&key).ok_or_else(|| Error::UnknownEndpoint {
            provider: provider.to_string(),
            model: model.to_string(),
        })?;
        entry.mark_unavailable(reason);
        info!(endpoint = %key, reason, "Endpoint manually marked unavailable");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    /// Health state for one endpoint
    pub async fn get_health_status(&self, provider: &str, model: &str) -> Option<ModelHealth> {
        self.health
            .read()
            .await
            .get(&endpoint_key(provider, model))
            .cloned()
    }

    /// Usage counters for one endpoint
    pub async fn get_endpoint_usage(&self, provider: &str, model: &str) -> Option<EndpointUsage> {
        self.usage
            .read()
            .await
            .get(&endpoint_key(provider, model))
            .cloned()
    }

    /// The enabled endpoint with the lowest combined per-1K cost
    pub async fn get_cheapest_endpoint(&self) -> Option<ModelEndpoint> {
        self.endpoints
            .read()
            .await
            .values()
            .filter(|e| e.enabled)
            .min_by(|a, b| {
                (a.input_cost_per_1k + a.output_cost_per_1k)
                    .partial_cmp(&(b.input_cost_per_1k + b.output_cost_per_1k))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    /// The enabled endpoint with the lowest recorded mean latency.
    /// Endpoints with no recorded calls are not considered.
    pub async fn get_fastest_endpoint(&self) -> Option<ModelEndpoint> {
        let usage = self.usage.read().await;
        self.endpoints
            .read()
            .await
            .values()
            .filter(|e| e.enabled)
            .filter_map(|e| {
                usage
                    .get(&e.key())
                    .filter(|u| u.total_requests > 0)
                    .map(|u| (e, u.avg_latency_ms))
            })
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(e, _)| e.clone())
    }

    /// Total accumulated spend (USD)
    pub async fn get_total_cost(&self) -> f64 {
        self.costs.read().await.total()
    }

    /// Spend (USD) in the current UTC day
    pub async fn get_daily_cost(&self) -> f64 {
        self.costs.read().await.daily()
    }

    /// Aggregate usage and spend across all endpoints
    pub async fn get_stats(&self) -> RouterStats {
        let usage = self.usage.read().await;
        let costs = self.costs.read().await;
        let mut stats = RouterStats {
            total_cost: costs.total(),
            daily_cost: costs.daily(),
            ..Default::default()
        };

        for (key, u) in usage.iter() {
            stats.total_requests += u.total_requests;
            stats.successful_requests += u.successful_requests;
            stats.failed_requests += u.failed_requests;

            let provider = key.split('/').next().unwrap_or(key).to_string();
            let entry = stats.by_provider.entry(provider).or_default();
            entry.requests += u.total_requests;
            entry.cost += u.total_cost;
        }

        stats
    }

    /// Zero all usage, rate, spend, and health state; the catalog is kept
    pub async fn reset_stats(&self) {
        let keys: Vec<String> = self.endpoints.read().await.keys().cloned().collect();

        {
            let mut usage = self.usage.write().await;
            for key in &keys {
                usage.insert(key.clone(), EndpointUsage::default());
            }
        }
        {
            let mut rate = self.rate.write().await;
            for key in &keys {
                rate.insert(key.clone(), RateWindow::new());
            }
        }
        {
            let mut health = self.health.write().await;
            for key in &keys {
                health.insert(key.clone(), ModelHealth::new());
            }
        }
        self.costs.write().await.reset();
        info!("Router stats reset");
    }
}

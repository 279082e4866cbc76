//! Endpoint catalog types
//!
//! A `ModelEndpoint` is the registered record for one provider+model pair:
//! capability flags, fallback priority, rate ceilings, and per-1K-unit
//! pricing. Records are immutable after registration: re-registering
//! replaces the record wholesale; only `enabled` may be toggled in place.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    60_000
}

/// A registered (provider, model) pair with its own capabilities,
/// pricing, and rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// Provider id (e.g. "anthropic", "openai")
    pub provider: String,
    /// Model id at the provider
    pub model: String,
    /// Fallback priority within the provider (lower = preferred)
    #[serde(default)]
    pub priority: u32,
    /// Whether the endpoint is eligible for routing
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the endpoint supports tool/function calling
    #[serde(default)]
    pub supports_tools: bool,
    /// Whether the endpoint supports image input
    #[serde(default)]
    pub supports_vision: bool,
    /// Whether the endpoint supports streamed responses.
    /// Metadata only; never used as a routing filter.
    #[serde(default)]
    pub supports_streaming: bool,
    /// Request ceiling per minute
    pub requests_per_minute: u32,
    /// Token ceiling per minute
    pub tokens_per_minute: u64,
    /// Cost per 1K input units (USD)
    pub input_cost_per_1k: f64,
    /// Cost per 1K output units (USD)
    pub output_cost_per_1k: f64,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ModelEndpoint {
    /// Create an endpoint with the given ceilings and pricing; all
    /// capability flags start false and priority starts at 0.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            priority: 0,
            enabled: true,
            supports_tools: false,
            supports_vision: false,
            supports_streaming: false,
            requests_per_minute: 60,
            tokens_per_minute: 100_000,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Set the fallback priority (lower = preferred)
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set capability flags
    #[must_use]
    pub fn with_capabilities(mut self, tools: bool, vision: bool, streaming: bool) -> Self {
        self.supports_tools = tools;
        self.supports_vision = vision;
        self.supports_streaming = streaming;
        self
    }

    /// Set rate ceilings
    #[must_use]
    pub fn with_rate_limits(mut self, requests_per_minute: u32, tokens_per_minute: u64) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.tokens_per_minute = tokens_per_minute;
        self
    }

    /// Set per-1K-unit pricing
    #[must_use]
    pub fn with_costs(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Catalog key for this endpoint
    #[must_use]
    pub fn key(&self) -> String {
        endpoint_key(&self.provider, &self.model)
    }

    /// Estimated cost for the given unit counts (USD)
    #[must_use]
    pub fn estimate_cost(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 / 1000.0) * self.input_cost_per_1k
            + (output_units as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// Catalog key for a (provider, model) pair
#[must_use]
pub fn endpoint_key(provider: &str, model: &str) -> String {
    format!("{}/{}", provider, model)
}

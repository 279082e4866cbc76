//! Switchboard Router - endpoint selection control plane
//!
//! This crate decides which backend endpoint serves a completion request:
//! - Endpoint: registered (provider, model) pairs with capabilities, pricing,
//!   and rate ceilings
//! - Health: circuit breaking after repeated consecutive failures
//! - Rate: fixed 60s request/token windows per endpoint
//! - Cost: per-request and per-UTC-day budget gating
//! - Params: named presets with use-case matching and override resolution
//! - Router: ordered candidate traversal with automatic provider fallback
//!
//! The router performs no network calls itself: callers route, call the
//! chosen endpoint through their own adapter, then report the outcome back
//! so health, rate, and spend state stay fresh.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cost;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod params;
pub mod rate;
pub mod router;

pub use cost::CostLedger;
pub use endpoint::{endpoint_key, ModelEndpoint};
pub use error::{Error, Result};
pub use health::{ModelHealth, CONSECUTIVE_FAILURE_THRESHOLD};
pub use params::{ModelParams, ParamOverrides, ParamPreset, PresetCatalog};
pub use rate::RateWindow;
pub use router::{
    EndpointUsage, ModelRouter, ProviderUsage, RouteRequest, RouteResult, RouterConfig,
    RouterStats,
};

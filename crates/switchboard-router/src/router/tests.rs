//! Tests for the routing control plane

use super::*;
use crate::endpoint::ModelEndpoint;

fn anthropic_endpoint() -> ModelEndpoint {
    ModelEndpoint::new("anthropic", "claude-sonnet-4-5")
        .with_capabilities(true, true, true)
        .with_rate_limits(60, 100_000)
        .with_costs(3.0, 15.0)
}

fn openai_endpoint() -> ModelEndpoint {
    ModelEndpoint::new("openai", "gpt-5")
        .with_capabilities(true, false, true)
        .with_rate_limits(60, 100_000)
        .with_costs(1.25, 10.0)
}

fn test_config() -> RouterConfig {
    RouterConfig::new("anthropic", "claude-sonnet-4-5").with_fallback_chain(&["anthropic", "openai"])
}

async fn test_router() -> ModelRouter {
    let router = ModelRouter::new(test_config());
    router.register_endpoint(anthropic_endpoint()).await;
    router.register_endpoint(openai_endpoint()).await;
    router
}

#[tokio::test]
async fn test_route_prefers_target() {
    let router = test_router().await;
    let result = router.route(&RouteRequest::default()).await.unwrap();

    assert_eq!(result.endpoint.provider, "anthropic");
    assert!(!result.is_fallback);
    assert_eq!(result.fallback_attempts, 0);
}

#[tokio::test]
async fn test_disabled_endpoint_never_selected() {
    let router = test_router().await;
    router
        .set_endpoint_enabled("anthropic", "claude-sonnet-4-5", false)
        .await
        .unwrap();

    let result = router.route(&RouteRequest::default()).await.unwrap();
    assert_eq!(result.endpoint.provider, "openai");
    assert!(result.is_fallback);
    assert!(result.fallback_attempts >= 1);
}

#[tokio::test]
async fn test_tool_requirement_filters_candidates() {
    let router = ModelRouter::new(test_config());
    router
        .register_endpoint(
            ModelEndpoint::new("anthropic", "claude-sonnet-4-5")
                .with_capabilities(false, false, false),
        )
        .await;
    router.register_endpoint(openai_endpoint()).await;

    let request = RouteRequest::default().require_tools();
    let result = router.route(&request).await.unwrap();
    assert!(result.endpoint.supports_tools);
    assert_eq!(result.endpoint.provider, "openai");
}

#[tokio::test]
async fn test_vision_requirement_filters_candidates() {
    let router = test_router().await;
    router
        .set_endpoint_enabled("anthropic", "claude-sonnet-4-5", false)
        .await
        .unwrap();

    // openai endpoint has no vision; only anthropic does and it is disabled
    let request = RouteRequest::default().require_vision();
    let err = router.route(&request).await.unwrap_err();
    assert!(matches!(err, Error::NoAvailableEndpoint { .. }));
}

#[tokio::test]
async fn test_circuit_breaking_after_three_failures() {
    let router = test_router().await;

    for _ in 0..3 {
        router
            .record_usage("anthropic", "claude-sonnet-4-5", 100, 50, 200, false)
            .await
            .unwrap();
    }

    let health = router
        .get_health_status("anthropic", "claude-sonnet-4-5")
        .await
        .unwrap();
    assert!(!health.available);

    // Routing now falls over to openai
    let result = router.route(&RouteRequest::default()).await.unwrap();
    assert_eq!(result.endpoint.provider, "openai");
    assert!(result.is_fallback);

    // One success restores availability
    router
        .record_usage("anthropic", "claude-sonnet-4-5", 100, 50, 200, true)
        .await
        .unwrap();
    let health = router
        .get_health_status("anthropic", "claude-sonnet-4-5")
        .await
        .unwrap();
    assert!(health.available);
    assert_eq!(health.consecutive_failures, 0);
}

#[tokio::test]
async fn test_rate_limited_endpoint_skipped() {
    let router = ModelRouter::new(test_config());
    router
        .register_endpoint(anthropic_endpoint().with_rate_limits(2, 100_000))
        .await;
    router.register_endpoint(openai_endpoint()).await;

    router
        .record_usage("anthropic", "claude-sonnet-4-5", 10, 10, 100, true)
        .await
        .unwrap();
    router
        .record_usage("anthropic", "claude-sonnet-4-5", 10, 10, 100, true)
        .await
        .unwrap();

    let result = router.route(&RouteRequest::default()).await.unwrap();
    assert_eq!(result.endpoint.provider, "openai");
    assert!(result.is_fallback);
}

#[tokio::test]
async fn test_per_request_budget_skips_expensive_endpoint() {
    let config = test_config().with_budgets(Some(0.01), None);
    let router = ModelRouter::new(config);
    router.register_endpoint(anthropic_endpoint()).await;
    router
        .register_endpoint(
            ModelEndpoint::new("openai", "gpt-5-nano")
                .with_rate_limits(60, 100_000)
                .with_costs(0.0005, 0.004),
        )
        .await;

    // 1K in + 1K out: anthropic ≈ $0.018, nano ≈ $0.0045
    let request = RouteRequest::default().with_estimates(1000, 1000);
    let result = router.route(&request).await.unwrap();
    assert_eq!(result.endpoint.model, "gpt-5-nano");
    assert!(result.is_fallback);
    assert!(result.estimated_cost <= 0.01);
}

#[tokio::test]
async fn test_daily_budget_exhaustion_fails_routing() {
    let config = RouterConfig::new("anthropic", "claude-sonnet-4-5").with_budgets(None, Some(0.01));
    let router = ModelRouter::new(config);
    router.register_endpoint(anthropic_endpoint()).await;

    // Burn the daily budget: 1K in + 1K out ≈ $0.018
    router
        .record_usage("anthropic", "claude-sonnet-4-5", 1000, 1000, 100, true)
        .await
        .unwrap();

    let request = RouteRequest::default().with_estimates(1000, 1000);
    let err = router.route(&request).await.unwrap_err();
    match err {
        Error::NoAvailableEndpoint {
            provider,
            model,
            skipped,
        } => {
            assert_eq!(provider, "anthropic");
            assert_eq!(model, "claude-sonnet-4-5");
            assert_eq!(skipped, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_fallback_disabled_stops_at_target() {
    let mut config = test_config();
    config.enable_fallback = false;
    let router = ModelRouter::new(config);
    router.register_endpoint(anthropic_endpoint()).await;
    router.register_endpoint(openai_endpoint()).await;
    router
        .set_endpoint_enabled("anthropic", "claude-sonnet-4-5", false)
        .await
        .unwrap();

    let err = router.route(&RouteRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::NoAvailableEndpoint { skipped: 0, .. }));
}

#[tokio::test]
async fn test_fallback_ordered_by_priority() {
    let router = ModelRouter::new(test_config());
    router.register_endpoint(anthropic_endpoint()).await;
    router
        .register_endpoint(
            ModelEndpoint::new("openai", "gpt-5")
                .with_priority(2)
                .with_rate_limits(60, 100_000),
        )
        .await;
    router
        .register_endpoint(
            ModelEndpoint::new("openai", "gpt-5-nano")
                .with_priority(1)
                .with_rate_limits(60, 100_000),
        )
        .await;
    router
        .set_endpoint_enabled("anthropic", "claude-sonnet-4-5", false)
        .await
        .unwrap();

    let result = router.route(&RouteRequest::default()).await.unwrap();
    assert_eq!(result.endpoint.model, "gpt-5-nano");
}

#[tokio::test]
async fn test_candidate_list_truncation() {
    let config = test_config().with_max_fallback_attempts(1);
    let router = ModelRouter::new(config);
    router.register_endpoint(anthropic_endpoint()).await;
    router
        .register_endpoint(ModelEndpoint::new("openai", "gpt-5").with_priority(1))
        .await;
    router
        .register_endpoint(ModelEndpoint::new("openai", "gpt-5-nano").with_priority(2))
        .await;

    // Target + first fallback are circuit-broken; the second fallback would
    // be admissible but sits past the truncation limit.
    for _ in 0..3 {
        router
            .record_usage("anthropic", "claude-sonnet-4-5", 1, 1, 10, false)
            .await
            .unwrap();
        router
            .record_usage("openai", "gpt-5", 1, 1, 10, false)
            .await
            .unwrap();
    }

    let err = router.route(&RouteRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::NoAvailableEndpoint { skipped: 2, .. }));
}

#[tokio::test]
async fn test_record_usage_updates_usage_and_cost() {
    let router = test_router().await;
    router
        .record_usage("anthropic", "claude-sonnet-4-5", 2000, 1000, 150, true)
        .await
        .unwrap();

    let usage = router
        .get_endpoint_usage("anthropic", "claude-sonnet-4-5")
        .await
        .unwrap();
    assert_eq!(usage.total_requests, 1);
    assert_eq!(usage.successful_requests, 1);
    assert_eq!(usage.input_units, 2000);
    assert_eq!(usage.output_units, 1000);
    assert!((usage.avg_latency_ms - 150.0).abs() < 1e-9);

    // 2 * 3.0 + 1 * 15.0 = 21.0
    assert!((router.get_total_cost().await - 21.0).abs() < 1e-9);
    assert!((router.get_daily_cost().await - 21.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_record_usage_unknown_endpoint() {
    let router = test_router().await;
    let err = router
        .record_usage("nowhere", "ghost", 1, 1, 1, true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownEndpoint { .. }));
}

#[tokio::test]
async fn test_reregistration_resets_state() {
    let router = test_router().await;
    for _ in 0..3 {
        router
            .record_usage("anthropic", "claude-sonnet-4-5", 1, 1, 10, false)
            .await
            .unwrap();
    }
    assert!(
        !router
            .get_health_status("anthropic", "claude-sonnet-4-5")
            .await
            .unwrap()
            .available
    );

    router.register_endpoint(anthropic_endpoint()).await;
    let health = router
        .get_health_status("anthropic", "claude-sonnet-4-5")
        .await
        .unwrap();
    assert!(health.available);
    assert_eq!(health.consecutive_failures, 0);
    let usage = router
        .get_endpoint_usage("anthropic", "claude-sonnet-4-5")
        .await
        .unwrap();
    assert_eq!(usage.total_requests, 0);
}

#[tokio::test]
async fn test_cheapest_and_fastest_queries() {
    let router = test_router().await;

    let cheapest = router.get_cheapest_endpoint().await.unwrap();
    assert_eq!(cheapest.provider, "openai");

    // No usage recorded yet: no latency data
    assert!(router.get_fastest_endpoint().await.is_none());

    router
        .record_usage("anthropic", "claude-sonnet-4-5", 10, 10, 80, true)
        .await
        .unwrap();
    router
        .record_usage("openai", "gpt-5", 10, 10, 300, true)
        .await
        .unwrap();

    let fastest = router.get_fastest_endpoint().await.unwrap();
    assert_eq!(fastest.provider, "anthropic");
}

#[tokio::test]
async fn test_manual_health_overrides() {
    let router = test_router().await;
    router
        .mark_unavailable("anthropic", "claude-sonnet-4-5", "drained for deploy")
        .await
        .unwrap();

    let result = router.route(&RouteRequest::default()).await.unwrap();
    assert_eq!(result.endpoint.provider, "openai");

    router
        .mark_available("anthropic", "claude-sonnet-4-5")
        .await
        .unwrap();
    let result = router.route(&RouteRequest::default()).await.unwrap();
    assert_eq!(result.endpoint.provider, "anthropic");
}

#[tokio::test]
async fn test_stats_aggregation_and_reset() {
    let router = test_router().await;
    router
        .record_usage("anthropic", "claude-sonnet-4-5", 1000, 500, 100, true)
        .await
        .unwrap();
    router
        .record_usage("openai", "gpt-5", 1000, 500, 100, false)
        .await
        .unwrap();

    let stats = router.get_stats().await;
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.by_provider.len(), 2);
    assert!(stats.total_cost > 0.0);

    router.reset_stats().await;
    let stats = router.get_stats().await;
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.total_cost, 0.0);
    // Catalog survives a stats reset
    assert_eq!(router.list_endpoints().await.len(), 2);
}

#[tokio::test]
async fn test_route_resolves_params_with_overrides() {
    let router = test_router().await;
    let request = RouteRequest {
        preset: Some("deterministic".to_string()),
        overrides: crate::params::ParamOverrides {
            max_tokens: Some(256),
            ..Default::default()
        },
        ..Default::default()
    };

    let result = router.route(&request).await.unwrap();
    assert_eq!(result.params.temperature, 0.0);
    assert_eq!(result.params.max_tokens, 256);
}

//! RDAP resolver and cache tests against a local registry stand-in

mod helpers;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dsrc_common::config::RdapConfig;
use dsrc_enrich::services::{LookupFailure, OrgResolver, RdapCache, RdapResolver, ResolutionSource};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn registry(State(hits): State<Arc<AtomicUsize>>, Path(ip): Path<String>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    match ip.as_str() {
        "47.1.1.1" => (
            StatusCode::OK,
            axum::Json(json!({
                "objectClassName": "ip network",
                "name": "FRONTIER-NET",
            })),
        )
            .into_response(),
        "68.1.1.1" => (
            StatusCode::OK,
            axum::Json(json!({
                "objectClassName": "ip network",
                "entities": [{
                    "roles": ["registrant"],
                    "vcardArray": ["vcard", [
                        ["version", {}, "text", "4.0"],
                        ["fn", {}, "text", "Cox Communications Inc."],
                        ["kind", {}, "text", "org"]
                    ]]
                }]
            })),
        )
            .into_response(),
        "12.0.0.1" => (
            StatusCode::OK,
            axum::Json(json!({
                "objectClassName": "ip network",
                "entities": [{
                    "roles": ["registrant"],
                    "vcardArray": ["vcard", [
                        ["fn", {}, "text", "Private Customer - AT&T Corp"],
                        ["kind", {}, "text", "org"]
                    ]]
                }]
            })),
        )
            .into_response(),
        "23.0.0.1" => (StatusCode::OK, axum::Json(json!({ "objectClassName": "ip network" }))).into_response(),
        "23.0.0.2" => (StatusCode::OK, "").into_response(),
        "23.0.0.3" => (StatusCode::OK, "{not json").into_response(),
        "23.0.0.4" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "23.0.0.5" => StatusCode::TOO_MANY_REQUESTS.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn resolver_with_registry() -> (RdapResolver, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/ip/:ip", get(registry))
        .with_state(hits.clone());
    let base_url = helpers::spawn_server(router).await;

    let config = RdapConfig {
        base_url,
        timeout_secs: 5,
        requests_per_second: 100,
        ..RdapConfig::default()
    };
    (RdapResolver::new(&config).unwrap(), hits)
}

#[tokio::test]
async fn test_network_name_is_returned() {
    let (resolver, _) = resolver_with_registry().await;
    let resolution = resolver.resolve("47.1.1.1").await.unwrap();
    assert_eq!(resolution.org_name, "FRONTIER-NET");
    assert_eq!(resolution.source, ResolutionSource::Registry);
    assert!(resolution.raw_response.is_some());
}

#[tokio::test]
async fn test_registrant_vcard_name_is_returned() {
    let (resolver, _) = resolver_with_registry().await;
    assert_eq!(resolver.resolve("68.1.1.1").await.unwrap().org_name, "Cox Communications Inc.");
    assert_eq!(resolver.resolve("12.0.0.1").await.unwrap().org_name, "AT&T Corp");
}

#[tokio::test]
async fn test_failures_are_classified() {
    let (resolver, _) = resolver_with_registry().await;

    assert_eq!(resolver.resolve("23.0.0.1").await, Err(LookupFailure::NoOrgName));
    assert_eq!(resolver.resolve("23.0.0.2").await, Err(LookupFailure::NotFound));
    assert_eq!(resolver.resolve("23.0.0.9").await, Err(LookupFailure::NotFound));

    for ip in ["23.0.0.3", "23.0.0.4", "23.0.0.5"] {
        let failure = resolver.resolve(ip).await.unwrap_err();
        assert!(failure.is_transient(), "{} should be transient, got {:?}", ip, failure);
    }
}

#[tokio::test]
async fn test_local_answers_never_reach_the_registry() {
    let (resolver, hits) = resolver_with_registry().await;

    assert_eq!(resolver.resolve("10.1.2.3").await, Err(LookupFailure::NotRoutable));
    assert_eq!(resolver.resolve("100.64.0.1").await, Err(LookupFailure::NotRoutable));
    assert!(matches!(resolver.resolve("not-an-ip").await, Err(LookupFailure::InvalidAddress(_))));

    let static_answer = resolver.resolve("166.80.4.5").await.unwrap();
    assert_eq!(static_answer.org_name, "Verizon Business");
    assert_eq!(static_answer.source, ResolutionSource::StaticAssignment);

    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cache_keeps_only_successes() {
    let (resolver, hits) = resolver_with_registry().await;
    let cache = RdapCache::new(helpers::memory_pool().await);

    for ip in ["47.1.1.1", "23.0.0.1", "23.0.0.4"] {
        let outcome = resolver.resolve(ip).await;
        cache.store(ip, &outcome).await.unwrap();
    }

    assert_eq!(cache.lookup("47.1.1.1").await.unwrap().as_deref(), Some("FRONTIER-NET"));
    assert_eq!(cache.lookup("23.0.0.1").await.unwrap(), None);
    assert_eq!(cache.lookup("23.0.0.4").await.unwrap(), None);
    assert_eq!(cache.len().await.unwrap(), 1);

    let entry = cache.entry("47.1.1.1").await.unwrap().unwrap();
    assert!(entry.rdap_response.unwrap().contains("FRONTIER-NET"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

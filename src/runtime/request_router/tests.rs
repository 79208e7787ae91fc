use super::*;
use crate::config::{defaults, GateConfig, GeoSource};
use crate::enforcement::counter_store::{KeyLocks, KvCounterStore};
use crate::providers::RegistryError;
use crate::signals::browser::PatternBotClassifier;
use crate::test_support::{
    body_text, header_value, storefront_record, InMemoryStore, ManualClock, StaticRegistry,
    TestRequest,
};
use spin_sdk::http::Method;
use std::sync::Arc;
use std::time::Duration;

const NOW: u64 = 1_700_000_000;

fn gate_with(cfg: GateConfig, registry: StaticRegistry) -> Gate {
    Gate {
        geo: GeoProvider::from_config(&cfg),
        cfg,
        counters: Box::new(KvCounterStore::with_locks(
            InMemoryStore::default(),
            Arc::new(KeyLocks::default()),
            Duration::from_millis(100),
        )),
        registry: Box::new(registry),
        classifier: Box::new(PatternBotClassifier),
        clock: Box::new(ManualClock::new(NOW)),
    }
}

fn shop_gate() -> Gate {
    gate_with(
        defaults().unwrap(),
        StaticRegistry::with(storefront_record("shop.myshopify.com", "cid-1")),
    )
}

#[test]
fn admitted_request_renders_escaped_widget_page() {
    let gate = shop_gate();
    let resp = route_request(&gate, &TestRequest::admissible(NOW).build());
    assert_eq!(*resp.status(), 200);
    assert_eq!(
        header_value(&resp, "content-security-policy").as_deref(),
        Some("frame-ancestors *")
    );
    assert_eq!(header_value(&resp, "x-frame-options").as_deref(), Some("ALLOWALL"));
    let body = body_text(&resp);
    assert!(body.contains("Sofa &lt;Deluxe&gt;"));
    assert!(body.contains("shop.myshopify.com"));
}

#[test]
fn get_is_405_with_empty_body_and_framing() {
    let gate = shop_gate();
    let resp = route_request(
        &gate,
        &TestRequest::admissible(NOW).method(Method::Get).build(),
    );
    assert_eq!(*resp.status(), 405);
    assert!(resp.body().is_empty());
    assert_eq!(header_value(&resp, "x-frame-options").as_deref(), Some("ALLOWALL"));
}

#[test]
fn domain_mismatch_is_access_denied() {
    let gate = gate_with(
        defaults().unwrap(),
        StaticRegistry::with(storefront_record("other.com", "cid-1")),
    );
    let resp = route_request(&gate, &TestRequest::admissible(NOW).build());
    assert_eq!(*resp.status(), 403);
    assert_eq!(body_text(&resp), "Access denied");
}

#[test]
fn unknown_client_is_access_denied() {
    let gate = gate_with(defaults().unwrap(), StaticRegistry::empty());
    let resp = route_request(&gate, &TestRequest::admissible(NOW).build());
    assert_eq!(*resp.status(), 403);
    assert_eq!(body_text(&resp), "Access denied");
}

#[test]
fn registry_failure_detail_only_in_debug_mode() {
    let failing = || StaticRegistry::failing(RegistryError::Connection("refused".into()));
    let gate = gate_with(defaults().unwrap(), failing());
    let resp = route_request(&gate, &TestRequest::admissible(NOW).build());
    assert_eq!(*resp.status(), 403);
    assert_eq!(body_text(&resp), "Access denied");

    let mut cfg = defaults().unwrap();
    cfg.debug_errors = true;
    let gate = gate_with(cfg, failing());
    let resp = route_request(&gate, &TestRequest::admissible(NOW).build());
    assert_eq!(
        body_text(&resp),
        "Access denied: registry connection failed: refused"
    );
}

#[test]
fn geo_header_from_untrusted_peer_is_ignored() {
    let gate = shop_gate();
    let req = TestRequest::admissible(NOW)
        .header("spin-client-addr", "198.51.100.9:4000")
        .build();
    let resp = route_request(&gate, &req);
    assert_eq!(*resp.status(), 403);
    assert_eq!(body_text(&resp), "Access denied");
}

#[test]
fn cidr_table_resolves_direct_peer() {
    let mut cfg = defaults().unwrap();
    cfg.geo_source = GeoSource::CidrTable;
    cfg.geo_cidr_table = r#"{"BG": ["198.51.100.0/24"]}"#.to_string();
    let gate = gate_with(
        cfg,
        StaticRegistry::with(storefront_record("shop.myshopify.com", "cid-1")),
    );
    let req = TestRequest::admissible(NOW)
        .header("spin-client-addr", "198.51.100.9:4000")
        .without_header("x-geo-country")
        .build();
    assert_eq!(*route_request(&gate, &req).status(), 200);

    let req = TestRequest::admissible(NOW)
        .header("spin-client-addr", "192.0.2.1:4000")
        .build();
    assert_eq!(*route_request(&gate, &req).status(), 403);
}

#[test]
fn exhausted_ip_quota_returns_retry_after() {
    let mut cfg = defaults().unwrap();
    cfg.ip_quota.limit = 1;
    let gate = gate_with(
        cfg,
        StaticRegistry::with(storefront_record("shop.myshopify.com", "cid-1")),
    );
    assert_eq!(
        *route_request(&gate, &TestRequest::admissible(NOW).build()).status(),
        200
    );
    let resp = route_request(&gate, &TestRequest::admissible(NOW).build());
    assert_eq!(*resp.status(), 429);
    assert_eq!(header_value(&resp, "retry-after").as_deref(), Some("60"));
    assert_eq!(body_text(&resp), "Too many requests");
}

#[test]
fn oversized_body_fails_the_timestamp_check() {
    let gate = shop_gate();
    let req = TestRequest::admissible(NOW)
        .field("product_title", &"x".repeat(70 * 1024))
        .build();
    let resp = route_request(&gate, &req);
    assert_eq!(*resp.status(), 403);
    assert_eq!(body_text(&resp), "Invalid or expired timestamp");
}

#[test]
fn missing_fields_are_reported_by_name() {
    let gate = shop_gate();
    let req = TestRequest::admissible(NOW)
        .without_field("cid")
        .without_field("product_id")
        .build();
    let resp = route_request(&gate, &req);
    assert_eq!(*resp.status(), 400);
    assert_eq!(body_text(&resp), "Missing required fields: cid, product_id");
}

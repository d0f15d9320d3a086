use chrono::{TimeZone, Utc};
use regcache_sync::http::{HttpConnectivityProbe, HttpRemoteSource};
use regcache_sync::{ConnectivityProbe, RejectReason, RemoteError, RemoteSource};
use regcache_types::RemoteRecord;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source(server: &MockServer) -> HttpRemoteSource {
    HttpRemoteSource::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

fn record_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "payload": { "title": "Regulation 12" },
        "updated_at": "2026-01-01T00:00:05Z"
    })
}

// --- Changes ---

#[tokio::test]
async fn list_changed_since_sends_cursor_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/changes"))
        .and(query_param("since", "2026-01-01T00:00:00.000Z"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [record_json("R1")],
            "cutoff": "2026-01-01T00:00:05Z",
            "has_more": false
        })))
        .mount(&server)
        .await;

    let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let page = source(&server)
        .list_changed_since(Some(since), 50)
        .await
        .unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].id, "R1");
    assert_eq!(
        page.cutoff,
        Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 5).unwrap())
    );
    assert!(!page.has_more);
}

#[tokio::test]
async fn list_without_cursor_omits_since() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [],
            "cutoff": null,
            "has_more": false
        })))
        .mount(&server)
        .await;

    let page = source(&server).list_changed_since(None, 10).await.unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.cutoff, None);

    let requests = server.received_requests().await.unwrap();
    assert!(!requests[0].url.query().unwrap_or("").contains("since"));
}

// --- Batch upsert ---

#[tokio::test]
async fn batch_upsert_parses_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records/batch"))
        .and(body_partial_json(json!({ "records": [{ "id": "A1" }, { "id": "A2" }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accepted": ["A1"],
            "rejected": [{ "id": "A2", "reason": { "kind": "conflict" } }]
        })))
        .mount(&server)
        .await;

    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let ack = source(&server)
        .batch_upsert(&[
            RemoteRecord::new("A1", json!({}), at),
            RemoteRecord::new("A2", json!({}), at),
        ])
        .await
        .unwrap();
    assert_eq!(ack.accepted, vec!["A1".to_string()]);
    assert_eq!(ack.rejected[0].reason, RejectReason::Conflict);
}

#[tokio::test]
async fn server_error_maps_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records/batch"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = source(&server).batch_upsert(&[]).await.unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 503 }));
}

// --- Fetch ---

#[tokio::test]
async fn fetch_record_found_and_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(record_json("R1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let remote = source(&server);
    let found = remote.fetch_record("R1").await.unwrap().unwrap();
    assert_eq!(found.payload["title"], "Regulation 12");
    assert!(remote.fetch_record("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn fetch_record_encodes_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/a%2Fb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(record_json("a/b")))
        .mount(&server)
        .await;

    let found = source(&server).fetch_record("a/b").await.unwrap();
    assert_eq!(found.unwrap().id, "a/b");
}

#[tokio::test]
async fn malformed_body_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/R1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = source(&server).fetch_record("R1").await.unwrap_err();
    assert!(matches!(err, RemoteError::Protocol(_)));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/R1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(record_json("R1"))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let remote = HttpRemoteSource::new(&server.uri(), Duration::from_millis(50)).unwrap();
    let err = remote.fetch_record("R1").await.unwrap_err();
    assert!(matches!(err, RemoteError::Timeout));
}

// --- Probe ---

#[tokio::test]
async fn probe_reports_health_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let up = HttpConnectivityProbe::new(&format!("{}/health", server.uri()), Duration::from_secs(1))
        .unwrap();
    assert!(up.is_reachable().await);

    let down = HttpConnectivityProbe::new(&format!("{}/nope", server.uri()), Duration::from_secs(1))
        .unwrap();
    assert!(!down.is_reachable().await);
}

#[tokio::test]
async fn probe_against_closed_port_is_unreachable() {
    let probe =
        HttpConnectivityProbe::new("http://127.0.0.1:9/health", Duration::from_millis(200)).unwrap();
    assert!(!probe.is_reachable().await);
}

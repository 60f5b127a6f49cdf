mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{provider, FakeRegistrar};
use porkbun_webhook::{handlers::WEBHOOK_CT, router, AppState};

fn app(filter: &[&str], fake: &std::sync::Arc<FakeRegistrar>) -> Router {
    router(AppState::new(provider(filter, fake)))
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, WEBHOOK_CT)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn negotiation_returns_the_domain_filter() {
    let fake = FakeRegistrar::new();
    let resp = app(&["Example.com.", "example.org"], &fake)
        .oneshot(get("/"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], WEBHOOK_CT);
    assert_eq!(
        json_body(resp).await,
        json!({"include": ["example.com", "example.org"], "exclude": []})
    );
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn healthz_is_ok() {
    let fake = FakeRegistrar::new();
    let resp = app(&["example.com"], &fake).oneshot(get("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_records_lists_grouped_endpoints() {
    let fake = FakeRegistrar::new();
    fake.seed("example.com", "www", "A", "1.1.1.1", 600);
    fake.seed("example.com", "www", "A", "2.2.2.2", 600);
    fake.seed("example.com", "", "MX", "mail.example.com", 3600);

    let resp = app(&["example.com"], &fake).oneshot(get("/records")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], WEBHOOK_CT);

    let body = json_body(resp).await;
    assert_eq!(
        body,
        json!([
            {"dnsName": "example.com", "recordType": "MX", "targets": ["10 mail.example.com"], "recordTTL": 3600},
            {"dnsName": "www.example.com", "recordType": "A", "targets": ["1.1.1.1", "2.2.2.2"], "recordTTL": 600}
        ])
    );
}

#[tokio::test]
async fn post_records_applies_and_answers_no_content() {
    let fake = FakeRegistrar::new();
    fake.add_zone("example.com");

    let resp = app(&["example.com"], &fake)
        .oneshot(post(
            "/records",
            json!({
                "Create": [{"dnsName": "txt.example.com", "recordType": "TXT", "targets": ["hello"]}],
                "UpdateOld": [],
                "UpdateNew": [],
                "Delete": []
            }),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let records = fake.records("example.com");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "txt");
    assert_eq!(records[0].content, "hello");
    assert_eq!(records[0].ttl, 600);
}

#[tokio::test]
async fn conflicting_batch_is_a_bad_request() {
    let fake = FakeRegistrar::new();
    fake.add_zone("example.com");
    let ep = json!({"dnsName": "www.example.com", "recordType": "A", "targets": ["1.1.1.1"]});

    let resp = app(&["example.com"], &fake)
        .oneshot(post("/records", json!({"Create": [ep.clone(), ep]})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert!(body["error"].as_str().unwrap().contains("www.example.com"));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn rejected_mutation_reports_the_zone() {
    let fake = FakeRegistrar::new();
    fake.add_zone("example.com");
    fake.fail(
        common::Kind::Create,
        None,
        porkbun_webhook::registrar::ApiError::Rejected {
            status: 400,
            message: "Invalid type.".into(),
        },
        None,
    );

    let resp = app(&["example.com"], &fake)
        .oneshot(post(
            "/records",
            json!({"Create": [{"dnsName": "www.example.com", "recordType": "A", "targets": ["1.1.1.1"]}]}),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(resp).await;
    assert_eq!(body["zones"][0]["zone"], "example.com");
    assert_eq!(body["accepted"]["create"][0]["dnsName"], "www.example.com");
}

#[tokio::test]
async fn adjust_endpoints_filters_and_normalises() {
    let fake = FakeRegistrar::new();
    let resp = app(&["example.com"], &fake)
        .oneshot(post(
            "/adjustendpoints",
            json!([
                {"dnsName": "Alias.Example.com.", "recordType": "CNAME", "targets": ["target.example.net."], "recordTTL": 60},
                {"dnsName": "other.example.org", "recordType": "A", "targets": ["1.1.1.1"]}
            ]),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], WEBHOOK_CT);
    assert_eq!(
        json_body(resp).await,
        json!([
            {"dnsName": "alias.example.com", "recordType": "CNAME", "targets": ["target.example.net"], "recordTTL": 600}
        ])
    );
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn adjusted_batch_with_unsupported_types_still_applies() {
    let fake = FakeRegistrar::new();
    fake.add_zone("example.com");
    let svc = app(&["example.com"], &fake);

    let resp = svc
        .clone()
        .oneshot(post(
            "/adjustendpoints",
            json!([
                {"dnsName": "www.example.com", "recordType": "A", "targets": ["1.2.3.4"]},
                {"dnsName": "svc.example.com", "recordType": "HTTPS", "targets": ["1 . alpn=h2"]}
            ]),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let adjusted = json_body(resp).await;
    assert_eq!(adjusted.as_array().unwrap().len(), 1);
    assert_eq!(adjusted[0]["recordType"], "A");

    let resp = svc
        .oneshot(post("/records", json!({"Create": adjusted})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(fake.records("example.com").len(), 1);
}

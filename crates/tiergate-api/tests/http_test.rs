//! HTTP surface: status codes, bodies and operator authentication.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tiergate_api::{create_router, AppState, Config, Gateway};
use tiergate_core::{TestClock, TierDescriptor};
use tiergate_pipeline::{DeadLetterStore, InMemoryDeadLetterStore, MAX_PAYLOAD_SIZE};
use tiergate_router::TierError;
use tiergate_testing::{
    bulk_tier, rest_tier, EventBuilder, RecordingCommitter, ScriptedTierClient, TestWebhook,
    WebhookBuilder, TEST_SECRET,
};
use tower::ServiceExt;

const OPERATOR_TOKEN: &str = "op_test_token";

struct TestApp {
    gateway: Arc<Gateway>,
    router: Router,
}

impl TestApp {
    fn new(config: Config, tiers: Vec<(TierDescriptor, ScriptedTierClient)>) -> Self {
        Self::with_dead_letters(config, tiers, Arc::new(InMemoryDeadLetterStore::new()))
    }

    fn with_dead_letters(
        config: Config,
        tiers: Vec<(TierDescriptor, ScriptedTierClient)>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
    ) -> Self {
        let operator_token = config.operator_token.clone();
        let gateway = tiers
            .into_iter()
            .fold(Gateway::builder(config, Arc::new(TestClock::new())), |builder, (desc, client)| {
                builder.tier(desc, Arc::new(client))
            })
            .committer(Arc::new(RecordingCommitter::new()))
            .dead_letters(dead_letters)
            .build()
            .unwrap();
        let gateway = Arc::new(gateway);
        let router = create_router(
            AppState::new(gateway.clone(), operator_token.as_deref()),
            Duration::from_secs(5),
        );
        Self { gateway, router }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("request execution")
    }
}

fn config() -> Config {
    Config {
        webhook_secret: TEST_SECRET.to_string(),
        operator_token: Some(OPERATOR_TOKEN.to_string()),
        queue_capacity: 16,
        circuit_breaker_failure_threshold: 1,
        ..Config::default()
    }
}

fn webhook_request(webhook: &TestWebhook) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(webhook.path());
    for (name, value) in webhook.headers("x-webhook-signature") {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(webhook.body.clone())).expect("request build")
}

fn operator_request(method: &str, uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .expect("request build")
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn signed_webhook_is_accepted_then_acknowledged_as_duplicate() {
    let app = TestApp::new(config(), Vec::new());
    let webhook = WebhookBuilder::with_defaults().event_id("evt_http_1").build();

    let first = app.send(webhook_request(&webhook)).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert!(first.headers().contains_key("x-request-id"));
    assert_eq!(json_body(first).await, json!({"event_id": "evt_http_1", "status": "accepted"}));

    let second = app.send(webhook_request(&webhook)).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["status"], "duplicate");

    assert_eq!(app.gateway.queue_stats().live, 1);
}

#[tokio::test]
async fn bad_signature_is_unauthorized_without_detail() {
    let app = TestApp::new(config(), Vec::new());
    let forged = WebhookBuilder::with_defaults().secret("whsec_wrong").build();

    let response = app.send(webhook_request(&forged)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "E1001");
    assert_eq!(body["error"]["class"], "signature");
    assert_eq!(body["error"]["message"], "webhook authentication failed");
    assert!(app.gateway.queue_stats().live == 0);
}

#[tokio::test]
async fn full_queue_answers_503_with_retry_after() {
    let app = TestApp::new(Config { queue_capacity: 1, ..config() }, Vec::new());

    let first = WebhookBuilder::with_defaults().build();
    assert_eq!(app.send(webhook_request(&first)).await.status(), StatusCode::ACCEPTED);

    let second = WebhookBuilder::with_defaults().build();
    let response = app.send(webhook_request(&second)).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "5");
    assert_eq!(json_body(response).await["error"]["code"], "E3003");
}

#[tokio::test]
async fn verified_webhook_without_event_id_is_bad_request() {
    let app = TestApp::new(config(), Vec::new());
    let webhook = WebhookBuilder::with_defaults().without_event_id().build();

    let response = app.send(webhook_request(&webhook)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "E1003");
}

#[tokio::test]
async fn oversized_payload_is_rejected_with_413() {
    let app = TestApp::new(config(), Vec::new());
    let webhook = WebhookBuilder::with_defaults().body(vec![b'x'; MAX_PAYLOAD_SIZE + 1]).build();

    let response = app.send(webhook_request(&webhook)).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["error"]["code"], "E1002");
}

#[tokio::test]
async fn operator_routes_require_the_token() {
    let app = TestApp::new(config(), Vec::new());

    let missing = Request::builder().uri("/dead-letters").body(Body::empty()).unwrap();
    assert_eq!(app.send(missing).await.status(), StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/dead-letters")
        .header(header::AUTHORIZATION, "Bearer not-the-token")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(wrong).await.status(), StatusCode::UNAUTHORIZED);

    let ok = app.send(operator_request("GET", "/dead-letters", Body::empty())).await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(json_body(ok).await, json!({"dead_letters": [], "count": 0}));
}

#[tokio::test]
async fn operator_routes_are_closed_without_configured_token() {
    let app = TestApp::new(Config { operator_token: None, ..config() }, Vec::new());

    let response = app.send(operator_request("GET", "/circuits", Body::empty())).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dead_letters_can_be_listed_and_replayed() {
    let store = Arc::new(InMemoryDeadLetterStore::new());
    let event = EventBuilder::with_defaults().id("evt_dlq").attempt_count(5).build();
    store.record(event, "maximum attempts (6) reached".to_string()).await.unwrap();
    let app = TestApp::with_dead_letters(config(), Vec::new(), store);

    let listed = app.send(operator_request("GET", "/dead-letters?limit=10", Body::empty())).await;
    assert_eq!(listed.status(), StatusCode::OK);
    let body = json_body(listed).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["dead_letters"][0]["event_id"], "evt_dlq");
    assert_eq!(body["dead_letters"][0]["attempt_count"], 5);
    assert_eq!(body["dead_letters"][0]["reason"], "maximum attempts (6) reached");

    let replay =
        app.send(operator_request("POST", "/dead-letters/evt_dlq/replay", Body::empty())).await;
    assert_eq!(replay.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(replay).await, json!({"event_id": "evt_dlq", "status": "requeued"}));
    assert_eq!(app.gateway.queue_stats().live, 1);

    let missing =
        app.send(operator_request("POST", "/dead-letters/evt_nope/replay", Body::empty())).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(missing).await["error"]["code"], "E1006");
}

#[tokio::test]
async fn operations_are_served_by_the_first_admissible_tier() {
    let app = TestApp::new(
        config(),
        vec![
            (rest_tier("rest", 1), ScriptedTierClient::always_ok()),
            (bulk_tier("bulk", 2), ScriptedTierClient::always_ok()),
        ],
    );
    let body = json!({"kind": "bulk", "estimated_record_count": 250, "payload": {"ids": [1, 2]}});

    let response =
        app.send(operator_request("POST", "/operations", Body::from(body.to_string()))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["tier"], "bulk");
    assert_eq!(body["status"], 200);
    assert_eq!(body["failed_over"], json!([]));
}

#[tokio::test]
async fn exhausted_tiers_answer_503_and_flip_health() {
    let app = TestApp::new(
        config(),
        vec![(
            bulk_tier("bulk", 1),
            ScriptedTierClient::always_failing(TierError::server(503, "down")),
        )],
    );
    let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
    assert_eq!(app.send(health).await.status(), StatusCode::OK);

    let body = json!({"kind": "single_record", "estimated_record_count": 1});
    let response =
        app.send(operator_request("POST", "/operations", Body::from(body.to_string()))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "E3001");

    // Threshold 1: the single failure opened the only breaker.
    assert!(app.gateway.all_circuits_open());
    let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.send(health).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["tiers"][0]["state"], "open");

    let circuits = app.send(operator_request("GET", "/circuits", Body::empty())).await;
    assert_eq!(json_body(circuits).await["circuits"][0]["tier"], "bulk");
}

#[tokio::test]
async fn malformed_operation_request_is_bad_request() {
    let app = TestApp::new(config(), vec![(rest_tier("rest", 1), ScriptedTierClient::always_ok())]);

    let request = operator_request("POST", "/operations", Body::from(r#"{"kind": "sideways"}"#));
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "E1003");
}

#[tokio::test]
async fn readiness_follows_worker_lifecycle() {
    let app = TestApp::new(config(), vec![(rest_tier("rest", 1), ScriptedTierClient::always_ok())]);
    let ready = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

    assert_eq!(app.send(ready()).await.status(), StatusCode::SERVICE_UNAVAILABLE);

    app.gateway.start().await.unwrap();
    assert_eq!(app.send(ready()).await.status(), StatusCode::OK);

    let live = Request::builder().uri("/live").body(Body::empty()).unwrap();
    assert_eq!(json_body(app.send(live).await).await["status"], "alive");

    app.gateway.shutdown().await.unwrap();
    assert_eq!(app.send(ready()).await.status(), StatusCode::SERVICE_UNAVAILABLE);
}

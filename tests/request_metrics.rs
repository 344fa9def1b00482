mod support;

use std::collections::HashSet;

use axum::http::StatusCode;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use support::{TestApp, get_request, json_body, json_request, send};

#[tokio::test]
async fn request_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let app = TestApp::new();
    let router = app.router();
    let token = app.token("metrics-user", None);

    let response = send(
        &router,
        json_request(
            "POST",
            "/reviews",
            Some(&token),
            &json!({"bookId": "b1", "rating": 4}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let id = created["review"]["id"].as_str().expect("id").to_string();

    for _ in 0..2 {
        let response = send(&router, get_request("/reviews?bookId=b1", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = send(&router, get_request(&format!("/reviews/{id}"), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send(&router, get_request("/reviews/missing-id", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "review_engagement_requests_total",
        "review_engagement_command_ms",
        "review_engagement_events_published_total",
        "review_engagement_qcache_miss_total",
        "review_engagement_qcache_hit_total",
        "review_engagement_ecache_hit_total",
        "review_engagement_ecache_miss_total",
    ];
    for name in expected {
        assert!(names.contains(name), "missing metric {name}; saw {names:?}");
    }
}

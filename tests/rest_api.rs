mod support;

use axum::http::{StatusCode, header};
use review_engagement::application::service::ServiceOptions;
use serde_json::json;
use support::{TestApp, get_request, json_body, json_request, send};

#[tokio::test]
async fn create_then_read_review_over_http() {
    let app = TestApp::new();
    let router = app.router();
    let token = app.token("reader-1", None);

    let response = send(
        &router,
        json_request(
            "POST",
            "/reviews",
            Some(&token),
            &json!({"bookId": "book-9", "rating": 4, "reviewText": "Solid."}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["status"], "OK");
    assert_eq!(created["dataName"], "review");
    assert_eq!(created["review"]["userId"], "reader-1");
    let id = created["review"]["id"]
        .as_str()
        .expect("created review should carry an id")
        .to_string();

    let response = send(&router, get_request(&format!("/reviews/{id}"), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["review"]["rating"], 4);
    assert_eq!(fetched["review"]["statusLabel"], "Pending moderation");
    assert_eq!(fetched["_source"], "ecache");
}

#[tokio::test]
async fn listing_pages_and_serves_repeat_queries_from_cache() {
    let app = TestApp::new();
    let router = app.router();
    let token = app.token("reader-1", None);
    for rating in 1..=3 {
        let response = send(
            &router,
            json_request(
                "POST",
                "/reviews",
                Some(&token),
                &json!({"bookId": "book-1", "rating": rating}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let uri = "/reviews?bookId=book-1&pageNumber=1&pageRowCount=2";
    let first = json_body(send(&router, get_request(uri, None)).await).await;
    assert_eq!(first["reviews"].as_array().map(Vec::len), Some(2));
    assert_eq!(first["paging"]["totalRowCount"], 3);
    assert_eq!(first["paging"]["pageCount"], 2);
    assert_eq!(first["_source"], "db");

    let second = json_body(send(&router, get_request(uri, None)).await).await;
    assert_eq!(second["_source"], "cache");
    assert_eq!(second["reviews"], first["reviews"]);
}

#[tokio::test]
async fn out_of_range_page_numbers_answer_an_empty_page() {
    let app = TestApp::new();
    let router = app.router();
    let token = app.token("reader-1", None);
    let response = send(
        &router,
        json_request("POST", "/reviews", Some(&token), &json!({"bookId": "b1", "rating": 2})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(
        &router,
        get_request("/reviews?pageNumber=9223372036854775807&pageRowCount=10", None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["reviews"], json!([]));
    assert_eq!(body["paging"]["totalRowCount"], 1);
}

#[tokio::test]
async fn anonymous_writes_answer_401_with_error_body() {
    let app = TestApp::new();
    let router = app.router();

    let response = send(
        &router,
        json_request("POST", "/reviews", None, &json!({"bookId": "b", "rating": 2})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .expect("request id should be echoed");
    let body = json_body(response).await;
    assert_eq!(body["status"], "ERR");
    assert_eq!(body["statusCode"], 401);
    assert_eq!(body["requestId"], request_id.as_str());
    assert!(body["errorCode"].as_str().is_some_and(|code| code.starts_with("errMsg_")));
}

#[tokio::test]
async fn caller_request_id_is_adopted() {
    let app = TestApp::new();
    let router = app.router();
    let request = axum::http::Request::builder()
        .uri("/reviews")
        .header("x-request-id", "trace-77")
        .body(axum::body::Body::empty())
        .expect("request should build");

    let response = send(&router, request).await;
    assert_eq!(
        response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("trace-77")
    );
    let body = json_body(response).await;
    assert_eq!(body["requestId"], "trace-77");
}

#[tokio::test]
async fn malformed_json_body_is_rejected() {
    let app = TestApp::new();
    let router = app.router();
    let token = app.token("reader-1", None);
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/reviews")
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::from("{not json"))
        .expect("request should build");

    let response = send(&router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["errorCode"], "errMsg_InvalidJsonBody");
}

#[tokio::test]
async fn other_users_cannot_update_a_review() {
    let app = TestApp::new();
    let router = app.router();
    let owner = app.token("owner", None);
    let stranger = app.token("stranger", None);

    let created = json_body(
        send(
            &router,
            json_request("POST", "/reviews", Some(&owner), &json!({"bookId": "b", "rating": 3})),
        )
        .await,
    )
    .await;
    let id = created["review"]["id"].as_str().expect("id").to_string();

    let response = send(
        &router,
        json_request(
            "PATCH",
            &format!("/reviews/{id}"),
            Some(&stranger),
            &json!({"rating": 1}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &router,
        json_request("PATCH", &format!("/reviews/{id}"), Some(&owner), &json!({"rating": 5})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["review"]["rating"], 5);
    assert_eq!(body["old_review"]["rating"], 3);
}

#[tokio::test]
async fn deleted_reviews_are_gone_for_readers() {
    let app = TestApp::new();
    let router = app.router();
    let owner = app.token("owner", None);
    let created = json_body(
        send(
            &router,
            json_request("POST", "/reviews", Some(&owner), &json!({"bookId": "b", "rating": 3})),
        )
        .await,
    )
    .await;
    let id = created["review"]["id"].as_str().expect("id").to_string();

    let request = axum::http::Request::builder()
        .method("DELETE")
        .uri(format!("/reviews/{id}"))
        .header("authorization", format!("Bearer {owner}"))
        .body(axum::body::Body::empty())
        .expect("request should build");
    assert_eq!(send(&router, request).await.status(), StatusCode::OK);

    let response = send(&router, get_request(&format!("/reviews/{id}"), None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn query_token_is_promoted_to_a_cookie() {
    let app = TestApp::new();
    let router = app.router();
    let token = app.token("reader-1", None);

    let response = send(
        &router,
        get_request(&format!("/reviews?access_token={token}"), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("session cookie should be set");
    assert!(cookie.starts_with("access_token="));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn stale_cookie_is_cleared() {
    let app = TestApp::new();
    let router = app.router();
    let request = axum::http::Request::builder()
        .uri("/reviews")
        .header(header::COOKIE, "access_token=expired-or-forged")
        .body(axum::body::Body::empty())
        .expect("request should build");

    let response = send(&router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("removal cookie should be sent");
    assert!(cookie.starts_with("access_token="));
}

#[tokio::test]
async fn download_flag_returns_an_attachment() {
    let app = TestApp::new();
    let router = app.router();

    let response = send(&router, get_request("/reviews?_download=1", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok()),
        Some("attachment; filename=\"reviews.json\"")
    );
    let body = json_body(response).await;
    assert!(body.is_array());
}

#[tokio::test]
async fn redirect_flag_parks_parameters_for_login() {
    let app = TestApp::with_options(ServiceOptions {
        login_url: Some("https://login.example.test/signin".to_string()),
        ..ServiceOptions::default()
    });
    let router = app.router();

    let response = send(
        &router,
        json_request(
            "POST",
            "/reviews?_redirect=1",
            None,
            &json!({"bookId": "b", "rating": 4}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("redirect should carry a location");
    assert!(location.starts_with("https://login.example.test/signin?paramsKey="));
}

#[tokio::test]
async fn share_token_header_grants_a_pinned_read() {
    let app = TestApp::new();
    let router = app.router();
    let owner = app.token("owner", None);
    let created = json_body(
        send(
            &router,
            json_request(
                "POST",
                "/recommendations",
                Some(&owner),
                &json!({"userId": "owner", "bookIds": ["b1"]}),
            ),
        )
        .await,
    )
    .await;
    let id = created["recommendation"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let share = app.share_token(&["getRecommendation"], Some(&id));

    let request = axum::http::Request::builder()
        .uri(format!("/recommendations/{id}"))
        .header("x-share-token", share.as_str())
        .body(axum::body::Body::empty())
        .expect("request should build");
    let response = send(&router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let request = axum::http::Request::builder()
        .uri("/recommendations/another-id")
        .header("x-share-token", share.as_str())
        .body(axum::body::Body::empty())
        .expect("request should build");
    let response = send(&router, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_probes_answer_no_content() {
    let app = TestApp::new();
    let router = app.router();
    for uri in ["/health", "/health/db"] {
        let response = send(&router, get_request(uri, None)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT, "{uri}");
    }
}

use super::test_app;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use backstage_core::TokenFamily;
use serde_json::json;

#[tokio::test]
async fn test_health_needs_no_token() {
    let app = test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = app.call(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_send_without_bearer_is_unauthorized() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/notifications/send")
        .header("content-type", "application/json")
        .body(Body::from(json!({"userId": "u1"}).to_string()))
        .unwrap();

    let (status, body) = app.call(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_send_with_forged_token_is_unauthorized() {
    let mut app = test_app();
    app.bearer = format!(
        "Bearer {}",
        crate::auth::generate_token("console-admin", "not-the-secret", 1).unwrap()
    );

    let (status, _) = app
        .post("/api/notifications/send", json!({"userId": "u1"}))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_send_missing_title_is_bad_request_without_provider_calls() {
    let app = test_app();
    app.tokens.add_token("u1", "d1", "fcm-token-1", TokenFamily::Fcm);

    let (status, body) = app
        .post(
            "/api/notifications/send",
            json!({"userId": "u1", "notification": {"body": "no title"}}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("title"));
    assert!(app.gateway.calls().is_empty());
    assert!(app.relay.calls().is_empty());
}

#[tokio::test]
async fn test_send_malformed_json_is_bad_request() {
    let app = test_app();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/notifications/send")
        .header("authorization", &app.bearer)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = app.call(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_send_reports_stats_per_provider() {
    let app = test_app();
    app.tokens.add_token("u1", "d1", "fcm-token-1", TokenFamily::Fcm);
    app.tokens.add_token("u2", "d2", "ExponentPushToken[abc123]", TokenFamily::Expo);

    let (status, body) = app
        .post(
            "/api/notifications/send",
            json!({
                "userIds": ["u1", "u2"],
                "notification": {"title": "Doors open", "body": "Welcome", "data": {"eventId": 7}},
                "priority": "high"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["totalSuccess"], 2);
    assert_eq!(body["stats"]["fcmSuccess"], 1);
    assert_eq!(body["stats"]["expoSuccess"], 1);
    assert_eq!(body["stats"]["totalFailure"], 0);
    assert_eq!(app.relay.sent_tokens(), vec!["ExponentPushToken[abc123]".to_string()]);
}

#[tokio::test]
async fn test_send_to_users_without_tokens_is_not_found() {
    let app = test_app();
    app.tokens.add_user("u1");

    let (status, body) = app
        .post(
            "/api/notifications/send",
            json!({"userId": "u1", "notification": {"title": "Hi", "body": "there"}}),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No active device tokens found for the given targets");
}

#[tokio::test]
async fn test_reactivate_unknown_user_is_not_found() {
    let app = test_app();

    let (status, _) = app
        .post("/api/notifications/reactivate-tokens", json!({"userId": "ghost"}))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reactivate_counts_tokens() {
    let app = test_app();
    app.tokens.add_token("u1", "d1", "fcm-a", TokenFamily::Fcm);
    app.tokens.add_token("u1", "d2", "fcm-b", TokenFamily::Fcm);
    app.tokens.set_active("u1", "fcm-a", false);

    let (status, body) = app
        .post("/api/notifications/reactivate-tokens", json!({"userId": "u1"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokensReactivated"], 1);
    assert_eq!(body["totalTokens"], 2);
    assert_eq!(app.tokens.is_active("u1", "fcm-a"), Some(true));
}

#[tokio::test]
async fn test_register_then_disable_device_token() {
    let app = test_app();

    let (status, body) = app
        .post(
            "/api/v1/device-tokens",
            json!({
                "userId": "u1",
                "deviceId": "phone",
                "token": "ExponentPushToken[xyz]",
                "platform": "ios"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokenType"], "expo");

    let (status, body) = app
        .post("/api/v1/device-tokens/disable", json!({"userId": "u1", "deviceId": "phone"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokensDeactivated"], 1);
    assert_eq!(app.tokens.is_active("u1", "ExponentPushToken[xyz]"), Some(false));
}

#[tokio::test]
async fn test_register_requires_device_id() {
    let app = test_app();

    let (status, body) = app
        .post(
            "/api/v1/device-tokens",
            json!({"userId": "u1", "token": "fcm-a", "platform": "android"}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "deviceId is required");
}

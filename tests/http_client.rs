//! HTTP game API client against a local mock server.

use giftcode_redeemer::api::{Challenge, Endpoint, GameApi, HttpGameApi, Session};
use giftcode_redeemer::common::config::ApiConfig;
use giftcode_redeemer::common::error::ApiError;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer) -> HttpGameApi {
    let config = ApiConfig {
        primary_player_url: format!("{}/api/player", server.uri()),
        secondary_player_url: format!("{}/report/player", server.uri()),
        captcha_url: format!("{}/api/captcha", server.uri()),
        gift_code_url: format!("{}/api/gift_code", server.uri()),
        origin: "https://giftcode.example".to_string(),
        secret: "test-secret".to_string(),
        request_timeout_secs: 5,
    };
    HttpGameApi::new(config).unwrap()
}

#[tokio::test]
async fn test_login_returns_nickname() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/player"))
        .and(header("origin", "https://giftcode.example"))
        .and(body_string_contains("fid=42"))
        .and(body_string_contains("sign="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "success",
            "data": { "fid": 42, "nickname": "Frost" },
            "err_code": ""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let session = api.login(Endpoint::Primary, 42).await.unwrap();
    assert_eq!(session.account, 42);
    assert_eq!(session.nickname, "Frost");
}

#[tokio::test]
async fn test_login_uses_secondary_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report/player"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "success",
            "data": { "nickname": "Ember" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let session = api.login(Endpoint::Secondary, 7).await.unwrap();
    assert_eq!(session.nickname, "Ember");
}

#[tokio::test]
async fn test_login_rate_limited_and_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/player"))
        .and(body_string_contains("fid=1"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/report/player"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "msg": "role not exist.",
            "err_code": 40004
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    assert!(matches!(
        api.login(Endpoint::Primary, 1).await,
        Err(ApiError::RateLimited)
    ));
    match api.login(Endpoint::Secondary, 1).await {
        Err(ApiError::Rejected { message, err_code }) => {
            assert_eq!(message, "role not exist.");
            assert_eq!(err_code, Some(40004));
        }
        other => panic!("unexpected login result: {:?}", other.map(|s| s.nickname)),
    }
}

#[tokio::test]
async fn test_server_error_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/player"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let api = api_for(&server);
    assert!(matches!(
        api.login(Endpoint::Primary, 3).await,
        Err(ApiError::Status(503))
    ));
}

#[tokio::test]
async fn test_fetch_challenge_image_and_too_frequent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/captcha"))
        .and(body_string_contains("fid=5"))
        .and(body_string_contains("init=0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "SUCCESS",
            "data": { "img": "data:image/jpeg;base64,aGVsbG8=" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/captcha"))
        .and(body_string_contains("fid=6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "msg": "CAPTCHA GET TOO FREQUENT.",
            "data": {}
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    match api
        .fetch_challenge(&Session::detached(5, "Frost"))
        .await
        .unwrap()
    {
        Challenge::Image(bytes) => assert_eq!(bytes, b"hello"),
        Challenge::TooFrequent => panic!("expected an image"),
    }
    assert!(matches!(
        api.fetch_challenge(&Session::detached(6, "Ember"))
            .await
            .unwrap(),
        Challenge::TooFrequent
    ));
}

#[tokio::test]
async fn test_submit_reply_carries_err_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/gift_code"))
        .and(body_string_contains("cdk=SPRING24"))
        .and(body_string_contains("captcha_code=AB12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "msg": "RECEIVED.",
            "data": [],
            "err_code": 40008
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let reply = api
        .submit_code(&Session::detached(42, "Frost"), "SPRING24", "AB12")
        .await
        .unwrap();
    assert_eq!(reply.msg, "RECEIVED.");
    assert_eq!(reply.err_code, Some(40008));
}

#[tokio::test]
async fn test_probe_counts_429_as_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/player"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/report/player"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let api = api_for(&server);
    assert!(api.probe(Endpoint::Primary, 46765089).await);
    assert!(!api.probe(Endpoint::Secondary, 46765089).await);
}

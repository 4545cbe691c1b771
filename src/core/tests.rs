use super::http::*;
use super::*;
use crate::app::{AccessTokenManager, AppErrorCode};
use crate::testing::{Outcome, ScriptedCredential};
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_send_buffers_json_response() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/form")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("grant_type=refresh_token&scope=a+b%2Fc");
        then.status(200)
            .header("content-type", "application/json")
            .header("cache-control", "max-age=60")
            .json_body(json!({ "ok": true }));
    });

    let response = HttpClient::new()
        .send(
            HttpRequest::post(server.url("/form"))
                .form(&[("grant_type", "refresh_token"), ("scope", "a b/c")])
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    mock.assert();
    assert!(response.is_json());
    assert_eq!(response.data, Some(json!({ "ok": true })));
    assert_eq!(response.header("cache-control"), Some("max-age=60"));
}

#[tokio::test]
async fn test_send_surfaces_error_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404)
            .header("content-type", "application/json")
            .json_body(json!({ "error": { "message": "Not here" } }));
    });

    let err = HttpClient::new()
        .send(HttpRequest::get(server.url("/missing")))
        .await
        .unwrap_err();

    match err {
        HttpClientError::Http(http_err) => {
            assert_eq!(http_err.response.status.as_u16(), 404);
            assert_eq!(provider_error_detail(&http_err.response).as_deref(), Some("Not here"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_authorized_client_attaches_bearer_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/resource")
            .header("authorization", "Bearer token-1");
        then.status(200).body("ok");
    });

    let credential = Arc::new(ScriptedCredential::new(Outcome::Token(3600)));
    let tokens = AccessTokenManager::new(credential.clone());
    let client = HttpClient::authorized(tokens, Duration::from_secs(5));

    for _ in 0..2 {
        let response = client.send(HttpRequest::get(server.url("/resource"))).await.unwrap();
        assert_eq!(response.text, "ok");
        assert!(!response.is_json());
    }

    mock.assert_calls(2);
    assert_eq!(credential.calls(), 1);
}

#[tokio::test]
async fn test_authorized_client_fails_without_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/resource");
        then.status(200);
    });

    let credential = Arc::new(ScriptedCredential::new(Outcome::Fail("no network".into())));
    let client = HttpClient::authorized(AccessTokenManager::new(credential), Duration::from_secs(5));

    let err = client.send(HttpRequest::get(server.url("/resource"))).await.unwrap_err();

    assert!(matches!(err, HttpClientError::MiddlewareError(_)));
    assert!(err.to_string().contains(AppErrorCode::TokenFetchFailed.as_str()));
    mock.assert_calls(0);
}

#[test]
fn test_provider_error_message() {
    let error: ProviderErrorResponse = serde_json::from_value(json!({
        "error": "invalid_grant",
        "error_description": "Token has been expired or revoked."
    }))
    .unwrap();
    assert_eq!(error.display_message(), "invalid_grant (Token has been expired or revoked.)");

    let error: ProviderErrorResponse =
        serde_json::from_value(json!({ "error": { "code": 400, "message": "Bad request" } })).unwrap();
    assert_eq!(error.display_message(), "Bad request");
}

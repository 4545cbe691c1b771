use super::*;
use crate::testing::PRIVATE_KEY;
use httpmock::prelude::*;
use serde_json::json;
use yup_oauth2::ServiceAccountKey;

fn service_account_key(token_uri: String) -> ServiceAccountKey {
    ServiceAccountKey {
        key_type: Some("service_account".to_string()),
        project_id: Some("test-project".to_string()),
        private_key_id: Some("key-id".to_string()),
        private_key: PRIVATE_KEY.to_string(),
        client_email: "test@test-project.iam.gserviceaccount.com".to_string(),
        client_id: None,
        auth_uri: None,
        token_uri,
        auth_provider_x509_cert_url: None,
        client_x509_cert_url: None,
    }
}

fn refresh_token_secret() -> RefreshTokenSecret {
    RefreshTokenSecret {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        refresh_token: "refresh-token".to_string(),
        key_type: Some("authorized_user".to_string()),
    }
}

#[tokio::test]
async fn test_service_account_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer")
            .body_contains("assertion=");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "access_token": "sa-token",
                "expires_in": 3600,
                "token_type": "Bearer"
            }));
    });

    let credential = ServiceAccountCredential::new(service_account_key(server.url("/token"))).unwrap();
    let token = credential.get_access_token().await.unwrap();

    mock.assert();
    assert_eq!(token.access_token, "sa-token");
    assert_eq!(token.expires_in, 3600);
    assert_eq!(credential.project_id().as_deref(), Some("test-project"));
}

#[test]
fn test_service_account_validation() {
    let mut key = service_account_key("https://oauth2.googleapis.com/token".to_string());
    key.client_email = String::new();
    let err = ServiceAccountCredential::new(key).unwrap_err();
    assert_eq!(err.code(), AppErrorCode::InvalidCredential);

    let mut key = service_account_key("https://oauth2.googleapis.com/token".to_string());
    key.private_key = "not a key".to_string();
    let err = ServiceAccountCredential::new(key).unwrap_err();
    assert_eq!(err.code(), AppErrorCode::InvalidCredential);
}

#[test]
fn test_debug_output_redacts_secrets() {
    let credential =
        ServiceAccountCredential::new(service_account_key("https://oauth2.googleapis.com/token".to_string()))
            .unwrap();
    let debug = format!("{:?}", credential);
    assert!(debug.contains("[REDACTED]"));
    assert!(!debug.contains("BEGIN PRIVATE KEY"));

    let credential = RefreshTokenCredential::new(refresh_token_secret()).unwrap();
    let debug = format!("{:?}", credential);
    assert!(!debug.contains("client-secret"));
    assert!(!debug.contains("refresh-token"));
}

#[tokio::test]
async fn test_refresh_token_credential() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/oauth2/token")
            .body_contains("grant_type=refresh_token")
            .body_contains("refresh_token=refresh-token")
            .body_contains("client_id=client-id");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "access_token": "user-token", "expires_in": 1800 }));
    });

    let credential = RefreshTokenCredential::new(refresh_token_secret())
        .unwrap()
        .with_token_url(server.url("/oauth2/token"));
    let token = credential.get_access_token().await.unwrap();

    mock.assert();
    assert_eq!(token.access_token, "user-token");
    assert_eq!(token.expires_in, 1800);
}

#[test]
fn test_refresh_token_requires_fields() {
    let err = RefreshTokenCredential::from_json(r#"{"client_id":"id","client_secret":"secret"}"#)
        .unwrap_err();
    assert_eq!(err.code(), AppErrorCode::InvalidCredential);
    assert!(err.message().contains("refresh_token"));
}

#[tokio::test]
async fn test_compute_engine_credential() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/computeMetadata/v1/instance/service-accounts/default/token")
            .header("metadata-flavor", "Google");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "access_token": "gce-token", "expires_in": 3599 }));
    });

    let credential = ComputeEngineCredential::new().with_token_url(
        server.url("/computeMetadata/v1/instance/service-accounts/default/token"),
    );
    let token = credential.get_access_token().await.unwrap();

    mock.assert();
    assert_eq!(token.access_token, "gce-token");
    assert_eq!(credential.project_id(), None);
}

#[tokio::test]
async fn test_malformed_token_response() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "access_token": 123 }));
    });

    let credential = ServiceAccountCredential::new(service_account_key(server.url("/token"))).unwrap();
    let err = credential.get_access_token().await.unwrap_err();

    mock.assert();
    assert!(err.is_malformed_token());
    assert_eq!(
        err.to_string(),
        "Unexpected response while fetching access token: {\"access_token\":123}"
    );
}

#[tokio::test]
async fn test_token_endpoint_error_detail() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({
                "error": "invalid_grant",
                "error_description": "Invalid JWT Signature."
            }));
    });

    let credential = ServiceAccountCredential::new(service_account_key(server.url("/token"))).unwrap();
    let err = credential.get_access_token().await.unwrap_err();

    mock.assert();
    assert!(!err.is_malformed_token());
    assert_eq!(
        err.to_string(),
        "Error fetching access token: invalid_grant (Invalid JWT Signature.)"
    );
}

#[tokio::test]
async fn test_token_endpoint_error_without_json() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/plain");
        then.status(401).body("access denied");
    });
    server.mock(|when, then| {
        when.method(POST).path("/empty");
        then.status(403);
    });

    let credential = RefreshTokenCredential::new(refresh_token_secret())
        .unwrap()
        .with_token_url(server.url("/plain"));
    let err = credential.get_access_token().await.unwrap_err();
    assert_eq!(err.to_string(), "Error fetching access token: access denied");

    let credential = RefreshTokenCredential::new(refresh_token_secret())
        .unwrap()
        .with_token_url(server.url("/empty"));
    let err = credential.get_access_token().await.unwrap_err();
    assert_eq!(err.to_string(), "Error fetching access token: Missing error payload");
}

#[tokio::test]
async fn test_emulator_admin_credential() {
    let token = EmulatorAdminCredential.get_access_token().await.unwrap();
    assert_eq!(token.access_token, "owner");
    assert_eq!(token.expires_in, 1_000_000);
}

#[test]
fn test_credential_from_json_dispatch() {
    let authorized_user = json!({
        "type": "authorized_user",
        "client_id": "id",
        "client_secret": "secret",
        "refresh_token": "token"
    });
    assert!(credential_from_json(&authorized_user.to_string()).is_ok());

    let service_account = json!({
        "type": "service_account",
        "project_id": "json-project",
        "private_key_id": "key-id",
        "private_key": PRIVATE_KEY,
        "client_email": "test@json-project.iam.gserviceaccount.com",
        "token_uri": "https://oauth2.googleapis.com/token"
    });
    let credential = credential_from_json(&service_account.to_string()).unwrap();
    assert_eq!(credential.project_id().as_deref(), Some("json-project"));

    let err = credential_from_json(r#"{"type":"external_account"}"#).err().unwrap();
    assert_eq!(err.code(), AppErrorCode::InvalidCredential);

    let err = credential_from_json("not json").err().unwrap();
    assert_eq!(err.code(), AppErrorCode::InvalidCredential);
}

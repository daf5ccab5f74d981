use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use scc_auth::{
    config::GoogleConfig,
    models::ClientMetadata,
    repositories::{CredentialStore, SqliteCredentialStore},
    services::{email_service::SentEmail, AuthError},
    test_utils::test_helpers::{self, TestApp, UnreachableEtLab},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn app_with_google(server: &MockServer) -> TestApp {
    let mut google = GoogleConfig::new(
        "client-1",
        "client-secret",
        "http://localhost:8787/auth/google/callback",
    );
    google.token_url = format!("{}/token", server.uri());
    google.userinfo_url = format!("{}/userinfo", server.uri());

    TestApp::build(
        move |config| config.google = Some(google),
        Arc::new(UnreachableEtLab),
    )
    .await
    .unwrap()
}

async fn mount_google(server: &MockServer, user_info: Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "google-access",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer google-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_info))
        .mount(server)
        .await;
}

fn gina() -> Value {
    json!({
        "id": "google-1",
        "email": "Gina@X.com",
        "verified_email": true,
        "name": "Gina",
        "picture": "https://lh3.test/gina.jpg"
    })
}

#[tokio::test]
async fn test_callback_creates_new_user() {
    let server = MockServer::start().await;
    mount_google(&server, gina()).await;
    let app = app_with_google(&server).await;

    let login = app
        .state
        .auth_service
        .google_callback(Some("auth-code"), Some("state-1"), &ClientMetadata::default())
        .await
        .unwrap();

    assert!(login.is_new_user);
    assert_eq!(login.session.user.email, "gina@x.com");
    assert_eq!(login.session.user.google_id.as_deref(), Some("google-1"));
    assert!(!login.session.user.has_password);
    assert_eq!(
        login.session.user.profile_photo_url.as_deref(),
        Some("https://lh3.test/gina.jpg")
    );
    assert_eq!(
        app.email.sent().await,
        vec![SentEmail::Welcome {
            to: "gina@x.com".to_string(),
            name: "Gina".to_string(),
        }]
    );

    // Signing in again resolves the same account by google id
    let again = app
        .state
        .auth_service
        .google_callback(Some("auth-code"), Some("state-2"), &ClientMetadata::default())
        .await
        .unwrap();
    assert!(!again.is_new_user);
    assert_eq!(again.session.user.id, login.session.user.id);
}

#[tokio::test]
async fn test_callback_links_existing_email() {
    let server = MockServer::start().await;
    mount_google(&server, gina()).await;
    let app = app_with_google(&server).await;
    let existing =
        test_helpers::insert_test_user(&app.pool, "gina@x.com", "Old Name", Some("password1"))
            .await
            .unwrap();

    let login = app
        .state
        .auth_service
        .google_callback(Some("auth-code"), Some("state"), &ClientMetadata::default())
        .await
        .unwrap();

    assert!(!login.is_new_user);
    assert_eq!(login.session.user.id, existing.id);
    assert_eq!(login.session.user.name, "Gina");
    assert!(login.session.user.has_password);
    assert_eq!(
        login.session.user.profile_photo_url.as_deref(),
        Some("https://lh3.test/gina.jpg")
    );
    assert!(app.email.sent().await.is_empty());
}

#[tokio::test]
async fn test_callback_requires_code_and_state() {
    let server = MockServer::start().await;
    let app = app_with_google(&server).await;
    let auth = &app.state.auth_service;
    let meta = ClientMetadata::default();

    for (code, state) in [(None, Some("s")), (Some("c"), None), (Some(""), Some("s"))] {
        assert!(matches!(
            auth.google_callback(code, state, &meta).await,
            Err(AuthError::MissingOAuthParams)
        ));
    }
}

#[tokio::test]
async fn test_failed_exchange_and_userinfo() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .mount(&server)
        .await;
    let app = app_with_google(&server).await;
    assert!(matches!(
        app.state
            .auth_service
            .google_callback(Some("bad"), Some("s"), &ClientMetadata::default())
            .await,
        Err(AuthError::GoogleTokenExchange)
    ));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "t" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let app = app_with_google(&server).await;
    assert!(matches!(
        app.state
            .auth_service
            .google_callback(Some("code"), Some("s"), &ClientMetadata::default())
            .await,
        Err(AuthError::GoogleUserInfo)
    ));
}

#[tokio::test]
async fn test_disconnect_requires_password() {
    let server = MockServer::start().await;
    mount_google(&server, gina()).await;
    let app = app_with_google(&server).await;
    let store = SqliteCredentialStore::new(app.pool.clone());
    let auth = &app.state.auth_service;

    let login = auth
        .google_callback(Some("auth-code"), Some("s"), &ClientMetadata::default())
        .await
        .unwrap();
    let user = store
        .find_user_by_id(&login.session.user.id)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        auth.disconnect_google(&user).await,
        Err(AuthError::PasswordRequired)
    ));

    // Once a password exists the Google link can go
    let linked = test_helpers::insert_test_user(&app.pool, "both@x.com", "Both", Some("password1"))
        .await
        .unwrap();
    let linked = store
        .update_user(
            &linked.id,
            scc_auth::models::UserPatch {
                google_id: Some(Some("google-2".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let updated = auth.disconnect_google(&linked).await.unwrap();
    assert_eq!(updated.google_id, None);
    assert!(matches!(
        auth.disconnect_google(&store.find_user_by_id(&linked.id).await.unwrap().unwrap())
            .await,
        Err(AuthError::GoogleNotLinked)
    ));
}

#[tokio::test]
async fn test_initiate_builds_consent_url() {
    let server = MockServer::start().await;
    let app = app_with_google(&server).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/auth/google?signup=true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    let auth_url = json["data"]["auth_url"].as_str().unwrap();
    let state = json["data"]["state"].as_str().unwrap();

    assert!(auth_url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
    assert!(auth_url.contains("client_id=client-1"));
    assert!(auth_url.contains("response_type=code"));
    assert!(auth_url.contains("prompt=select_account"));
    assert!(auth_url.contains(&format!("state={}", state)));
}

#[tokio::test]
async fn test_unconfigured_google_answers_500() {
    let app = TestApp::new().await.unwrap();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/auth/google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Google OAuth not configured");
}

use scc_auth::services::email_service::{
    BrevoEmailService, EmailError, EmailService, PasswordResetEmail,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn brevo(server: &MockServer) -> BrevoEmailService {
    BrevoEmailService::new("brevo-key", "https://club.test")
        .unwrap()
        .with_api_url(&server.uri())
}

#[tokio::test]
async fn test_brevo_welcome_email_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/smtp/email"))
        .and(header("api-key", "brevo-key"))
        .and(body_partial_json(json!({
            "to": [{ "email": "a@x.com", "name": "Ann" }],
            "subject": "🎉 Welcome to SCT Coding Club!"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "messageId": "m-1" })))
        .expect(1)
        .mount(&server)
        .await;

    brevo(&server)
        .send_welcome_email("a@x.com", "Ann")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_brevo_reset_email_carries_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/smtp/email"))
        .and(body_partial_json(json!({
            "to": [{ "email": "b@x.com", "name": "Bo" }],
            "subject": "🔐 Password Reset Request - SCT Coding Club"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    brevo(&server)
        .send_password_reset_email(PasswordResetEmail {
            to_email: "b@x.com".to_string(),
            name: "Bo".to_string(),
            reset_token: "reset-1".to_string(),
            expires_in_minutes: 15,
            first_time_setup: false,
        })
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body["htmlContent"]
        .as_str()
        .unwrap()
        .contains("https://club.test/reset-password?token=reset-1"));
}

#[tokio::test]
async fn test_brevo_rejection_is_send_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/smtp/email"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let result = brevo(&server).send_welcome_email("a@x.com", "Ann").await;
    assert!(matches!(result, Err(EmailError::SendFailed(msg)) if msg.contains("401")));
}

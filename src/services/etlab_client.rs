//! Client for the EtLab student portal.
//!
//! Verification is two calls: `POST /androidapp/app/login` with the student's
//! credentials, then `POST /androidapp/app/getstudentdetails` with the bearer
//! token it returns. Each call is abandoned after the configured timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::EtLabConfig;

/// Student profile assembled from the portal's login and details responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtLabProfile {
    pub admission_no: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub batch: Option<String>,
    pub register_no: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
}

/// Every way a verification attempt can end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtLabOutcome {
    Success(EtLabProfile),
    InvalidCredentials,
    NetworkError,
    ApiError,
    ErrorFetchingData,
    TimeoutError,
}

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> EtLabOutcome;
}

pub struct EtLabClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl EtLabClient {
    pub fn new(config: &EtLabConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    /// Sends one request under the timeout. Dropping the future on timeout
    /// cancels the in-flight request.
    async fn post(
        &self,
        path: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, EtLabOutcome> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => Err(EtLabOutcome::TimeoutError),
            Ok(Err(e)) if e.is_timeout() => Err(EtLabOutcome::TimeoutError),
            Ok(Err(e)) => {
                tracing::error!("EtLab request to {} failed: {}", path, e);
                Err(EtLabOutcome::NetworkError)
            }
            Ok(Ok(response)) => Ok(response),
        }
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, EtLabOutcome> {
        match tokio::time::timeout(self.timeout, response.json::<Value>()).await {
            Err(_) => Err(EtLabOutcome::TimeoutError),
            Ok(Err(e)) => {
                tracing::error!("Unreadable EtLab response: {}", e);
                Err(EtLabOutcome::NetworkError)
            }
            Ok(Ok(value)) => Ok(value),
        }
    }

    async fn run(&self, username: &str, password: &str) -> Result<EtLabProfile, EtLabOutcome> {
        let login_response = self
            .post(
                "/androidapp/app/login",
                json!({ "username": username, "password": password }),
                None,
            )
            .await?;
        if !login_response.status().is_success() {
            tracing::warn!("EtLab login returned {}", login_response.status());
            return Err(EtLabOutcome::NetworkError);
        }

        let login = self.read_json(login_response).await?;
        if !is_logged_in(&login) {
            return Err(EtLabOutcome::InvalidCredentials);
        }
        let access_token = text(&login, "access_token").ok_or(EtLabOutcome::ApiError)?;

        let details_response = self
            .post(
                "/androidapp/app/getstudentdetails",
                json!({}),
                Some(&access_token),
            )
            .await?;
        if !details_response.status().is_success() {
            tracing::warn!("EtLab details returned {}", details_response.status());
            return Err(EtLabOutcome::ApiError);
        }

        let details = self.read_json(details_response).await?;
        if !is_logged_in(&details) {
            return Err(EtLabOutcome::ErrorFetchingData);
        }

        Ok(assemble_profile(&login, &details))
    }
}

#[async_trait]
impl IdentityVerifier for EtLabClient {
    async fn verify(&self, username: &str, password: &str) -> EtLabOutcome {
        match self.run(username, password).await {
            Ok(profile) => EtLabOutcome::Success(profile),
            Err(outcome) => outcome,
        }
    }
}

fn is_logged_in(value: &Value) -> bool {
    match value.get("login") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// A field as a non-empty string; numbers are rendered in decimal.
fn text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_of(candidates: &[(&Value, &str)]) -> Option<String> {
    candidates.iter().find_map(|(value, key)| text(value, key))
}

fn assemble_profile(login: &Value, details: &Value) -> EtLabProfile {
    EtLabProfile {
        admission_no: first_of(&[(details, "admission_no"), (login, "uname")]),
        name: first_of(&[(details, "name"), (login, "profile_name")]),
        email: text(details, "email"),
        batch: first_of(&[
            (login, "course"),
            (login, "academic_year"),
            (login, "end_year"),
        ]),
        register_no: text(details, "register_no"),
        phone: first_of(&[
            (details, "phone_home"),
            (details, "phone_father"),
            (details, "phone_mother"),
        ]),
        photo_url: text(login, "url"),
    }
}

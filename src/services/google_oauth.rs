use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::GoogleConfig;

#[derive(Debug, thiserror::Error)]
pub enum GoogleOAuthError {
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),
    #[error("Userinfo request failed: {0}")]
    UserInfo(String),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleUserInfo {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub verified_email: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub state: String,
}

/// Authorization-code flow against Google's OAuth 2.0 endpoints.
pub struct GoogleOAuthClient {
    client: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleOAuthClient {
    pub fn new(config: GoogleConfig) -> Result<Self, GoogleOAuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    /// Builds the consent-screen URL with a fresh random `state`.
    /// `signup` forces the account chooser.
    pub fn authorization_url(&self, signup: bool) -> AuthorizationRequest {
        let state = Uuid::new_v4().to_string();
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("state", state.as_str()),
            ("access_type", "online"),
        ];
        if signup {
            params.push(("prompt", "select_account"));
        }

        let query = serde_urlencoded::to_string(&params).unwrap_or_default();
        AuthorizationRequest {
            auth_url: format!("{}?{}", self.config.auth_url, query),
            state,
        }
    }

    pub async fn exchange_code(&self, code: &str) -> Result<GoogleTokenResponse, GoogleOAuthError> {
        let form = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let body = serde_urlencoded::to_string(form)
            .map_err(|e| GoogleOAuthError::TokenExchange(e.to_string()))?;

        let response = self
            .client
            .post(&self.config.token_url)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| GoogleOAuthError::TokenExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GoogleOAuthError::TokenExchange(format!("{}: {}", status, text)));
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| GoogleOAuthError::TokenExchange(e.to_string()))
    }

    pub async fn fetch_user_info(&self, access_token: &str) -> Result<GoogleUserInfo, GoogleOAuthError> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| GoogleOAuthError::UserInfo(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GoogleOAuthError::UserInfo(response.status().to_string()));
        }

        response
            .json::<GoogleUserInfo>()
            .await
            .map_err(|e| GoogleOAuthError::UserInfo(e.to_string()))
    }
}

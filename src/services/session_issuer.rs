use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::{ClientMetadata, PublicUser, RefreshToken, User};
use crate::repositories::{CredentialStore, RepositoryError};
use crate::services::token_codec::{hash_token, TokenCodec, TokenError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Token pair handed out by every login path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: PublicUser,
}

/// Issues access/refresh token pairs and records the refresh token digest.
pub struct SessionIssuer {
    store: Arc<dyn CredentialStore>,
    codec: TokenCodec,
    access_token_ttl: i64,
    refresh_token_ttl: i64,
}

impl SessionIssuer {
    pub fn new(store: Arc<dyn CredentialStore>, codec: TokenCodec, config: &AuthConfig) -> Self {
        Self {
            store,
            codec,
            access_token_ttl: config.access_token_ttl,
            refresh_token_ttl: config.refresh_token_ttl,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn access_token_ttl(&self) -> i64 {
        self.access_token_ttl
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, TokenError> {
        self.codec.issue_access_token(
            &user.id,
            &user.email,
            user.phone.as_deref(),
            &user.name,
            self.access_token_ttl,
        )
    }

    pub async fn start_session(
        &self,
        user: &User,
        metadata: &ClientMetadata,
    ) -> Result<AuthSession, SessionError> {
        let now = Utc::now().timestamp();
        let access_token = self.issue_access_token(user)?;
        let refresh_token =
            self.codec
                .issue_refresh_token_at(&user.id, self.refresh_token_ttl, now)?;

        self.store
            .insert_refresh_token(RefreshToken {
                id: Uuid::new_v4().to_string(),
                user_id: user.id.clone(),
                token_hash: hash_token(&refresh_token),
                expires_at: now + self.refresh_token_ttl,
                created_at: now,
                last_used_at: None,
                ip_address: metadata.ip_address.clone(),
                user_agent: metadata.user_agent.clone(),
            })
            .await?;

        tracing::info!("Started session for user {}", user.id);

        Ok(AuthSession {
            access_token,
            refresh_token,
            expires_in: self.access_token_ttl,
            user: PublicUser::from(user),
        })
    }
}

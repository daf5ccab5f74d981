//! Passkey registration and login ceremonies.
//!
//! The server issues a challenge, the client authenticator echoes it inside
//! `clientDataJSON`, and the verify step consumes that challenge exactly once.
//! Attestation and assertion signatures are not checked: the stored
//! `public_key` is the client's attestation object kept as-is. This trust
//! model is not suitable for production use.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{AuthConfig, RelyingParty};
use crate::models::{
    ChallengeKind, ChallengeRecord, ClientMetadata, PasskeyCredential, PasskeySummary, User,
};
use crate::repositories::{CredentialStore, RepositoryError};
use crate::services::auth_service::normalize_email;
use crate::services::challenge_broker::{ChallengeBroker, ChallengeError};
use crate::services::session_issuer::{AuthSession, SessionError, SessionIssuer};

const ES256: i64 = -7;
const RS256: i64 = -257;

#[derive(Debug, thiserror::Error)]
pub enum PasskeyError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid or expired challenge")]
    InvalidChallenge,
    #[error("This passkey is already registered")]
    AlreadyRegistered,
    #[error("User not found")]
    UserNotFound,
    #[error("No passkeys registered for this user")]
    NoPasskeys,
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Email mismatch")]
    EmailMismatch,
    #[error("Passkey not found")]
    PasskeyNotFound,
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Authenticator response as serialised by the browser.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatorResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject", default)]
    pub attestation_object: Option<String>,
    #[serde(default)]
    pub transports: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicKeyCredential {
    pub id: String,
    pub response: AuthenticatorResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelyingPartyEntity {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialParameter {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

impl From<&PasskeyCredential> for CredentialDescriptor {
    fn from(credential: &PasskeyCredential) -> Self {
        Self {
            credential_type: "public-key".to_string(),
            id: credential.credential_id.clone(),
            transports: credential.transports.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: String,
    pub user_verification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String,
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<CredentialParameter>,
    pub timeout: u64,
    pub attestation: String,
    pub authenticator_selection: AuthenticatorSelection,
    pub exclude_credentials: Vec<CredentialDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginOptions {
    pub challenge: String,
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisteredPasskey {
    pub id: String,
    pub credential_id: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientData {
    challenge: String,
}

pub struct PasskeyService {
    store: Arc<dyn CredentialStore>,
    sessions: Arc<SessionIssuer>,
    challenges: Arc<ChallengeBroker>,
    relying_party: RelyingParty,
    challenge_ttl: i64,
    timeout_ms: u64,
}

impl PasskeyService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        sessions: Arc<SessionIssuer>,
        challenges: Arc<ChallengeBroker>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            challenges,
            relying_party: config.relying_party.clone(),
            challenge_ttl: config.passkey_challenge_ttl,
            timeout_ms: config.passkey_timeout_ms,
        }
    }

    pub async fn registration_start(
        &self,
        user: &User,
    ) -> Result<RegistrationOptions, PasskeyError> {
        let existing = self
            .store
            .list_passkey_credentials_for_user(&user.id)
            .await?;
        let challenge = self
            .challenges
            .issue(
                ChallengeKind::PasskeyRegister,
                Some(&user.id),
                self.challenge_ttl,
            )
            .await?;

        Ok(RegistrationOptions {
            challenge,
            rp: RelyingPartyEntity {
                name: self.relying_party.name.clone(),
                id: self.relying_party.id.clone(),
            },
            user: UserEntity {
                id: URL_SAFE_NO_PAD.encode(user.id.as_bytes()),
                name: user.email.clone(),
                display_name: user.name.clone(),
            },
            pub_key_cred_params: [ES256, RS256]
                .into_iter()
                .map(|alg| CredentialParameter {
                    credential_type: "public-key".to_string(),
                    alg,
                })
                .collect(),
            timeout: self.timeout_ms,
            attestation: "none".to_string(),
            authenticator_selection: AuthenticatorSelection {
                resident_key: "preferred".to_string(),
                user_verification: "preferred".to_string(),
            },
            exclude_credentials: existing.iter().map(CredentialDescriptor::from).collect(),
        })
    }

    pub async fn registration_verify(
        &self,
        user: &User,
        credential: PublicKeyCredential,
        device_name: Option<String>,
    ) -> Result<RegisteredPasskey, PasskeyError> {
        if credential.id.trim().is_empty() {
            return Err(PasskeyError::Validation("Credential id is required".to_string()));
        }
        let public_key = credential
            .response
            .attestation_object
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| PasskeyError::Validation("Missing attestation object".to_string()))?;

        let record = self
            .consume_echoed(
                ChallengeKind::PasskeyRegister,
                &credential.response.client_data_json,
            )
            .await?;
        if record.user_id.as_deref() != Some(user.id.as_str()) {
            tracing::warn!("Registration challenge not bound to user {}", user.id);
            return Err(PasskeyError::InvalidChallenge);
        }

        if self
            .store
            .find_passkey_credential_by_id(&credential.id)
            .await?
            .is_some()
        {
            return Err(PasskeyError::AlreadyRegistered);
        }

        let device_name = device_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let stored = PasskeyCredential {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            credential_id: credential.id,
            public_key,
            counter: 0,
            transports: credential.response.transports,
            device_name,
            created_at: Utc::now().timestamp(),
            last_used_at: None,
        };

        self.store
            .insert_passkey_credential(stored.clone())
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => PasskeyError::AlreadyRegistered,
                other => other.into(),
            })?;

        tracing::info!("Registered passkey {} for user {}", stored.id, user.id);
        Ok(RegisteredPasskey {
            id: stored.id,
            credential_id: stored.credential_id,
            device_name: stored.device_name,
        })
    }

    pub async fn login_start(&self, email: &str) -> Result<LoginOptions, PasskeyError> {
        let user = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
            .ok_or(PasskeyError::UserNotFound)?;

        let credentials = self
            .store
            .list_passkey_credentials_for_user(&user.id)
            .await?;
        if credentials.is_empty() {
            return Err(PasskeyError::NoPasskeys);
        }

        let challenge = self
            .challenges
            .issue(ChallengeKind::PasskeyLogin, Some(&user.id), self.challenge_ttl)
            .await?;

        Ok(LoginOptions {
            challenge,
            timeout: self.timeout_ms,
            rp_id: self.relying_party.id.clone(),
            allow_credentials: credentials.iter().map(CredentialDescriptor::from).collect(),
            user_verification: "preferred".to_string(),
        })
    }

    pub async fn login_verify(
        &self,
        email: &str,
        credential: PublicKeyCredential,
        metadata: &ClientMetadata,
    ) -> Result<AuthSession, PasskeyError> {
        let record = self
            .consume_echoed(
                ChallengeKind::PasskeyLogin,
                &credential.response.client_data_json,
            )
            .await?;
        let user_id = record.user_id.ok_or(PasskeyError::InvalidChallenge)?;

        let stored = self
            .store
            .find_passkey_credential_by_id(&credential.id)
            .await?
            .filter(|c| c.user_id == user_id)
            .ok_or(PasskeyError::InvalidCredential)?;

        let user = self
            .store
            .find_user_by_id(&user_id)
            .await?
            .ok_or(PasskeyError::UserNotFound)?;
        if user.email != normalize_email(email) {
            tracing::warn!("Passkey login email mismatch for user {}", user.id);
            return Err(PasskeyError::EmailMismatch);
        }

        self.store
            .touch_passkey_credential(&stored.id, Utc::now().timestamp())
            .await?;

        tracing::info!("User {} logged in with passkey {}", user.id, stored.id);
        Ok(self.sessions.start_session(&user, metadata).await?)
    }

    pub async fn list_passkeys(&self, user: &User) -> Result<Vec<PasskeySummary>, PasskeyError> {
        Ok(self
            .store
            .list_passkey_credentials_for_user(&user.id)
            .await?
            .into_iter()
            .map(PasskeySummary::from)
            .collect())
    }

    pub async fn delete_passkey(&self, user: &User, id: &str) -> Result<(), PasskeyError> {
        self.store
            .delete_passkey_credential(&user.id, id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => PasskeyError::PasskeyNotFound,
                other => other.into(),
            })?;

        tracing::info!("User {} deleted passkey {}", user.id, id);
        Ok(())
    }

    /// Consumes the challenge echoed in `clientDataJSON`. The echo may be the
    /// issued value itself or its base64url encoding.
    async fn consume_echoed(
        &self,
        kind: ChallengeKind,
        client_data_json: &str,
    ) -> Result<ChallengeRecord, PasskeyError> {
        let echoed = echoed_challenge(client_data_json)?;

        for candidate in challenge_candidates(&echoed) {
            match self.challenges.consume(kind, &candidate).await {
                Ok(record) => return Ok(record),
                Err(ChallengeError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!("No live {} challenge matched the client data", kind);
        Err(PasskeyError::InvalidChallenge)
    }
}

fn decode_base64(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(value))
        .ok()
}

fn echoed_challenge(client_data_json: &str) -> Result<String, PasskeyError> {
    let invalid = || PasskeyError::Validation("Invalid client data".to_string());
    let bytes = decode_base64(client_data_json).ok_or_else(invalid)?;
    let client_data: ClientData = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    Ok(client_data.challenge)
}

fn challenge_candidates(echoed: &str) -> Vec<String> {
    let mut candidates = vec![echoed.to_string()];
    if let Some(decoded) = decode_base64(echoed).and_then(|b| String::from_utf8(b).ok()) {
        if decoded != echoed && !decoded.is_empty() {
            candidates.push(decoded);
        }
    }
    candidates
}

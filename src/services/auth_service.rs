use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::models::{
    ChallengeKind, ClientMetadata, NewUser, PasswordResetToken, PublicUser, User, UserPatch,
};
use crate::repositories::{CredentialStore, RepositoryError};
use crate::services::challenge_broker::{ChallengeBroker, ChallengeError};
use crate::services::email_service::{EmailService, PasswordResetEmail};
use crate::services::etlab_client::{EtLabOutcome, EtLabProfile, IdentityVerifier};
use crate::services::google_oauth::{AuthorizationRequest, GoogleOAuthClient};
use crate::services::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::services::photo_storage::{
    profile_photo_key, PhotoInput, PhotoStorage, PhotoStorageError,
};
use crate::services::session_issuer::{AuthSession, SessionError, SessionIssuer};
use crate::services::token_codec::{hash_token, TokenError};

const TEMP_ETLAB_EMAIL_DOMAIN: &str = "temp.etlab.sctce.ac.in";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already registered")]
    EmailAlreadyRegistered,
    #[error("Email already in use")]
    EmailInUse,
    #[error("No valid fields to update")]
    NothingToUpdate,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("Refresh token not found")]
    RefreshTokenNotFound,
    #[error("Refresh token expired")]
    RefreshTokenExpired,
    #[error("Invalid or expired token")]
    InvalidAccessToken,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid reset token")]
    InvalidResetToken,
    #[error("Reset token has expired")]
    ResetTokenExpired,
    #[error("Reset token has already been used")]
    ResetTokenUsed,
    #[error("Account already verified with EtLab")]
    AlreadyVerified,
    #[error("This EtLab account is already linked to another user")]
    EtLabAccountTaken,
    #[error("Invalid EtLab credentials")]
    EtLabInvalidCredentials,
    #[error("EtLab API request timeout")]
    EtLabTimeout,
    #[error("Network error connecting to EtLab")]
    EtLabUnavailable,
    #[error("Error fetching data from EtLab")]
    EtLabFailed,
    #[error("Invalid or expired signup token")]
    InvalidSignupToken,
    #[error("Account already completed")]
    AccountAlreadyCompleted,
    #[error("Google OAuth not configured")]
    GoogleNotConfigured,
    #[error("Missing authorization code or state")]
    MissingOAuthParams,
    #[error("Failed to exchange authorization code")]
    GoogleTokenExchange,
    #[error("Failed to get user info from Google")]
    GoogleUserInfo,
    #[error("No Google account linked")]
    GoogleNotLinked,
    #[error(
        "Cannot disconnect Google account. Please set a password first to maintain account access."
    )]
    PasswordRequired,
    #[error("Failed to upload profile photo")]
    PhotoUpload,
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub profile_photo: Option<String>,
    #[serde(default)]
    pub profile_photo_filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupCompletion {
    pub signup_token: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub profile_photo: Option<String>,
    #[serde(default)]
    pub profile_photo_filename: Option<String>,
}

/// Partial profile update.
///
/// `profile_photo` is tri-state: absent leaves the photo alone, `null`
/// removes it, a string replaces it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub profile_photo: Option<Option<String>>,
    #[serde(default)]
    pub profile_photo_filename: Option<String>,
}

fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub expires_in: i64,
    pub user: PublicUser,
}

/// Profile returned after linking an EtLab identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EtLabLink {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub etlab_username: Option<String>,
    pub admission_no: Option<String>,
    pub batch: Option<String>,
    pub phone: Option<String>,
    pub register_no: Option<String>,
    pub profile_photo_url: Option<String>,
    pub is_verified: bool,
}

impl EtLabLink {
    fn merge(user: &User, profile: EtLabProfile) -> Self {
        Self {
            user_id: user.id.clone(),
            name: profile.name.unwrap_or_else(|| user.name.clone()),
            email: user.email.clone(),
            etlab_username: user.etlab_username.clone(),
            admission_no: profile.admission_no,
            batch: profile.batch,
            phone: profile.phone.or_else(|| user.phone.clone()),
            register_no: profile.register_no,
            profile_photo_url: user.profile_photo_url.clone(),
            is_verified: user.is_verified,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtLabSignup {
    pub signup_token: String,
    pub requires_password: bool,
    pub user: PublicUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleLogin {
    #[serde(flatten)]
    pub session: AuthSession,
    pub is_new_user: bool,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    sessions: Arc<SessionIssuer>,
    challenges: Arc<ChallengeBroker>,
    email: Arc<dyn EmailService>,
    photos: Arc<dyn PhotoStorage>,
    etlab: Arc<dyn IdentityVerifier>,
    google: Option<GoogleOAuthClient>,
    signup_token_ttl: i64,
    password_reset_ttl: i64,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        sessions: Arc<SessionIssuer>,
        challenges: Arc<ChallengeBroker>,
        email: Arc<dyn EmailService>,
        photos: Arc<dyn PhotoStorage>,
        etlab: Arc<dyn IdentityVerifier>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            challenges,
            email,
            photos,
            etlab,
            google: None,
            signup_token_ttl: config.signup_token_ttl,
            password_reset_ttl: config.password_reset_ttl,
        }
    }

    pub fn with_google(mut self, google: GoogleOAuthClient) -> Self {
        self.google = Some(google);
        self
    }

    pub async fn signup(
        &self,
        request: SignupRequest,
        metadata: &ClientMetadata,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(&request.email);
        let name = request.name.trim().to_string();
        validate_email(&email)?;
        if name.is_empty() {
            return Err(AuthError::Validation("Name is required".to_string()));
        }
        validate_password(&request.password)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyRegistered);
        }

        let user = self
            .store
            .create_user(NewUser {
                email,
                name,
                phone: non_empty(request.phone),
                password_hash: Some(hash_password(&request.password)),
                ..Default::default()
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::EmailAlreadyRegistered,
                other => other.into(),
            })?;

        let user = match request.profile_photo.as_deref() {
            Some(photo) => {
                self.attach_photo_best_effort(user, photo, request.profile_photo_filename.as_deref())
                    .await?
            }
            None => user,
        };

        tracing::info!("New account created: {}", user.id);
        self.send_welcome_email(&user).await;

        Ok(self.sessions.start_session(&user, metadata).await?)
    }

    /// Unknown emails, password-less accounts and wrong passwords all fail
    /// with the same error.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        metadata: &ClientMetadata,
    ) -> Result<AuthSession, AuthError> {
        let user = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let matches = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));
        if !matches {
            tracing::debug!("Failed login attempt for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        tracing::info!("User {} logged in", user.id);
        Ok(self.sessions.start_session(&user, metadata).await?)
    }

    /// Issues a new access token. The refresh token itself is not rotated.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedAccess, AuthError> {
        let now = Utc::now().timestamp();
        let token_hash = hash_token(refresh_token);
        match self
            .sessions
            .codec()
            .verify_refresh_token_at(refresh_token, now)
        {
            Ok(_) => {}
            // The row outlives the JWT's own expiry unless removed here
            Err(TokenError::Expired) => {
                if let Some(record) = self.store.find_refresh_token_by_hash(&token_hash).await? {
                    self.store.delete_refresh_token(&record.id).await?;
                    tracing::debug!("Deleted expired refresh token {}", record.id);
                }
                return Err(AuthError::RefreshTokenExpired);
            }
            Err(_) => return Err(AuthError::InvalidRefreshToken),
        }

        let record = self
            .store
            .find_refresh_token_by_hash(&token_hash)
            .await?
            .ok_or(AuthError::RefreshTokenNotFound)?;

        if record.is_expired(now) {
            self.store.delete_refresh_token(&record.id).await?;
            return Err(AuthError::RefreshTokenExpired);
        }

        self.store.touch_refresh_token(&record.id, now).await?;

        let user = self
            .store
            .find_user_by_id(&record.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(RefreshedAccess {
            access_token: self.sessions.issue_access_token(&user)?,
            expires_in: self.sessions.access_token_ttl(),
            user: PublicUser::from(user),
        })
    }

    /// Resolves a bearer access token to its user.
    pub async fn authenticate(&self, access_token: &str) -> Result<User, AuthError> {
        let claims = self
            .sessions
            .codec()
            .verify_access_token(access_token)
            .map_err(|_| AuthError::InvalidAccessToken)?;

        self.store
            .find_user_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Access tokens are stateless, so there is nothing to revoke here.
    /// Clients drop their tokens.
    pub fn logout(&self, user: &User) {
        tracing::info!("User {} logged out", user.id);
    }

    /// Always succeeds so callers cannot probe which emails exist.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.store.find_user_by_email(&normalize_email(email)).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let now = Utc::now().timestamp();
        let token = generate_reset_token();
        self.store
            .insert_password_reset_token(PasswordResetToken {
                token: token.clone(),
                user_id: user.id.clone(),
                expires_at: now + self.password_reset_ttl,
                used: false,
                created_at: now,
            })
            .await?;

        let message = PasswordResetEmail {
            to_email: user.email.clone(),
            name: user.name.clone(),
            reset_token: token,
            expires_in_minutes: self.password_reset_ttl / 60,
            first_time_setup: !user.has_password(),
        };
        if let Err(e) = self.email.send_password_reset_email(message).await {
            tracing::warn!("Failed to send password reset email to user {}: {}", user.id, e);
        }

        tracing::info!("Password reset token issued for user {}", user.id);
        Ok(())
    }

    /// Sets the new password and signs the user out of every session.
    pub async fn complete_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password)?;

        let record = self
            .store
            .find_password_reset_token(token)
            .await?
            .ok_or(AuthError::InvalidResetToken)?;

        if record.is_expired(Utc::now().timestamp()) {
            return Err(AuthError::ResetTokenExpired);
        }
        if record.used {
            return Err(AuthError::ResetTokenUsed);
        }

        let revoked = self
            .store
            .redeem_password_reset_token(&record.token, &hash_password(new_password))
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AuthError::UserNotFound,
                other => other.into(),
            })?
            .ok_or(AuthError::ResetTokenUsed)?;
        tracing::info!(
            "Password reset for user {}; revoked {} refresh tokens",
            record.user_id,
            revoked
        );
        Ok(())
    }

    pub async fn update_profile(
        &self,
        user: &User,
        update: ProfileUpdate,
    ) -> Result<PublicUser, AuthError> {
        let mut patch = UserPatch {
            name: non_empty(update.name),
            phone: non_empty(update.phone).map(Some),
            ..Default::default()
        };

        if let Some(email) = non_empty(update.email).map(|e| normalize_email(&e)) {
            validate_email(&email)?;
            if let Some(owner) = self.store.find_user_by_email(&email).await? {
                if owner.id != user.id {
                    return Err(AuthError::EmailInUse);
                }
            }
            patch.email = Some(email);
        }

        let mut replaced_photo = None;
        match update.profile_photo {
            None => {}
            Some(None) => {
                patch.profile_photo_url = Some(None);
                replaced_photo = user.profile_photo_url.clone();
            }
            Some(Some(value)) => {
                let url = self
                    .store_photo(&user.id, &value, update.profile_photo_filename.as_deref())
                    .await
                    .map_err(|e| match e {
                        PhotoStorageError::InvalidData(_) => {
                            AuthError::Validation("Invalid profile photo".to_string())
                        }
                        other => {
                            tracing::error!("Profile photo upload failed: {}", other);
                            AuthError::PhotoUpload
                        }
                    })?
                    .ok_or_else(|| AuthError::Validation("Invalid profile photo".to_string()))?;
                patch.profile_photo_url = Some(Some(url));
                replaced_photo = user.profile_photo_url.clone();
            }
        }

        if patch.is_empty() {
            return Err(AuthError::NothingToUpdate);
        }

        let updated = self
            .store
            .update_user(&user.id, patch)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::EmailInUse,
                RepositoryError::NotFound => AuthError::UserNotFound,
                other => other.into(),
            })?;

        if let Some(old) = replaced_photo {
            if updated.profile_photo_url.as_deref() != Some(old.as_str()) {
                self.remove_photo(&old).await;
            }
        }

        tracing::info!("Profile updated for user {}", updated.id);
        Ok(PublicUser::from(updated))
    }

    /// Links the caller's account to an EtLab identity and marks it verified.
    pub async fn link_etlab_identity(
        &self,
        user: &User,
        username: &str,
        password: &str,
    ) -> Result<EtLabLink, AuthError> {
        let username = validate_etlab_credentials(username, password)?;

        if user.is_verified {
            return Err(AuthError::AlreadyVerified);
        }
        if let Some(owner) = self.store.find_user_by_etlab_username(username).await? {
            if owner.id != user.id {
                return Err(AuthError::EtLabAccountTaken);
            }
        }

        let profile = self.verify_with_etlab(username, password).await?;

        let mut patch = UserPatch {
            etlab_username: Some(username.to_string()),
            is_verified: Some(true),
            ..Default::default()
        };
        if user.profile_photo_url.is_none() {
            patch.profile_photo_url = profile.photo_url.clone().map(Some);
        }

        let updated = self
            .store
            .update_user(&user.id, patch)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::EtLabAccountTaken,
                other => other.into(),
            })?;

        tracing::info!("User {} linked EtLab account {}", updated.id, username);
        Ok(EtLabLink::merge(&updated, profile))
    }

    /// Signup path for students without an account session: verifies the
    /// portal credentials, finds or creates the matching user and hands out
    /// a single-use signup token for [`AuthService::complete_signup`].
    pub async fn verify_etlab_signup(
        &self,
        username: &str,
        password: &str,
    ) -> Result<EtLabSignup, AuthError> {
        let username = validate_etlab_credentials(username, password)?;
        let profile = self.verify_with_etlab(username, password).await?;
        let portal_email = profile
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());

        let existing = match self.store.find_user_by_etlab_username(username).await? {
            Some(user) => Some(user),
            None => match portal_email.as_deref() {
                Some(email) => self.store.find_user_by_email(email).await?,
                None => None,
            },
        };

        let user = match existing {
            Some(user) => {
                if user
                    .etlab_username
                    .as_deref()
                    .is_some_and(|linked| linked != username)
                {
                    return Err(AuthError::EmailInUse);
                }
                if user.etlab_username.is_some() && user.is_verified {
                    user
                } else {
                    let mut patch = UserPatch {
                        etlab_username: Some(username.to_string()),
                        is_verified: Some(true),
                        ..Default::default()
                    };
                    if user.profile_photo_url.is_none() {
                        patch.profile_photo_url = profile.photo_url.clone().map(Some);
                    }
                    self.store.update_user(&user.id, patch).await?
                }
            }
            None => {
                let email = portal_email.unwrap_or_else(|| {
                    format!(
                        "{}@{}",
                        username.to_ascii_lowercase(),
                        TEMP_ETLAB_EMAIL_DOMAIN
                    )
                });
                let user = self
                    .store
                    .create_user(NewUser {
                        email,
                        name: profile.name.clone().unwrap_or_else(|| username.to_string()),
                        phone: profile.phone.clone(),
                        etlab_username: Some(username.to_string()),
                        profile_photo_url: profile.photo_url.clone(),
                        is_verified: true,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| match e {
                        RepositoryError::Conflict(_) => AuthError::EmailInUse,
                        other => other.into(),
                    })?;
                tracing::info!("Created EtLab account {} for {}", user.id, username);
                user
            }
        };

        let signup_token = self
            .challenges
            .issue(ChallengeKind::Signup, Some(&user.id), self.signup_token_ttl)
            .await?;

        Ok(EtLabSignup {
            signup_token,
            requires_password: !user.has_password(),
            user: PublicUser::from(user),
        })
    }

    pub async fn complete_signup(
        &self,
        completion: SignupCompletion,
        metadata: &ClientMetadata,
    ) -> Result<AuthSession, AuthError> {
        validate_password(&completion.password)?;

        let record = self
            .challenges
            .consume(ChallengeKind::Signup, &completion.signup_token)
            .await
            .map_err(|e| match e {
                ChallengeError::NotFound => AuthError::InvalidSignupToken,
                other => other.into(),
            })?;
        let user_id = record.user_id.ok_or(AuthError::InvalidSignupToken)?;

        let user = self
            .store
            .find_user_by_id(&user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.has_password() {
            return Err(AuthError::AccountAlreadyCompleted);
        }

        let user = self
            .store
            .update_user(
                &user.id,
                UserPatch {
                    password_hash: Some(hash_password(&completion.password)),
                    phone: non_empty(completion.phone).map(Some),
                    ..Default::default()
                },
            )
            .await?;

        let user = match completion.profile_photo.as_deref() {
            Some(photo) => {
                self.attach_photo_best_effort(
                    user,
                    photo,
                    completion.profile_photo_filename.as_deref(),
                )
                .await?
            }
            None => user,
        };

        tracing::info!("Signup completed for user {}", user.id);
        self.send_welcome_email(&user).await;

        Ok(self.sessions.start_session(&user, metadata).await?)
    }

    pub fn google_authorization_url(&self, signup: bool) -> Result<AuthorizationRequest, AuthError> {
        let google = self.google.as_ref().ok_or(AuthError::GoogleNotConfigured)?;
        Ok(google.authorization_url(signup))
    }

    /// Resolves a Google identity to a user by google id, then by email
    /// (linking the account), else creates a new one.
    pub async fn google_callback(
        &self,
        code: Option<&str>,
        state: Option<&str>,
        metadata: &ClientMetadata,
    ) -> Result<GoogleLogin, AuthError> {
        let google = self.google.as_ref().ok_or(AuthError::GoogleNotConfigured)?;
        let code = code
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingOAuthParams)?;
        state
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingOAuthParams)?;

        let tokens = google.exchange_code(code).await.map_err(|e| {
            tracing::error!("Google token exchange failed: {}", e);
            AuthError::GoogleTokenExchange
        })?;
        let info = google
            .fetch_user_info(&tokens.access_token)
            .await
            .map_err(|e| {
                tracing::error!("Google userinfo request failed: {}", e);
                AuthError::GoogleUserInfo
            })?;

        let email = normalize_email(&info.email);
        let name = match info.name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            trimmed => trimmed.to_string(),
        };

        let (user, is_new_user) =
            if let Some(user) = self.store.find_user_by_google_id(&info.id).await? {
                (user, false)
            } else if let Some(user) = self.store.find_user_by_email(&email).await? {
                let mut patch = UserPatch {
                    google_id: Some(Some(info.id.clone())),
                    name: Some(name),
                    ..Default::default()
                };
                if user.profile_photo_url.is_none() {
                    patch.profile_photo_url = info.picture.clone().map(Some);
                }
                let linked = self.store.update_user(&user.id, patch).await?;
                tracing::info!("Linked Google account to user {}", linked.id);
                (linked, false)
            } else {
                let user = self
                    .store
                    .create_user(NewUser {
                        email,
                        name,
                        google_id: Some(info.id.clone()),
                        profile_photo_url: info.picture.clone(),
                        ..Default::default()
                    })
                    .await?;
                tracing::info!("New account created via Google: {}", user.id);
                self.send_welcome_email(&user).await;
                (user, true)
            };

        let session = self.sessions.start_session(&user, metadata).await?;
        Ok(GoogleLogin {
            session,
            is_new_user,
        })
    }

    /// Refuses to remove the last sign-in method.
    pub async fn disconnect_google(&self, user: &User) -> Result<PublicUser, AuthError> {
        if user.google_id.is_none() {
            return Err(AuthError::GoogleNotLinked);
        }
        if !user.has_password() {
            return Err(AuthError::PasswordRequired);
        }

        let updated = self
            .store
            .update_user(
                &user.id,
                UserPatch {
                    google_id: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!("User {} disconnected Google", updated.id);
        Ok(PublicUser::from(updated))
    }

    async fn verify_with_etlab(
        &self,
        username: &str,
        password: &str,
    ) -> Result<EtLabProfile, AuthError> {
        match self.etlab.verify(username, password).await {
            EtLabOutcome::Success(profile) => Ok(profile),
            EtLabOutcome::InvalidCredentials => Err(AuthError::EtLabInvalidCredentials),
            EtLabOutcome::TimeoutError => {
                tracing::error!("EtLab verification timed out for {}", username);
                Err(AuthError::EtLabTimeout)
            }
            EtLabOutcome::NetworkError => {
                tracing::error!("EtLab unreachable while verifying {}", username);
                Err(AuthError::EtLabUnavailable)
            }
            outcome @ (EtLabOutcome::ApiError | EtLabOutcome::ErrorFetchingData) => {
                tracing::error!("EtLab verification failed for {}: {:?}", username, outcome);
                Err(AuthError::EtLabFailed)
            }
        }
    }

    /// Uploads inline images; external URLs pass through. `Ok(None)` means
    /// the value was not a recognised photo.
    async fn store_photo(
        &self,
        user_id: &str,
        value: &str,
        filename: Option<&str>,
    ) -> Result<Option<String>, PhotoStorageError> {
        match PhotoInput::parse(value)? {
            None => Ok(None),
            Some(PhotoInput::External(url)) => Ok(Some(url)),
            Some(PhotoInput::Upload {
                extension,
                content_type,
                bytes,
            }) => {
                let key = profile_photo_key(
                    user_id,
                    &extension,
                    filename,
                    Utc::now().timestamp_millis(),
                );
                Ok(Some(self.photos.put(&key, bytes, &content_type).await?))
            }
        }
    }

    /// Photo failures during account creation leave the account without a photo.
    async fn attach_photo_best_effort(
        &self,
        user: User,
        photo: &str,
        filename: Option<&str>,
    ) -> Result<User, AuthError> {
        match self.store_photo(&user.id, photo, filename).await {
            Ok(Some(url)) => Ok(self
                .store
                .update_user(
                    &user.id,
                    UserPatch {
                        profile_photo_url: Some(Some(url)),
                        ..Default::default()
                    },
                )
                .await?),
            Ok(None) => {
                tracing::warn!("Ignoring unrecognised profile photo for user {}", user.id);
                Ok(user)
            }
            Err(e) => {
                tracing::warn!("Profile photo upload failed for user {}: {}", user.id, e);
                Ok(user)
            }
        }
    }

    async fn remove_photo(&self, url: &str) {
        let Some(key) = self.photos.key_for_url(url) else {
            return;
        };
        if let Err(e) = self.photos.delete(&key).await {
            tracing::warn!("Failed to delete old profile photo {}: {}", key, e);
        }
    }

    async fn send_welcome_email(&self, user: &User) {
        if let Err(e) = self.email.send_welcome_email(&user.email, &user.name).await {
            tracing::warn!("Failed to send welcome email to user {}: {}", user.id, e);
        }
    }
}

fn generate_reset_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(AuthError::Validation("Invalid email address".to_string()))
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn validate_etlab_credentials<'a>(username: &'a str, password: &str) -> Result<&'a str, AuthError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::Validation(
            "EtLab username and password are required".to_string(),
        ));
    }
    Ok(username)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::credential_repository::MockCredentialStore;
    use crate::repositories::MemoryChallengeStore;
    use crate::services::email_service::{EmailError, MockEmailService};
    use crate::services::etlab_client::MockIdentityVerifier;
    use crate::services::photo_storage::LocalPhotoStorage;
    use crate::services::token_codec::TokenCodec;
    use async_trait::async_trait;
    use mockall::predicate::*;

    fn user(password: Option<&str>, google_id: Option<&str>) -> User {
        User {
            id: "user-1".to_string(),
            email: "a@x.com".to_string(),
            name: "Ann".to_string(),
            phone: None,
            password_hash: password.map(hash_password),
            google_id: google_id.map(str::to_string),
            etlab_username: None,
            profile_photo_url: None,
            is_verified: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    struct FailingEmailService;

    #[async_trait]
    impl EmailService for FailingEmailService {
        async fn send_welcome_email(&self, _to: &str, _name: &str) -> Result<(), EmailError> {
            Err(EmailError::SendFailed("smtp down".to_string()))
        }

        async fn send_password_reset_email(
            &self,
            _email: PasswordResetEmail,
        ) -> Result<(), EmailError> {
            Err(EmailError::SendFailed("smtp down".to_string()))
        }
    }

    fn service(
        store: MockCredentialStore,
        email: impl EmailService + 'static,
        etlab: MockIdentityVerifier,
    ) -> AuthService {
        let config = AuthConfig::new(b"unit-test-secret".to_vec());
        let store: Arc<dyn CredentialStore> = Arc::new(store);
        let sessions = Arc::new(SessionIssuer::new(
            store.clone(),
            TokenCodec::new(&config.jwt_secret),
            &config,
        ));
        let challenges = Arc::new(ChallengeBroker::new(Arc::new(MemoryChallengeStore::new())));
        let photos = Arc::new(LocalPhotoStorage::new(
            std::env::temp_dir().join("scc-auth-unit-photos"),
            "http://test/photos",
        ));

        AuthService::new(
            store,
            sessions,
            challenges,
            Arc::new(email),
            photos,
            Arc::new(etlab),
            &config,
        )
    }

    #[tokio::test]
    async fn test_login_errors_are_indistinguishable() {
        let mut store = MockCredentialStore::new();
        store
            .expect_find_user_by_email()
            .with(eq("nobody@x.com"))
            .returning(|_| Box::pin(async move { Ok(None) }));
        store
            .expect_find_user_by_email()
            .with(eq("a@x.com"))
            .returning(|_| Box::pin(async move { Ok(Some(user(Some("password1"), None))) }));

        let service = service(
            store,
            MockEmailService::new("http://localhost"),
            MockIdentityVerifier::new(),
        );
        let meta = ClientMetadata::default();

        let unknown = service.login("nobody@x.com", "x", &meta).await.unwrap_err();
        let wrong = service.login("A@x.com ", "wrong", &meta).await.unwrap_err();

        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn test_signup_survives_email_failure() {
        let mut store = MockCredentialStore::new();
        store
            .expect_find_user_by_email()
            .returning(|_| Box::pin(async move { Ok(None) }));
        store.expect_create_user().times(1).returning(|new_user| {
            Box::pin(async move {
                assert_eq!(new_user.email, "a@x.com");
                assert_eq!(new_user.password_hash, Some(hash_password("password1")));
                assert!(!new_user.is_verified);
                Ok(user(Some("password1"), None))
            })
        });
        store
            .expect_insert_refresh_token()
            .times(1)
            .returning(|_| Box::pin(async move { Ok(()) }));

        let service = service(store, FailingEmailService, MockIdentityVerifier::new());
        let session = service
            .signup(
                SignupRequest {
                    email: " A@X.com".to_string(),
                    name: "Ann".to_string(),
                    password: "password1".to_string(),
                    phone: None,
                    profile_photo: None,
                    profile_photo_filename: None,
                },
                &ClientMetadata::default(),
            )
            .await
            .unwrap();

        assert_eq!(session.user.id, "user-1");
        assert_eq!(session.expires_in, 900);
    }

    #[tokio::test]
    async fn test_signup_rejects_short_password() {
        let service = service(
            MockCredentialStore::new(),
            MockEmailService::new("http://localhost"),
            MockIdentityVerifier::new(),
        );

        let result = service
            .signup(
                SignupRequest {
                    email: "a@x.com".to_string(),
                    name: "Ann".to_string(),
                    password: "short".to_string(),
                    phone: None,
                    profile_photo: None,
                    profile_photo_filename: None,
                },
                &ClientMetadata::default(),
            )
            .await;

        assert!(matches!(result, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_disconnect_google_requires_password() {
        let service = service(
            MockCredentialStore::new(),
            MockEmailService::new("http://localhost"),
            MockIdentityVerifier::new(),
        );

        let result = service.disconnect_google(&user(None, Some("g-1"))).await;
        assert!(matches!(result, Err(AuthError::PasswordRequired)));

        let result = service.disconnect_google(&user(Some("password1"), None)).await;
        assert!(matches!(result, Err(AuthError::GoogleNotLinked)));
    }

    #[tokio::test]
    async fn test_disconnect_google_clears_google_id() {
        let mut store = MockCredentialStore::new();
        store
            .expect_update_user()
            .withf(|id, patch| id.to_string() == "user-1" && patch.google_id == Some(None))
            .times(1)
            .returning(|_, _| Box::pin(async move { Ok(user(Some("password1"), None)) }));

        let service = service(
            store,
            MockEmailService::new("http://localhost"),
            MockIdentityVerifier::new(),
        );
        let updated = service
            .disconnect_google(&user(Some("password1"), Some("g-1")))
            .await
            .unwrap();

        assert_eq!(updated.google_id, None);
    }

    #[tokio::test]
    async fn test_link_etlab_maps_outcomes() {
        let cases = [
            (EtLabOutcome::InvalidCredentials, "Invalid EtLab credentials"),
            (EtLabOutcome::TimeoutError, "EtLab API request timeout"),
            (EtLabOutcome::NetworkError, "Network error connecting to EtLab"),
            (EtLabOutcome::ApiError, "Error fetching data from EtLab"),
            (EtLabOutcome::ErrorFetchingData, "Error fetching data from EtLab"),
        ];

        for (outcome, message) in cases {
            let mut store = MockCredentialStore::new();
            store
                .expect_find_user_by_etlab_username()
                .returning(|_| Box::pin(async move { Ok(None) }));
            let mut etlab = MockIdentityVerifier::new();
            etlab.expect_verify().times(1).returning(move |_, _| {
                let outcome = outcome.clone();
                Box::pin(async move { outcome })
            });

            let service = service(store, MockEmailService::new("http://localhost"), etlab);
            let err = service
                .link_etlab_identity(&user(Some("password1"), None), "SCT01", "pw")
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), message);
        }
    }

    #[tokio::test]
    async fn test_link_etlab_rejects_verified_user() {
        let service = service(
            MockCredentialStore::new(),
            MockEmailService::new("http://localhost"),
            MockIdentityVerifier::new(),
        );
        let mut verified = user(Some("password1"), None);
        verified.is_verified = true;

        let result = service.link_etlab_identity(&verified, "SCT01", "pw").await;
        assert!(matches!(result, Err(AuthError::AlreadyVerified)));
    }

    #[test]
    fn test_profile_update_distinguishes_null_photo() {
        let absent: ProfileUpdate = serde_json::from_str(r#"{"name":"Ann"}"#).unwrap();
        assert_eq!(absent.profile_photo, None);

        let removed: ProfileUpdate = serde_json::from_str(r#"{"profile_photo":null}"#).unwrap();
        assert_eq!(removed.profile_photo, Some(None));

        let set: ProfileUpdate =
            serde_json::from_str(r#"{"profile_photo":"https://cdn.test/a.png"}"#).unwrap();
        assert_eq!(
            set.profile_photo,
            Some(Some("https://cdn.test/a.png".to_string()))
        );
    }
}

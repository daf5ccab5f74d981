pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;

use std::sync::Arc;

use config::{AuthConfig, ChallengeBackend};
use repositories::{
    ChallengeStore, CredentialStore, MemoryChallengeStore, SqliteChallengeStore,
    SqliteCredentialStore,
};
use services::{
    AuthService, ChallengeBroker, EmailService, GoogleOAuthClient, GoogleOAuthError,
    IdentityVerifier, LocalPhotoStorage, PasskeyService, SessionIssuer, TokenCodec,
};

#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub passkey_service: Arc<PasskeyService>,
    pub challenges: Arc<ChallengeBroker>,
    pub config: Arc<AuthConfig>,
    pub pool: sqlx::SqlitePool,
}

impl AppState {
    /// Wires the services over `pool`. Email delivery and the EtLab verifier
    /// are injected so tests can substitute them.
    pub fn new(
        pool: sqlx::SqlitePool,
        config: AuthConfig,
        email: Arc<dyn EmailService>,
        etlab: Arc<dyn IdentityVerifier>,
    ) -> Result<Self, GoogleOAuthError> {
        let store: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::new(pool.clone()));
        let challenge_store: Arc<dyn ChallengeStore> = match config.challenge_backend {
            ChallengeBackend::Memory => Arc::new(MemoryChallengeStore::new()),
            ChallengeBackend::Database => Arc::new(SqliteChallengeStore::new(pool.clone())),
        };

        let sessions = Arc::new(SessionIssuer::new(
            store.clone(),
            TokenCodec::new(&config.jwt_secret),
            &config,
        ));
        let challenges = Arc::new(ChallengeBroker::new(challenge_store));
        let photos = Arc::new(LocalPhotoStorage::new(
            config.photos.dir.clone(),
            &config.photos.public_base_url,
        ));

        let mut auth_service = AuthService::new(
            store.clone(),
            sessions.clone(),
            challenges.clone(),
            email,
            photos,
            etlab,
            &config,
        );
        if let Some(google) = config.google.clone() {
            auth_service = auth_service.with_google(GoogleOAuthClient::new(google)?);
        }

        let passkey_service = PasskeyService::new(store, sessions, challenges.clone(), &config);

        Ok(Self {
            auth_service: Arc::new(auth_service),
            passkey_service: Arc::new(passkey_service),
            challenges,
            config: Arc::new(config),
            pool,
        })
    }
}

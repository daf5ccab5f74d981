use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rand::RngCore;
use tracing::warn;

pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;
pub const DEFAULT_PASSKEY_CHALLENGE_TTL_SECS: i64 = 5 * 60;
pub const DEFAULT_SIGNUP_TOKEN_TTL_SECS: i64 = 10 * 60;
pub const DEFAULT_PASSWORD_RESET_TTL_SECS: i64 = 15 * 60;
pub const DEFAULT_PASSKEY_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_ETLAB_BASE_URL: &str = "https://sctce.etlab.in";
pub const DEFAULT_ETLAB_TIMEOUT_SECS: u64 = 10;

const MIN_PRODUCTION_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("JWT_SECRET is too weak for production: {0}")]
    WeakSecret(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeBackend {
    Memory,
    Database,
}

impl FromStr for ChallengeBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "kv" => Ok(ChallengeBackend::Memory),
            "database" | "db" | "sqlite" => Ok(ChallengeBackend::Database),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct EtLabConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl GoogleConfig {
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
        }
    }
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PhotoStorageConfig {
    pub dir: PathBuf,
    pub public_base_url: String,
}

/// Process-wide auth settings, loaded once at startup and never mutated.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: Vec<u8>,
    pub access_token_ttl: i64,
    pub refresh_token_ttl: i64,
    pub passkey_challenge_ttl: i64,
    pub signup_token_ttl: i64,
    pub password_reset_ttl: i64,
    pub relying_party: RelyingParty,
    pub passkey_timeout_ms: u64,
    pub etlab: EtLabConfig,
    pub google: Option<GoogleConfig>,
    pub challenge_backend: ChallengeBackend,
    pub photos: PhotoStorageConfig,
    pub frontend_url: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("passkey_challenge_ttl", &self.passkey_challenge_ttl)
            .field("signup_token_ttl", &self.signup_token_ttl)
            .field("password_reset_ttl", &self.password_reset_ttl)
            .field("relying_party", &self.relying_party)
            .field("etlab", &self.etlab)
            .field("google", &self.google)
            .field("challenge_backend", &self.challenge_backend)
            .field("photos", &self.photos)
            .field("frontend_url", &self.frontend_url)
            .finish()
    }
}

impl AuthConfig {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL_SECS,
            passkey_challenge_ttl: DEFAULT_PASSKEY_CHALLENGE_TTL_SECS,
            signup_token_ttl: DEFAULT_SIGNUP_TOKEN_TTL_SECS,
            password_reset_ttl: DEFAULT_PASSWORD_RESET_TTL_SECS,
            relying_party: RelyingParty {
                id: "localhost".to_string(),
                name: "Coding Club".to_string(),
            },
            passkey_timeout_ms: DEFAULT_PASSKEY_TIMEOUT_MS,
            etlab: EtLabConfig {
                base_url: DEFAULT_ETLAB_BASE_URL.to_string(),
                timeout: Duration::from_secs(DEFAULT_ETLAB_TIMEOUT_SECS),
            },
            google: None,
            challenge_backend: ChallengeBackend::Memory,
            photos: PhotoStorageConfig {
                dir: PathBuf::from("./data/photos"),
                public_base_url: "http://127.0.0.1:8787/photos".to_string(),
            },
            frontend_url: "http://localhost:5173".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AuthConfig::new(load_jwt_secret()?);

        config.access_token_ttl = env_parse("ACCESS_TOKEN_TTL_SECS", config.access_token_ttl)?;
        config.refresh_token_ttl = env_parse("REFRESH_TOKEN_TTL_SECS", config.refresh_token_ttl)?;
        config.passkey_challenge_ttl =
            env_parse("PASSKEY_CHALLENGE_TTL_SECS", config.passkey_challenge_ttl)?;
        config.signup_token_ttl = env_parse("SIGNUP_TOKEN_TTL_SECS", config.signup_token_ttl)?;
        config.password_reset_ttl =
            env_parse("PASSWORD_RESET_TTL_SECS", config.password_reset_ttl)?;
        config.passkey_timeout_ms = env_parse("PASSKEY_TIMEOUT_MS", config.passkey_timeout_ms)?;

        if let Ok(id) = env::var("RP_ID") {
            config.relying_party.id = id;
        }
        if let Ok(name) = env::var("RP_NAME") {
            config.relying_party.name = name;
        }

        if let Ok(base_url) = env::var("ETLAB_BASE_URL") {
            config.etlab.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.etlab.timeout = Duration::from_secs(env_parse(
            "ETLAB_TIMEOUT_SECS",
            DEFAULT_ETLAB_TIMEOUT_SECS,
        )?);

        config.google = match (
            env::var("GOOGLE_CLIENT_ID"),
            env::var("GOOGLE_CLIENT_SECRET"),
            env::var("GOOGLE_REDIRECT_URI"),
        ) {
            (Ok(id), Ok(secret), Ok(redirect)) => Some(GoogleConfig::new(&id, &secret, &redirect)),
            _ => None,
        };

        config.challenge_backend = env_parse("CHALLENGE_STORE", config.challenge_backend)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "8787".to_string());
        config.photos = PhotoStorageConfig {
            dir: env::var("PHOTO_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(config.photos.dir),
            public_base_url: env::var("PHOTO_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{}:{}/photos", host, port)),
        };

        if let Ok(frontend_url) = env::var("FRONTEND_URL") {
            config.frontend_url = frontend_url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }
}

pub fn is_production() -> bool {
    current_environment() == "production"
}

fn current_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

fn load_jwt_secret() -> Result<Vec<u8>, ConfigError> {
    match env::var("JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => {
            if is_production() {
                validate_production_secret(&secret)?;
            }
            Ok(secret.into_bytes())
        }
        _ if is_production() => Err(ConfigError::Missing("JWT_SECRET")),
        _ => {
            warn!("JWT_SECRET not set; generating ephemeral signing key (development only)");
            let mut bytes = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            Ok(bytes)
        }
    }
}

fn validate_production_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_PRODUCTION_SECRET_LEN {
        return Err(ConfigError::WeakSecret(format!(
            "must be at least {} bytes",
            MIN_PRODUCTION_SECRET_LEN
        )));
    }

    let lowered = secret.to_ascii_lowercase();
    if lowered.contains("example") || lowered.contains("changeme") || lowered.contains("default") {
        return Err(ConfigError::WeakSecret(
            "appears to be a placeholder value".to_string(),
        ));
    }

    Ok(())
}

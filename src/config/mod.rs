pub mod auth;

pub use auth::{
    is_production, AuthConfig, ChallengeBackend, ConfigError, EtLabConfig, GoogleConfig,
    PhotoStorageConfig, RelyingParty,
};

pub mod auth_service;
pub mod challenge_broker;
pub mod email_service;
pub mod etlab_client;
pub mod google_oauth;
pub mod passkey_service;
pub mod password;
pub mod photo_storage;
pub mod session_issuer;
pub mod token_codec;

pub use auth_service::{AuthError, AuthService};
pub use challenge_broker::{spawn_prune_worker, ChallengeBroker, ChallengeError};
pub use email_service::{create_email_service, EmailError, EmailService, MockEmailService};
pub use etlab_client::{EtLabClient, EtLabOutcome, EtLabProfile, IdentityVerifier};
pub use google_oauth::{GoogleOAuthClient, GoogleOAuthError};
pub use passkey_service::{PasskeyError, PasskeyService};
pub use photo_storage::{LocalPhotoStorage, PhotoStorage, PhotoStorageError};
pub use session_issuer::{AuthSession, SessionError, SessionIssuer};
pub use token_codec::{TokenCodec, TokenError};

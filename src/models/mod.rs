pub mod challenge;
pub mod passkey;
pub mod password_reset;
pub mod refresh_token;
pub mod user;

pub use challenge::{ChallengeKind, ChallengeRecord};
pub use passkey::{PasskeyCredential, PasskeySummary};
pub use password_reset::PasswordResetToken;
pub use refresh_token::{ClientMetadata, RefreshToken};
pub use user::{NewUser, PublicUser, User, UserPatch};

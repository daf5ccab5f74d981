use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The ceremony a challenge belongs to. A challenge issued for one kind can
/// never be consumed as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    PasskeyRegister,
    PasskeyLogin,
    Signup,
    PasswordReset,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::PasskeyRegister => "passkey_register",
            ChallengeKind::PasskeyLogin => "passkey_login",
            ChallengeKind::Signup => "signup",
            ChallengeKind::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passkey_register" => Ok(ChallengeKind::PasskeyRegister),
            "passkey_login" => Ok(ChallengeKind::PasskeyLogin),
            "signup" => Ok(ChallengeKind::Signup),
            "password_reset" => Ok(ChallengeKind::PasswordReset),
            other => Err(format!("Unknown challenge type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub challenge: String,
    pub kind: ChallengeKind,
    pub user_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl ChallengeRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

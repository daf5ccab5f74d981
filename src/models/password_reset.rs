use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct PasswordResetToken {
    pub token: String,
    pub user_id: String,
    pub expires_at: i64,
    pub used: bool,
    pub created_at: i64,
}

impl PasswordResetToken {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

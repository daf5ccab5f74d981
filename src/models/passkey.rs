use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A WebAuthn credential registered by a user.
///
/// `public_key` is the attestation payload exactly as the client sent it.
/// It is stored for later use and is not structurally verified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PasskeyCredential {
    pub id: String,
    pub user_id: String,
    pub credential_id: String,
    pub public_key: String,
    pub counter: i64,
    pub transports: Vec<String>,
    pub device_name: Option<String>,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

/// Row shape of `passkey_credentials`; transports are a JSON array in TEXT.
#[derive(Debug, FromRow)]
pub(crate) struct PasskeyCredentialRow {
    pub id: String,
    pub user_id: String,
    pub credential_id: String,
    pub public_key: String,
    pub counter: i64,
    pub transports: String,
    pub device_name: Option<String>,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

impl From<PasskeyCredentialRow> for PasskeyCredential {
    fn from(row: PasskeyCredentialRow) -> Self {
        let transports = serde_json::from_str(&row.transports).unwrap_or_else(|e| {
            tracing::warn!(
                "Unreadable transports for passkey {}: {}",
                row.credential_id,
                e
            );
            Vec::new()
        });

        Self {
            id: row.id,
            user_id: row.user_id,
            credential_id: row.credential_id,
            public_key: row.public_key,
            counter: row.counter,
            transports,
            device_name: row.device_name,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

/// Listing entry for `GET /auth/passkeys`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PasskeySummary {
    pub id: String,
    pub credential_id: String,
    pub device_name: Option<String>,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

impl From<PasskeyCredential> for PasskeySummary {
    fn from(credential: PasskeyCredential) -> Self {
        Self {
            id: credential.id,
            credential_id: credential.credential_id,
            device_name: credential.device_name,
            created_at: credential.created_at,
            last_used_at: credential.last_used_at,
        }
    }
}

//! HS256 JWTs for access and refresh tokens.
//!
//! Access tokens are never persisted; refresh tokens are persisted only as
//! their SHA-256 digest (see [`hash_token`]).

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

const REFRESH_TOKEN_TYPE: &str = "refresh";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,
    #[error("Invalid token signature")]
    BadSignature,
    #[error("Token has expired")]
    Expired,
    #[error("Wrong token type")]
    WrongType,
    #[error("Failed to encode token: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub phone: Option<String>,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies tokens with a secret fixed at construction.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<[u8]>,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Arc::from(secret),
        }
    }

    pub fn issue_access_token(
        &self,
        user_id: &str,
        email: &str,
        phone: Option<&str>,
        name: &str,
        ttl_seconds: i64,
    ) -> Result<String, TokenError> {
        self.issue_access_token_at(user_id, email, phone, name, ttl_seconds, Utc::now().timestamp())
    }

    pub fn issue_access_token_at(
        &self,
        user_id: &str,
        email: &str,
        phone: Option<&str>,
        name: &str,
        ttl_seconds: i64,
        now: i64,
    ) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            phone: phone.map(str::to_string),
            name: name.to_string(),
            iat: now,
            exp: now + ttl_seconds,
        };
        self.sign(&claims)
    }

    pub fn issue_refresh_token(&self, user_id: &str, ttl_seconds: i64) -> Result<String, TokenError> {
        self.issue_refresh_token_at(user_id, ttl_seconds, Utc::now().timestamp())
    }

    pub fn issue_refresh_token_at(
        &self,
        user_id: &str,
        ttl_seconds: i64,
        now: i64,
    ) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            token_type: REFRESH_TOKEN_TYPE.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_seconds,
        };
        self.sign(&claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify_access_token_at(token, Utc::now().timestamp())
    }

    pub fn verify_access_token_at(&self, token: &str, now: i64) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.verify(token)?;
        check_expiry(claims.exp, now)?;
        Ok(claims)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verify_refresh_token_at(token, Utc::now().timestamp())
    }

    pub fn verify_refresh_token_at(
        &self,
        token: &str,
        now: i64,
    ) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.verify(token)?;
        check_expiry(claims.exp, now)?;
        if claims.token_type != REFRESH_TOKEN_TYPE {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // Expiry is checked against the caller's clock in `check_expiry`.
        validation.validate_exp = false;

        let token_data = decode::<T>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?;

        Ok(token_data.claims)
    }
}

fn check_expiry(exp: i64, now: i64) -> Result<(), TokenError> {
    if exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(())
}

/// SHA-256 hex digest used to store and look up refresh tokens.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    const NOW: i64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test-secret")
    }

    #[test]
    fn test_access_token_round_trips_claims() {
        let codec = codec();
        let token = codec
            .issue_access_token_at("u1", "a@x.com", Some("555"), "Ann", 900, NOW)
            .unwrap();

        let claims = codec.verify_access_token_at(&token, NOW + 899).unwrap();
        assert_eq!(
            claims,
            AccessClaims {
                sub: "u1".to_string(),
                email: "a@x.com".to_string(),
                phone: Some("555".to_string()),
                name: "Ann".to_string(),
                iat: NOW,
                exp: NOW + 900,
            }
        );
    }

    #[test]
    fn test_token_fails_at_exact_expiry() {
        let codec = codec();
        let token = codec
            .issue_access_token_at("u1", "a@x.com", None, "Ann", 900, NOW)
            .unwrap();

        assert_eq!(
            codec.verify_access_token_at(&token, NOW + 900),
            Err(TokenError::Expired)
        );
        assert_eq!(
            codec.verify_access_token_at(&token, NOW + 5000),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_wrong_secret_never_verifies() {
        let token = codec()
            .issue_access_token_at("u1", "a@x.com", None, "Ann", 900, NOW)
            .unwrap();
        let other = TokenCodec::new(b"another-secret");

        assert_eq!(
            other.verify_access_token_at(&token, NOW),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = codec();
        let token = codec
            .issue_access_token_at("u1", "a@x.com", None, "Ann", 900, NOW)
            .unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({
                "sub": "admin", "email": "a@x.com", "phone": null,
                "name": "Ann", "iat": NOW, "exp": NOW + 900
            }))
            .unwrap(),
        );
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(
            codec.verify_access_token_at(&forged, NOW),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = codec();
        assert_eq!(codec.verify_access_token_at("", NOW), Err(TokenError::Malformed));
        assert_eq!(codec.verify_access_token_at("a.b", NOW), Err(TokenError::Malformed));
        assert_eq!(
            codec.verify_access_token_at("a.b.c.d", NOW),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_refresh_token_carries_type_and_unique_id() {
        let codec = codec();
        let first = codec.issue_refresh_token_at("u1", 60, NOW).unwrap();
        let second = codec.issue_refresh_token_at("u1", 60, NOW).unwrap();
        assert_ne!(first, second);

        let claims = codec.verify_refresh_token_at(&first, NOW).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.token_type, "refresh");
    }

    #[test]
    fn test_access_and_refresh_tokens_are_not_interchangeable() {
        let codec = codec();
        let access = codec
            .issue_access_token_at("u1", "a@x.com", None, "Ann", 900, NOW)
            .unwrap();
        let refresh = codec.issue_refresh_token_at("u1", 900, NOW).unwrap();

        assert!(codec.verify_refresh_token_at(&access, NOW).is_err());
        assert!(codec.verify_access_token_at(&refresh, NOW).is_err());
    }

    #[test]
    fn test_refresh_token_with_other_type_is_rejected() {
        let codec = codec();
        let claims = RefreshClaims {
            sub: "u1".to_string(),
            token_type: "session".to_string(),
            jti: "j".to_string(),
            iat: NOW,
            exp: NOW + 60,
        };
        let token = codec.sign(&claims).unwrap();

        assert_eq!(
            codec.verify_refresh_token_at(&token, NOW),
            Err(TokenError::WrongType)
        );
    }

    #[test]
    fn test_tokens_are_standard_hs256_jwts() {
        let token = codec()
            .issue_access_token_at("u1", "a@x.com", None, "Ann", 900, NOW)
            .unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS256);
        assert_eq!(header.typ.as_deref(), Some("JWT"));
    }

    #[test]
    fn test_hash_token_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

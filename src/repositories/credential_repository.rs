use crate::models::passkey::PasskeyCredentialRow;
use crate::models::{
    NewUser, PasskeyCredential, PasswordResetToken, RefreshToken, User, UserPatch,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Rows removed by [`CredentialStore::prune_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub refresh_tokens: u64,
    pub password_reset_tokens: u64,
}

/// Persistence for users and everything that authenticates them.
///
/// Unique-constraint violations surface as [`RepositoryError::Conflict`].
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;
    async fn find_user_by_id(&self, id: &str) -> RepositoryResult<Option<User>>;
    async fn find_user_by_google_id(&self, google_id: &str) -> RepositoryResult<Option<User>>;
    async fn find_user_by_etlab_username(&self, username: &str)
        -> RepositoryResult<Option<User>>;
    async fn create_user(&self, user: NewUser) -> RepositoryResult<User>;
    async fn update_user(&self, id: &str, patch: UserPatch) -> RepositoryResult<User>;
    async fn list_users(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<User>>;

    async fn insert_refresh_token(&self, token: RefreshToken) -> RepositoryResult<()>;
    async fn find_refresh_token_by_hash(&self, hash: &str)
        -> RepositoryResult<Option<RefreshToken>>;
    async fn touch_refresh_token(&self, id: &str, now: i64) -> RepositoryResult<()>;
    async fn delete_refresh_token(&self, id: &str) -> RepositoryResult<()>;
    async fn delete_all_refresh_tokens_for_user(&self, user_id: &str) -> RepositoryResult<u64>;

    async fn insert_passkey_credential(&self, credential: PasskeyCredential)
        -> RepositoryResult<()>;
    async fn find_passkey_credential_by_id(
        &self,
        credential_id: &str,
    ) -> RepositoryResult<Option<PasskeyCredential>>;
    async fn list_passkey_credentials_for_user(
        &self,
        user_id: &str,
    ) -> RepositoryResult<Vec<PasskeyCredential>>;
    async fn delete_passkey_credential(&self, user_id: &str, id: &str) -> RepositoryResult<()>;
    async fn touch_passkey_credential(&self, id: &str, now: i64) -> RepositoryResult<()>;

    async fn insert_password_reset_token(&self, token: PasswordResetToken)
        -> RepositoryResult<()>;
    async fn find_password_reset_token(
        &self,
        token: &str,
    ) -> RepositoryResult<Option<PasswordResetToken>>;
    /// Marks the token used, stores `password_hash` on its user and deletes
    /// the user's refresh tokens, all in one transaction.
    ///
    /// Returns `None` without writing anything when the token was already
    /// used, otherwise the number of refresh tokens revoked.
    async fn redeem_password_reset_token(
        &self,
        token: &str,
        password_hash: &str,
    ) -> RepositoryResult<Option<u64>>;

    async fn prune_expired(&self, now: i64) -> RepositoryResult<PruneReport>;
}

const USER_COLUMNS: &str = "id, email, name, phone, password_hash, google_id, etlab_username, \
     profile_photo_url, is_verified, created_at, updated_at";

const PASSKEY_COLUMNS: &str = "id, user_id, credential_id, public_key, counter, transports, \
     device_name, created_at, last_used_at";

/// Turns unique-constraint violations into [`RepositoryError::Conflict`].
pub(crate) fn map_write_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        _ => RepositoryError::Database(e),
    }
}

pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_user_where(&self, column: &str, value: &str) -> RepositoryResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        self.find_user_where("email", email).await
    }

    async fn find_user_by_id(&self, id: &str) -> RepositoryResult<Option<User>> {
        self.find_user_where("id", id).await
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> RepositoryResult<Option<User>> {
        self.find_user_where("google_id", google_id).await
    }

    async fn find_user_by_etlab_username(
        &self,
        username: &str,
    ) -> RepositoryResult<Option<User>> {
        self.find_user_where("etlab_username", username).await
    }

    async fn create_user(&self, user: NewUser) -> RepositoryResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, name, phone, password_hash, google_id, etlab_username,
                profile_photo_url, is_verified, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(&user.google_id)
        .bind(&user.etlab_username)
        .bind(&user.profile_photo_url)
        .bind(user.is_verified)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        self.find_user_by_id(&id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn update_user(&self, id: &str, patch: UserPatch) -> RepositoryResult<User> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE users SET updated_at = ");
        builder.push_bind(Utc::now().timestamp());

        if let Some(email) = patch.email {
            builder.push(", email = ").push_bind(email);
        }
        if let Some(name) = patch.name {
            builder.push(", name = ").push_bind(name);
        }
        if let Some(phone) = patch.phone {
            builder.push(", phone = ").push_bind(phone);
        }
        if let Some(password_hash) = patch.password_hash {
            builder.push(", password_hash = ").push_bind(password_hash);
        }
        if let Some(google_id) = patch.google_id {
            builder.push(", google_id = ").push_bind(google_id);
        }
        if let Some(etlab_username) = patch.etlab_username {
            builder.push(", etlab_username = ").push_bind(etlab_username);
        }
        if let Some(profile_photo_url) = patch.profile_photo_url {
            builder
                .push(", profile_photo_url = ")
                .push_bind(profile_photo_url);
        }
        if let Some(is_verified) = patch.is_verified {
            builder.push(", is_verified = ").push_bind(is_verified);
        }

        builder.push(" WHERE id = ").push_bind(id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        self.find_user_by_id(id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC, email LIMIT ? OFFSET ?",
            USER_COLUMNS
        );
        let users = sqlx::query_as::<_, User>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn insert_refresh_token(&self, token: RefreshToken) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                id, user_id, token_hash, expires_at, created_at, last_used_at, ip_address, user_agent
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.id)
        .bind(&token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .bind(token.last_used_at)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        hash: &str,
    ) -> RepositoryResult<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, user_id, token_hash, expires_at, created_at, last_used_at, ip_address, user_agent
            FROM refresh_tokens
            WHERE token_hash = ?
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    async fn touch_refresh_token(&self, id: &str, now: i64) -> RepositoryResult<()> {
        sqlx::query("UPDATE refresh_tokens SET last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_refresh_token(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_refresh_tokens_for_user(&self, user_id: &str) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_passkey_credential(
        &self,
        credential: PasskeyCredential,
    ) -> RepositoryResult<()> {
        let transports = serde_json::to_string(&credential.transports)
            .map_err(|e| RepositoryError::Database(sqlx::Error::Encode(Box::new(e))))?;

        sqlx::query(
            r#"
            INSERT INTO passkey_credentials (
                id, user_id, credential_id, public_key, counter, transports,
                device_name, created_at, last_used_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.user_id)
        .bind(&credential.credential_id)
        .bind(&credential.public_key)
        .bind(credential.counter)
        .bind(transports)
        .bind(&credential.device_name)
        .bind(credential.created_at)
        .bind(credential.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn find_passkey_credential_by_id(
        &self,
        credential_id: &str,
    ) -> RepositoryResult<Option<PasskeyCredential>> {
        let sql = format!(
            "SELECT {} FROM passkey_credentials WHERE credential_id = ?",
            PASSKEY_COLUMNS
        );
        let row = sqlx::query_as::<_, PasskeyCredentialRow>(&sql)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PasskeyCredential::from))
    }

    async fn list_passkey_credentials_for_user(
        &self,
        user_id: &str,
    ) -> RepositoryResult<Vec<PasskeyCredential>> {
        let sql = format!(
            "SELECT {} FROM passkey_credentials WHERE user_id = ? ORDER BY created_at DESC, id",
            PASSKEY_COLUMNS
        );
        let rows = sqlx::query_as::<_, PasskeyCredentialRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PasskeyCredential::from).collect())
    }

    async fn delete_passkey_credential(&self, user_id: &str, id: &str) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM passkey_credentials WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn touch_passkey_credential(&self, id: &str, now: i64) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE passkey_credentials SET last_used_at = ?, counter = counter + 1 WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_password_reset_token(
        &self,
        token: PasswordResetToken,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (token, user_id, expires_at, used, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.token)
        .bind(&token.user_id)
        .bind(token.expires_at)
        .bind(token.used)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn find_password_reset_token(
        &self,
        token: &str,
    ) -> RepositoryResult<Option<PasswordResetToken>> {
        let record = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            SELECT token, user_id, expires_at, used, created_at
            FROM password_reset_tokens
            WHERE token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn redeem_password_reset_token(
        &self,
        token: &str,
        password_hash: &str,
    ) -> RepositoryResult<Option<u64>> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<String> = sqlx::query_scalar(
            "UPDATE password_reset_tokens SET used = 1 WHERE token = ? AND used = 0 RETURNING user_id",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = user_id else {
            return Ok(None);
        };

        let updated = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now().timestamp())
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        let revoked = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(revoked.rows_affected()))
    }

    async fn prune_expired(&self, now: i64) -> RepositoryResult<PruneReport> {
        let refresh = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let resets =
            sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at <= ? OR used = 1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(PruneReport {
            refresh_tokens: refresh.rows_affected(),
            password_reset_tokens: resets.rows_affected(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pool;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: "Test".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = SqliteCredentialStore::new(create_test_pool().await);

        let user = store.create_user(new_user("find@x.com")).await.unwrap();
        assert!(!user.is_verified);
        assert_eq!(user.password_hash, None);

        let by_email = store.find_user_by_email("find@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(store.find_user_by_email("other@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_passkey_is_scoped_to_owner() {
        let store = SqliteCredentialStore::new(create_test_pool().await);
        let owner = store.create_user(new_user("owner@x.com")).await.unwrap();
        let other = store.create_user(new_user("other@x.com")).await.unwrap();

        store
            .insert_passkey_credential(PasskeyCredential {
                id: "pk-1".to_string(),
                user_id: owner.id.clone(),
                credential_id: "cred-1".to_string(),
                public_key: String::new(),
                counter: 0,
                transports: Vec::new(),
                device_name: None,
                created_at: 1,
                last_used_at: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            store.delete_passkey_credential(&other.id, "pk-1").await,
            Err(RepositoryError::NotFound)
        ));
        store.delete_passkey_credential(&owner.id, "pk-1").await.unwrap();
        assert!(store
            .list_passkey_credentials_for_user(&owner.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_redeem_reset_token_once() {
        let store = SqliteCredentialStore::new(create_test_pool().await);
        let user = store.create_user(new_user("reset@x.com")).await.unwrap();

        store
            .insert_password_reset_token(PasswordResetToken {
                token: "tok".to_string(),
                user_id: user.id.clone(),
                expires_at: 100,
                used: false,
                created_at: 0,
            })
            .await
            .unwrap();

        assert_eq!(
            store.redeem_password_reset_token("tok", "hash-1").await.unwrap(),
            Some(0)
        );
        assert_eq!(
            store.redeem_password_reset_token("tok", "hash-2").await.unwrap(),
            None
        );

        let stored = store.find_password_reset_token("tok").await.unwrap().unwrap();
        assert!(stored.used);
        let user = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(user.password_hash.as_deref(), Some("hash-1"));
    }

    #[tokio::test]
    async fn test_redeem_for_missing_user_leaves_token_unused() {
        let store = SqliteCredentialStore::new(create_test_pool().await);
        let user = store.create_user(new_user("gone@x.com")).await.unwrap();
        store
            .insert_password_reset_token(PasswordResetToken {
                token: "tok".to_string(),
                user_id: user.id.clone(),
                expires_at: 100,
                used: false,
                created_at: 0,
            })
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&user.id)
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(matches!(
            store.redeem_password_reset_token("tok", "hash").await,
            Err(RepositoryError::NotFound)
        ));
        let stored = store.find_password_reset_token("tok").await.unwrap().unwrap();
        assert!(!stored.used);
    }
}

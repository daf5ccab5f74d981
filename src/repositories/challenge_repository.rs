use super::credential_repository::{map_write_error, RepositoryResult};
use crate::models::{ChallengeKind, ChallengeRecord};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Backing storage for single-use challenges.
///
/// `take` must read and remove in one step: a record is handed out at most
/// once, and an expired record is never handed out.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn put(&self, record: ChallengeRecord) -> RepositoryResult<()>;
    async fn take(
        &self,
        kind: ChallengeKind,
        challenge: &str,
        now: i64,
    ) -> RepositoryResult<Option<ChallengeRecord>>;
    async fn prune_expired(&self, now: i64) -> RepositoryResult<u64>;
}

/// In-process key-value store with per-entry expiry.
///
/// Keys follow `challenge:{type}:{id}`. Every `put` evicts entries that have
/// expired by the new record's `created_at`, so the map stays bounded by the
/// challenges issued within one TTL.
#[derive(Default)]
pub struct MemoryChallengeStore {
    entries: Mutex<HashMap<String, ChallengeRecord>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: ChallengeKind, challenge: &str) -> String {
        format!("challenge:{}:{}", kind, challenge)
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(&self, record: ChallengeRecord) -> RepositoryResult<()> {
        let key = Self::key(record.kind, &record.challenge);
        let mut entries = self.entries.lock().await;
        let now = record.created_at;
        entries.retain(|_, existing| !existing.is_expired(now));
        entries.insert(key, record);
        Ok(())
    }

    async fn take(
        &self,
        kind: ChallengeKind,
        challenge: &str,
        now: i64,
    ) -> RepositoryResult<Option<ChallengeRecord>> {
        let record = self.entries.lock().await.remove(&Self::key(kind, challenge));
        Ok(record.filter(|r| !r.is_expired(now)))
    }

    async fn prune_expired(&self, now: i64) -> RepositoryResult<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, record| !record.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

#[derive(FromRow)]
struct ChallengeRow {
    challenge: String,
    user_id: Option<String>,
    created_at: i64,
    expires_at: i64,
}

/// Relational fallback backed by the `challenges` table.
pub struct SqliteChallengeStore {
    pool: SqlitePool,
}

impl SqliteChallengeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for SqliteChallengeStore {
    async fn put(&self, record: ChallengeRecord) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO challenges (challenge, type, user_id, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.challenge)
        .bind(record.kind.as_str())
        .bind(&record.user_id)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn take(
        &self,
        kind: ChallengeKind,
        challenge: &str,
        now: i64,
    ) -> RepositoryResult<Option<ChallengeRecord>> {
        // Single statement so two concurrent consumers cannot both see the row.
        let row = sqlx::query_as::<_, ChallengeRow>(
            r#"
            DELETE FROM challenges
            WHERE type = ? AND challenge = ?
            RETURNING challenge, user_id, created_at, expires_at
            "#,
        )
        .bind(kind.as_str())
        .bind(challenge)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|row| ChallengeRecord {
                challenge: row.challenge,
                kind,
                user_id: row.user_id,
                created_at: row.created_at,
                expires_at: row.expires_at,
            })
            .filter(|record| !record.is_expired(now)))
    }

    async fn prune_expired(&self, now: i64) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM challenges WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ChallengeKind, challenge: &str, expires_at: i64) -> ChallengeRecord {
        ChallengeRecord {
            challenge: challenge.to_string(),
            kind,
            user_id: Some("user-1".to_string()),
            created_at: 0,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_memory_take_is_single_use() {
        let store = MemoryChallengeStore::new();
        store
            .put(record(ChallengeKind::PasskeyLogin, "abc", 100))
            .await
            .unwrap();

        assert!(store
            .take(ChallengeKind::PasskeyLogin, "abc", 50)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .take(ChallengeKind::PasskeyLogin, "abc", 50)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_take_respects_kind_and_expiry() {
        let store = MemoryChallengeStore::new();
        store
            .put(record(ChallengeKind::PasskeyRegister, "abc", 100))
            .await
            .unwrap();
        store
            .put(record(ChallengeKind::Signup, "old", 10))
            .await
            .unwrap();

        assert!(store
            .take(ChallengeKind::PasskeyLogin, "abc", 50)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .take(ChallengeKind::Signup, "old", 10)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_put_evicts_expired_entries() {
        let store = MemoryChallengeStore::new();
        for i in 0..1000 {
            store
                .put(ChallengeRecord {
                    created_at: 0,
                    ..record(ChallengeKind::PasskeyLogin, &format!("stale-{}", i), 1)
                })
                .await
                .unwrap();
        }

        store
            .put(ChallengeRecord {
                created_at: 1_000_000,
                ..record(ChallengeKind::PasskeyLogin, "fresh", 1_000_300)
            })
            .await
            .unwrap();

        let entries = store.entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("challenge:passkey_login:fresh"));
    }

    #[tokio::test]
    async fn test_memory_prune_drops_only_expired() {
        let store = MemoryChallengeStore::new();
        store
            .put(record(ChallengeKind::Signup, "live", 100))
            .await
            .unwrap();
        store
            .put(record(ChallengeKind::Signup, "dead", 20))
            .await
            .unwrap();

        assert_eq!(store.prune_expired(50).await.unwrap(), 1);
        assert!(store
            .take(ChallengeKind::Signup, "live", 50)
            .await
            .unwrap()
            .is_some());
    }
}

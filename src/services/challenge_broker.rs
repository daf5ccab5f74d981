use crate::models::{ChallengeKind, ChallengeRecord};
use crate::repositories::{ChallengeStore, RepositoryError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("Challenge not found or expired")]
    NotFound,
    #[error("Challenge store error: {0}")]
    Store(#[from] RepositoryError),
}

/// Issues and consumes short-lived, single-use challenges.
pub struct ChallengeBroker {
    store: Arc<dyn ChallengeStore>,
}

impl ChallengeBroker {
    pub fn new(store: Arc<dyn ChallengeStore>) -> Self {
        Self { store }
    }

    pub async fn issue(
        &self,
        kind: ChallengeKind,
        user_id: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<String, ChallengeError> {
        let now = Utc::now().timestamp();
        let challenge = Uuid::new_v4().to_string();

        self.store
            .put(ChallengeRecord {
                challenge: challenge.clone(),
                kind,
                user_id: user_id.map(str::to_string),
                created_at: now,
                expires_at: now + ttl_seconds,
            })
            .await?;

        tracing::debug!("Issued {} challenge (ttl {}s)", kind, ttl_seconds);
        Ok(challenge)
    }

    /// Removes and returns the challenge. Missing, expired and already
    /// consumed challenges all yield [`ChallengeError::NotFound`].
    pub async fn consume(
        &self,
        kind: ChallengeKind,
        challenge: &str,
    ) -> Result<ChallengeRecord, ChallengeError> {
        self.store
            .take(kind, challenge, Utc::now().timestamp())
            .await?
            .ok_or(ChallengeError::NotFound)
    }

    pub async fn prune_expired(&self) -> Result<u64, ChallengeError> {
        Ok(self.store.prune_expired(Utc::now().timestamp()).await?)
    }
}

/// Spawn a background task that drops expired challenges every `interval`.
pub fn spawn_prune_worker(
    broker: Arc<ChallengeBroker>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match broker.prune_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("Pruned {} expired challenges", removed),
                Err(e) => tracing::error!("Challenge prune failed: {}", e),
            }
        }
    })
}

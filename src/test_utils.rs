pub mod test_helpers {
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::config::AuthConfig;
    use crate::models::{NewUser, User};
    use crate::repositories::{CredentialStore, RepositoryError, SqliteCredentialStore};
    use crate::services::etlab_client::{EtLabOutcome, IdentityVerifier};
    use crate::services::password::hash_password;
    use crate::services::MockEmailService;
    use crate::AppState;

    pub const TEST_JWT_SECRET: &[u8] = b"test-secret-test-secret-test-secret";

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Insert a user directly. `password` of `None` creates a password-less
    /// account, as EtLab and Google signups do.
    pub async fn insert_test_user(
        pool: &SqlitePool,
        email: &str,
        name: &str,
        password: Option<&str>,
    ) -> Result<User, RepositoryError> {
        SqliteCredentialStore::new(pool.clone())
            .create_user(NewUser {
                email: email.to_string(),
                name: name.to_string(),
                password_hash: password.map(hash_password),
                ..Default::default()
            })
            .await
    }

    /// Config with a fixed secret and photos under `photo_dir`.
    pub fn test_config(photo_dir: &TempDir) -> AuthConfig {
        let mut config = AuthConfig::new(TEST_JWT_SECRET);
        config.photos.dir = photo_dir.path().to_path_buf();
        config.photos.public_base_url = "http://photos.test/photos".to_string();
        config
    }

    /// Verifier that never reaches a portal. Used where EtLab is not under test.
    pub struct UnreachableEtLab;

    #[async_trait::async_trait]
    impl IdentityVerifier for UnreachableEtLab {
        async fn verify(&self, _username: &str, _password: &str) -> EtLabOutcome {
            EtLabOutcome::NetworkError
        }
    }

    /// A fully wired application over an in-memory database.
    ///
    /// Holds the temp dir so stored photos live as long as the harness.
    pub struct TestApp {
        pub state: AppState,
        pub pool: SqlitePool,
        pub email: Arc<MockEmailService>,
        pub photo_dir: TempDir,
    }

    impl TestApp {
        pub async fn new() -> anyhow::Result<Self> {
            Self::build(|_| {}, Arc::new(UnreachableEtLab)).await
        }

        /// Builds the app after letting the caller adjust the config.
        pub async fn build(
            configure: impl FnOnce(&mut AuthConfig),
            etlab: Arc<dyn IdentityVerifier>,
        ) -> anyhow::Result<Self> {
            let photo_dir = TempDir::new()?;
            let mut config = test_config(&photo_dir);
            configure(&mut config);

            let pool = create_test_db().await?;
            let email = Arc::new(MockEmailService::new(&config.frontend_url));
            let state = AppState::new(pool.clone(), config, email.clone(), etlab)?;

            Ok(Self {
                state,
                pool,
                email,
                photo_dir,
            })
        }

        pub fn router(&self) -> axum::Router {
            crate::handlers::auth_router(self.state.clone())
        }
    }
}

/// Pool for unit tests. Panics if migrations fail.
#[cfg(test)]
pub async fn create_test_pool() -> sqlx::SqlitePool {
    match test_helpers::create_test_db().await {
        Ok(pool) => pool,
        Err(e) => panic!("Failed to create test pool: {}", e),
    }
}

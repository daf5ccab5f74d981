pub mod challenge_repository;
pub mod credential_repository;

pub use challenge_repository::{ChallengeStore, MemoryChallengeStore, SqliteChallengeStore};
pub use credential_repository::{
    CredentialStore, PruneReport, RepositoryError, RepositoryResult, SqliteCredentialStore,
};

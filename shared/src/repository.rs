use async_trait::async_trait;
use thiserror::Error;

use crate::types::{User, UserPatch};

/// Which attributes a read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMask {
    /// Every attribute except the password hash
    WithoutPassword,
    /// Everything, including the password hash
    Full,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("user {0} already exists")]
    DuplicateKey(String),

    #[error("storage request failed: {0}")]
    Storage(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// CRUD over persisted users, keyed by lowercase email.
///
/// Implementations own their connection handle. Uniqueness of email must be
/// enforced by the storage layer itself: `insert` reports `DuplicateKey`
/// atomically rather than relying on a prior lookup.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(
        &self,
        email: &str,
        mask: FieldMask,
    ) -> Result<Option<User>, RepositoryError>;

    async fn find_all(&self, mask: FieldMask) -> Result<Vec<User>, RepositoryError>;

    /// Persist a new record, returning it as stored (password is the hash).
    async fn insert(&self, user: User) -> Result<User, RepositoryError>;

    /// Apply `changes` to an existing record. `Ok(None)` when no record
    /// matches. The returned record never carries the password.
    async fn update_by_email(
        &self,
        email: &str,
        changes: &UserPatch,
    ) -> Result<Option<User>, RepositoryError>;

    /// `Ok(true)` when a record was removed.
    async fn delete_by_email(&self, email: &str) -> Result<bool, RepositoryError>;
}

/// Dependent per-user availability records
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Remove every availability record owned by `user_id`, returning how many
    /// were removed.
    async fn delete_all_for_user(&self, user_id: &str) -> Result<usize, RepositoryError>;
}

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::repository::{AvailabilityStore, FieldMask, RepositoryError, UserRepository};
use crate::types::{normalize_email, User, UserAvailability, UserPatch};

/// In-process user store for local runs and tests
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn masked(user: &User, mask: FieldMask) -> User {
    match mask {
        FieldMask::Full => user.clone(),
        FieldMask::WithoutPassword => user.clone().without_password(),
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(
        &self,
        email: &str,
        mask: FieldMask,
    ) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&normalize_email(email)).map(|u| masked(u, mask)))
    }

    async fn find_all(&self, mask: FieldMask) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut all: Vec<User> = users.values().map(|u| masked(u, mask)).collect();
        all.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(all)
    }

    async fn insert(&self, mut user: User) -> Result<User, RepositoryError> {
        user.email = normalize_email(&user.email);
        let mut users = self.users.write().await;
        if users.contains_key(&user.email) {
            return Err(RepositoryError::DuplicateKey(user.email));
        }
        users.insert(user.email.clone(), user.clone());
        Ok(user)
    }

    async fn update_by_email(
        &self,
        email: &str,
        changes: &UserPatch,
    ) -> Result<Option<User>, RepositoryError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&normalize_email(email)).map(|user| {
            user.apply(changes);
            user.clone().without_password()
        }))
    }

    async fn delete_by_email(&self, email: &str) -> Result<bool, RepositoryError> {
        let mut users = self.users.write().await;
        Ok(users.remove(&normalize_email(email)).is_some())
    }
}

/// In-process availability records keyed by user id
#[derive(Debug, Default)]
pub struct MemoryAvailabilityStore {
    records: RwLock<HashMap<String, Vec<UserAvailability>>>,
}

impl MemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, user_id: &str, date: &str) {
        self.records
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(UserAvailability {
                date: date.to_string(),
            });
    }

    pub async fn count_for(&self, user_id: &str) -> usize {
        self.records
            .read()
            .await
            .get(user_id)
            .map(|dates| dates.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl AvailabilityStore for MemoryAvailabilityStore {
    async fn delete_all_for_user(&self, user_id: &str) -> Result<usize, RepositoryError> {
        let removed = self.records.write().await.remove(user_id);
        Ok(removed.map(|dates| dates.len()).unwrap_or(0))
    }
}

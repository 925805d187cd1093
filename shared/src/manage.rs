use std::sync::Arc;

use crate::auth::AuthContext;
use crate::error::ManageError;
use crate::gate::{self, Decision};
use crate::password::PasswordService;
use crate::repository::{AvailabilityStore, FieldMask, RepositoryError, UserRepository};
use crate::types::{Action, ActionRequest, ActionResponse, User, UserPatch};

/// Single entry point for user management actions
#[derive(Clone)]
pub struct UserManager {
    users: Arc<dyn UserRepository>,
    availability: Arc<dyn AvailabilityStore>,
    passwords: Arc<dyn PasswordService>,
}

impl UserManager {
    pub fn new(
        users: Arc<dyn UserRepository>,
        availability: Arc<dyn AvailabilityStore>,
        passwords: Arc<dyn PasswordService>,
    ) -> Self {
        Self {
            users,
            availability,
            passwords,
        }
    }

    pub async fn handle(
        &self,
        context: &AuthContext,
        request: ActionRequest,
    ) -> Result<ActionResponse, ManageError> {
        tracing::info!(
            "Manage {} requested by {} tier (target: {:?})",
            request.action,
            context.tier(),
            request.target_email
        );

        let whitelist = match gate::decide(context, request.action, request.target_email.as_deref()) {
            Decision::Allow(whitelist) => whitelist,
            Decision::Deny(reason) => {
                tracing::warn!("Denied {} for {} tier", request.action, context.tier());
                return Err(ManageError::unauthorized(reason));
            }
        };

        // Fields outside the whitelist are dropped, never rejected
        let payload = whitelist.apply(&request.payload);

        match request.action {
            Action::Get => self.list().await,
            Action::Create => self.create(require_target(&request)?, payload).await,
            Action::Update => self.update(require_target(&request)?, payload).await,
            Action::Delete => self.delete(context, require_target(&request)?).await,
        }
    }

    async fn list(&self) -> Result<ActionResponse, ManageError> {
        let users = self
            .users
            .find_all(FieldMask::WithoutPassword)
            .await
            .map_err(|e| storage_failure("Failed to list users", e))?;

        Ok(ActionResponse::many(
            users.into_iter().map(|u| u.without_password()).collect(),
        ))
    }

    async fn create(&self, email: &str, mut payload: UserPatch) -> Result<ActionResponse, ManageError> {
        let plaintext = match payload.password.take().filter(|p| !p.is_empty()) {
            Some(password) => password,
            None => self.passwords.generate(),
        };
        payload.password = Some(self.hash(&plaintext)?);

        let user = User::from_payload(email, &payload);

        match self.users.insert(user).await {
            Ok(created) => {
                tracing::info!("Created user {}", created.email);
                Ok(ActionResponse::one(created.with_password(Some(plaintext))))
            }
            Err(e) => Err(storage_failure("Failed to create user", e)),
        }
    }

    async fn update(&self, email: &str, mut payload: UserPatch) -> Result<ActionResponse, ManageError> {
        let plaintext = payload.password.take().filter(|p| !p.is_empty());
        if let Some(password) = &plaintext {
            payload.password = Some(self.hash(password)?);
        }

        // Nothing writable survived the whitelist; report the record as-is
        if payload.is_empty() {
            return match self.users.find_by_email(email, FieldMask::WithoutPassword).await {
                Ok(Some(user)) => Ok(ActionResponse::one(user.without_password())),
                Ok(None) => Err(ManageError::internal_server_error("Failed to update user")),
                Err(e) => Err(storage_failure("Failed to update user", e)),
            };
        }

        match self.users.update_by_email(email, &payload).await {
            Ok(Some(updated)) => {
                tracing::info!("Updated user {}", updated.email);
                Ok(ActionResponse::one(updated.with_password(plaintext)))
            }
            Ok(None) => {
                tracing::warn!("Update target {} does not exist", email);
                Err(ManageError::internal_server_error("Failed to update user"))
            }
            Err(e) => Err(storage_failure("Failed to update user", e)),
        }
    }

    async fn delete(&self, context: &AuthContext, email: &str) -> Result<ActionResponse, ManageError> {
        if context.self_email() == Some(email) {
            return Err(ManageError::bad_request("Cannot delete yourself"));
        }

        let existing = self
            .users
            .find_by_email(email, FieldMask::WithoutPassword)
            .await
            .map_err(|e| storage_failure("Failed to delete user", e))?;

        let Some(existing) = existing else {
            return missing_delete_target(context, email);
        };

        let removed = self
            .users
            .delete_by_email(email)
            .await
            .map_err(|e| storage_failure("Failed to delete user", e))?;

        if !removed {
            return missing_delete_target(context, email);
        }

        tracing::info!("Deleted user {}", email);

        let mut response = ActionResponse::empty();
        match self.availability.delete_all_for_user(&existing.id).await {
            Ok(count) => {
                tracing::info!("Removed {} availability records for {}", count, email);
            }
            Err(e) => {
                tracing::warn!("Availability cascade failed for {}: {}", email, e);
                response
                    .warnings
                    .push(format!("Failed to remove availability records: {}", e));
            }
        }

        Ok(response)
    }

    fn hash(&self, plaintext: &str) -> Result<String, ManageError> {
        self.passwords.hash(plaintext).map_err(|e| {
            tracing::error!("{}", e);
            ManageError::internal_server_error("Failed to process password")
        })
    }
}

fn require_target(request: &ActionRequest) -> Result<&str, ManageError> {
    request
        .target_email
        .as_deref()
        .ok_or_else(|| ManageError::bad_request("No user specified"))
}

/// Admin users get an idempotent delete; the override tier is told the
/// target does not exist.
fn missing_delete_target(context: &AuthContext, email: &str) -> Result<ActionResponse, ManageError> {
    match context {
        AuthContext::AdminOverride => Err(ManageError::not_found(format!("User {} not found", email))),
        AuthContext::Authorized { .. } | AuthContext::Unauthorized => {
            tracing::info!("Delete target {} already absent", email);
            Ok(ActionResponse::empty())
        }
    }
}

fn storage_failure(message: &str, err: RepositoryError) -> ManageError {
    match &err {
        RepositoryError::DuplicateKey(email) => {
            tracing::warn!("{}: {} already exists", message, email);
        }
        RepositoryError::Storage(_) | RepositoryError::Malformed(_) => {
            tracing::error!("{}: {}", message, err);
        }
    }
    ManageError::internal_server_error(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryAvailabilityStore, MemoryUserRepository};
    use crate::password::Argon2Passwords;
    use async_trait::async_trait;

    struct UnreachableAvailability;

    #[async_trait]
    impl AvailabilityStore for UnreachableAvailability {
        async fn delete_all_for_user(&self, _: &str) -> Result<usize, RepositoryError> {
            Err(RepositoryError::Storage("throttled".into()))
        }
    }

    async fn seeded(availability: Arc<dyn AvailabilityStore>) -> (UserManager, Arc<MemoryUserRepository>) {
        let users = Arc::new(MemoryUserRepository::new());
        users
            .insert(User::from_payload("victim@x.com", &UserPatch::default()))
            .await
            .unwrap();
        let manager = UserManager::new(users.clone(), availability, Arc::new(Argon2Passwords::default()));
        (manager, users)
    }

    #[tokio::test]
    async fn test_cascade_failure_is_reported_not_fatal() {
        let (manager, users) = seeded(Arc::new(UnreachableAvailability)).await;

        let response = manager
            .handle(
                &AuthContext::AdminOverride,
                ActionRequest::new(Action::Delete, Some("victim@x.com"), UserPatch::default()),
            )
            .await
            .unwrap();

        assert!(response.user.is_none());
        assert_eq!(response.warnings.len(), 1);
        assert!(response.warnings[0].contains("throttled"));
        assert!(users
            .find_by_email("victim@x.com", FieldMask::Full)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cascade_removes_availability() {
        let availability = Arc::new(MemoryAvailabilityStore::new());
        let (manager, users) = seeded(availability.clone()).await;
        let victim = users
            .find_by_email("victim@x.com", FieldMask::Full)
            .await
            .unwrap()
            .unwrap();
        availability.add(&victim.id, "2024-05-01").await;

        let response = manager
            .handle(
                &AuthContext::AdminOverride,
                ActionRequest::new(Action::Delete, Some("victim@x.com"), UserPatch::default()),
            )
            .await
            .unwrap();

        assert!(response.warnings.is_empty());
        assert_eq!(availability.count_for(&victim.id).await, 0);
    }

    #[tokio::test]
    async fn test_missing_target_email_is_bad_request() {
        let (manager, _) = seeded(Arc::new(MemoryAvailabilityStore::new())).await;

        for action in [Action::Create, Action::Update, Action::Delete] {
            let err = manager
                .handle(
                    &AuthContext::AdminOverride,
                    ActionRequest::new(action, None, UserPatch::default()),
                )
                .await
                .unwrap_err();
            assert_eq!(err, ManageError::bad_request("No user specified"));
        }
    }
}

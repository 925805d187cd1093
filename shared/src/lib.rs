pub mod types;
pub mod error;
pub mod config;
pub mod auth;
pub mod gate;
pub mod manage;
pub mod repository;
pub mod dynamo;
pub mod memory;
pub mod password;

use aws_sdk_dynamodb::Client as DynamoClient;
use std::sync::Arc;

use crate::auth::AuthResolver;
use crate::config::Config;
use crate::dynamo::{DynamoAvailabilityStore, DynamoUserRepository};
use crate::manage::UserManager;
use crate::password::Argon2Passwords;

/// Shared application state, built once per cold start
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub config: Config,
}

impl AppState {
    pub fn new(dynamo_client: DynamoClient, config: Config) -> Arc<Self> {
        Arc::new(Self {
            dynamo_client,
            config,
        })
    }

    /// Per-request handles over the shared client. Dropped with the request.
    pub fn services(&self) -> (AuthResolver, UserManager) {
        let users = Arc::new(DynamoUserRepository::new(
            self.dynamo_client.clone(),
            self.config.table_name.clone(),
        ));
        let availability = Arc::new(DynamoAvailabilityStore::new(
            self.dynamo_client.clone(),
            self.config.availability_table_name.clone(),
        ));
        let passwords = Arc::new(Argon2Passwords::new(self.config.generated_password_length));

        let resolver = AuthResolver::new(users.clone(), self.config.admin_override_key.clone());
        let manager = UserManager::new(users, availability, passwords);
        (resolver, manager)
    }
}

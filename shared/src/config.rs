use std::env;

use crate::password::DEFAULT_GENERATED_LENGTH;

pub const DEFAULT_TABLE_NAME: &str = "emt";

/// Settings read once at cold start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub table_name: String,
    pub availability_table_name: String,
    /// Empty or unset disables the override tier entirely
    pub admin_override_key: Option<String>,
    pub generated_password_length: usize,
    /// Accept `X-User-Email` as identity (local development only)
    pub trust_identity_header: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let table_name = lookup("TABLE_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());

        let availability_table_name = lookup("AVAILABILITY_TABLE_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| table_name.clone());

        let generated_password_length = lookup("GENERATED_PASSWORD_LENGTH")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_GENERATED_LENGTH);

        let trust_identity_header = lookup("TRUST_IDENTITY_HEADER")
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            table_name,
            availability_table_name,
            admin_override_key: lookup("ADMIN_OVERRIDE_KEY").filter(|v| !v.is_empty()),
            generated_password_length,
            trust_identity_header,
        }
    }
}

use argon2::{
    password_hash::{rand_core::OsRng as SaltRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use thiserror::Error;

pub const DEFAULT_GENERATED_LENGTH: usize = 16;
pub const MIN_GENERATED_LENGTH: usize = 8;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Hashes passwords and mints new ones
pub trait PasswordService: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError>;

    /// Fresh random plaintext password
    fn generate(&self) -> String;
}

/// Argon2id hashing with OS-random salts and generated passwords
#[derive(Debug, Clone)]
pub struct Argon2Passwords {
    generated_length: usize,
}

impl Argon2Passwords {
    pub fn new(generated_length: usize) -> Self {
        Self {
            generated_length: generated_length.max(MIN_GENERATED_LENGTH),
        }
    }
}

impl Default for Argon2Passwords {
    fn default() -> Self {
        Self::new(DEFAULT_GENERATED_LENGTH)
    }
}

impl PasswordService for Argon2Passwords {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut SaltRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    fn generate(&self) -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(self.generated_length)
            .map(char::from)
            .collect()
    }
}

/// Check a plaintext password against a stored PHC hash string
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

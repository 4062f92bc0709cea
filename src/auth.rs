//! Account store used to gate the camera commands.
//!
//! Passwords are kept as salted SHA-256 digests; plaintext never leaves the
//! call that received it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const SALT_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("username and password are required")]
    MissingCredentials,
    #[error("username '{0}' is already taken")]
    UsernameTaken(String),
    #[error("invalid username or password")]
    InvalidCredentials,
}

pub trait AuthStore: Send + Sync {
    fn sign_up(&self, username: &str, password: &str) -> Result<(), AuthError>;
    fn log_in(&self, username: &str, password: &str) -> Result<(), AuthError>;
}

struct Credential {
    salt: [u8; SALT_LEN],
    digest: String,
}

#[derive(Default)]
pub struct InMemoryAuthStore {
    users: Mutex<HashMap<String, Credential>>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_count(&self) -> usize {
        self.users().len()
    }

    fn users(&self) -> MutexGuard<'_, HashMap<String, Credential>> {
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn require(username: &str, password: &str) -> Result<(), AuthError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(())
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl AuthStore for InMemoryAuthStore {
    fn sign_up(&self, username: &str, password: &str) -> Result<(), AuthError> {
        require(username, password)?;
        let username = username.trim();
        let mut users = self.users();
        if users.contains_key(username) {
            return Err(AuthError::UsernameTaken(username.to_string()));
        }
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let credential = Credential {
            digest: digest(&salt, password),
            salt,
        };
        users.insert(username.to_string(), credential);
        log::info!("auth: registered user {}", username);
        Ok(())
    }

    fn log_in(&self, username: &str, password: &str) -> Result<(), AuthError> {
        require(username, password)?;
        let users = self.users();
        let credential = users
            .get(username.trim())
            .ok_or(AuthError::InvalidCredentials)?;
        if digest(&credential.salt, password) != credential.digest {
            log::warn!("auth: rejected login for {}", username.trim());
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }
}

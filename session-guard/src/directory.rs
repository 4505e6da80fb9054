//! User directory seam.
//!
//! The directory is the only authority on who exists, how their password
//! verifies and what their current revocation counter is. The guards never
//! cache that last value.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Authenticated identity as exposed to request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    pub name: String,
}

/// Directory entry backing an identity.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub identity: Identity,
    pub password_hash: String,
    /// Revocation counter; bumped by "logout everywhere"
    pub token_version: u64,
}

/// Account creation input.
///
/// Only trusted callers set `role_id`; self-registration always leaves it
/// unset.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role_id: Option<String>,
}

/// Lookup and credential operations the guards need from the user store.
pub trait UserDirectory: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, DirectoryError>;

    fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError>;

    /// Check a plaintext password against the stored hash.
    fn verify_password(&self, user: &UserRecord, password: &str) -> Result<bool, DirectoryError>;

    /// Reject a login whose email matched no user, at the cost of a real
    /// password check.
    fn verify_unknown_user(&self, password: &str) {
        verify_password_hash(password, unknown_user_hash());
    }

    /// Create a user with a freshly hashed password and counter 0.
    fn create_user(&self, user: NewUser) -> Result<UserRecord, DirectoryError>;

    /// Increment the revocation counter and return the new value.
    fn increment_token_version(&self, id: &str) -> Result<u64, DirectoryError>;
}

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> Result<String, DirectoryError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| DirectoryError::PasswordHash(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| DirectoryError::PasswordHash(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DirectoryError::PasswordHash(e.to_string()))
}

/// Verify a password against an Argon2 PHC string.
pub fn verify_password_hash(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Hash that no submitted password is expected to match, computed once.
fn unknown_user_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password("unknown-user-placeholder").unwrap_or_default())
}

/// In-process directory for tests and the demo server.
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
    next_id: AtomicU64,
    default_role: String,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            default_role: "member".to_string(),
        }
    }

    pub fn with_default_role(role: impl Into<String>) -> Self {
        Self {
            default_role: role.into(),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().map(|users| users.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> DirectoryError {
        DirectoryError::Unavailable("directory lock poisoned".to_string())
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory for InMemoryDirectory {
    fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users.get(id).cloned())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users
            .values()
            .find(|user| user.identity.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn verify_password(&self, user: &UserRecord, password: &str) -> Result<bool, DirectoryError> {
        Ok(verify_password_hash(password, &user.password_hash))
    }

    fn create_user(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        // Hash before taking the lock
        let password_hash = hash_password(&user.password)?;

        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        if users
            .values()
            .any(|existing| existing.identity.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(DirectoryError::EmailTaken(user.email));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let record = UserRecord {
            identity: Identity {
                id: id.clone(),
                email: user.email,
                role: self.default_role.clone(),
                role_id: user.role_id,
                name: user.name,
            },
            password_hash,
            token_version: 0,
        };
        users.insert(id, record.clone());
        Ok(record)
    }

    fn increment_token_version(&self, id: &str) -> Result<u64, DirectoryError> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        let user = users
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;
        user.token_version += 1;
        Ok(user.token_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password: "correct horse battery".to_string(),
            name: "Ada".to_string(),
            role_id: None,
        }
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password_hash("s3cret-pass", &hash));
        assert!(!verify_password_hash("wrong", &hash));
        assert!(!verify_password_hash("s3cret-pass", "not-a-phc-string"));
    }

    #[test]
    fn test_unknown_user_hash_is_real_argon2() {
        let hash = unknown_user_hash();
        assert!(hash.starts_with("$argon2"));
        assert!(std::ptr::eq(hash, unknown_user_hash()));
        assert!(!verify_password_hash("correct horse battery", hash));

        InMemoryDirectory::new().verify_unknown_user("correct horse battery");
    }

    #[test]
    fn test_create_and_lookup() {
        let directory = InMemoryDirectory::new();
        let created = directory.create_user(new_user("ada@example.com")).unwrap();

        assert_eq!(created.token_version, 0);
        assert_eq!(created.identity.role, "member");

        let by_id = directory.find_by_id(&created.identity.id).unwrap().unwrap();
        assert_eq!(by_id.identity, created.identity);

        let by_email = directory.find_by_email("ADA@example.com").unwrap().unwrap();
        assert_eq!(by_email.identity.id, created.identity.id);

        assert!(directory.find_by_id("999").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let directory = InMemoryDirectory::new();
        directory.create_user(new_user("ada@example.com")).unwrap();

        let result = directory.create_user(new_user("ada@example.com"));
        assert!(matches!(result, Err(DirectoryError::EmailTaken(_))));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_verify_password_through_directory() {
        let directory = InMemoryDirectory::new();
        let user = directory.create_user(new_user("ada@example.com")).unwrap();

        assert!(directory
            .verify_password(&user, "correct horse battery")
            .unwrap());
        assert!(!directory.verify_password(&user, "incorrect").unwrap());
    }

    #[test]
    fn test_increment_token_version() {
        let directory = InMemoryDirectory::new();
        let user = directory.create_user(new_user("ada@example.com")).unwrap();

        assert_eq!(directory.increment_token_version(&user.identity.id).unwrap(), 1);
        assert_eq!(directory.increment_token_version(&user.identity.id).unwrap(), 2);
        assert!(matches!(
            directory.increment_token_version("missing"),
            Err(DirectoryError::NotFound(_))
        ));
    }
}

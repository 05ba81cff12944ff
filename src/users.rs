//! User lookup for login and refresh.
//!
//! The session core does not own user storage. Any backend that can answer
//! "who is this username" implements [`UserDirectory`]; [`MemoryDirectory`]
//! serves small deployments and tests from a JSON file.

use std::collections::HashMap;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::jwt::Identity;

/// A stored user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Argon2 PHC string
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity {
            subject: self.username.clone(),
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Source of user records.
pub trait UserDirectory: Send + Sync {
    fn find<'a>(&'a self, username: &'a str)
    -> BoxFuture<'a, Result<Option<UserRecord>, DirectoryError>>;
}

/// Look up `username` and check `password`. `Ok(None)` covers both unknown user and wrong password.
pub async fn authenticate(
    directory: &dyn UserDirectory,
    username: &str,
    password: &str,
) -> Result<Option<UserRecord>, DirectoryError> {
    let Some(user) = directory.find(username).await? else {
        return Ok(None);
    };
    Ok(verify_password(password, &user.password_hash).then_some(user))
}

fn salt() -> Result<SaltString, DirectoryError> {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    SaltString::encode_b64(&bytes).map_err(|e| DirectoryError::Hash(e.to_string()))
}

pub fn hash_password(password: &str) -> Result<String, DirectoryError> {
    Argon2::default()
        .hash_password(password.as_bytes(), &salt()?)
        .map(|h| h.to_string())
        .map_err(|e| DirectoryError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .ok()
        .as_ref()
        .map(|hash| {
            Argon2::default()
                .verify_password(password.as_bytes(), hash)
                .is_ok()
        })
        .unwrap_or(false)
}

/// In-memory directory keyed by username.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    users: HashMap<String, UserRecord>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: records
                .into_iter()
                .map(|r| (r.username.clone(), r))
                .collect(),
        }
    }

    /// Load a JSON array of [`UserRecord`]s.
    pub fn load(path: &str) -> Result<Self, DirectoryError> {
        let content = std::fs::read_to_string(path).map_err(DirectoryError::Io)?;
        let records: Vec<UserRecord> =
            serde_json::from_str(&content).map_err(DirectoryError::Parse)?;
        Ok(Self::from_records(records))
    }

    /// Add a user, hashing the plaintext password.
    pub fn with_user(
        mut self,
        username: &str,
        password: &str,
        roles: &[&str],
        permissions: &[&str],
    ) -> Result<Self, DirectoryError> {
        let record = UserRecord {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            roles: roles.iter().map(|s| s.to_string()).collect(),
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
        };
        self.users.insert(record.username.clone(), record);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for MemoryDirectory {
    fn find<'a>(
        &'a self,
        username: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserRecord>, DirectoryError>> {
        let found = self.users.get(username).cloned();
        async move { Ok(found) }.boxed()
    }
}

/// Errors from user lookup or password hashing.
#[derive(Debug)]
pub enum DirectoryError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Hash(String),
    /// Failure reported by an external backend
    Backend(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::Io(e) => write!(f, "Failed to read users file: {}", e),
            DirectoryError::Parse(e) => write!(f, "Failed to parse users file: {}", e),
            DirectoryError::Hash(e) => write!(f, "Failed to hash password: {}", e),
            DirectoryError::Backend(e) => write!(f, "User directory error: {}", e),
        }
    }
}

impl std::error::Error for DirectoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_user("alice", "correct horse", &["editor"], &["announcements:write"])
            .unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let directory = directory();

        let user = authenticate(&directory, "alice", "correct horse")
            .await
            .unwrap()
            .expect("valid credentials");
        assert_eq!(user.identity().permissions, vec!["announcements:write"]);

        assert!(
            authenticate(&directory, "alice", "wrong")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            authenticate(&directory, "bob", "correct horse")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_records_deserialize_with_defaults() {
        let records: Vec<UserRecord> =
            serde_json::from_str(r#"[{"username": "carol", "password_hash": "x"}]"#).unwrap();
        let directory = MemoryDirectory::from_records(records);
        assert_eq!(directory.len(), 1);
    }
}

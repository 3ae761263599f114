//! Credential lookup for executors.
//!
//! Stored secrets are ciphertext; turning them into usable values is the
//! job of a [`Cipher`], which the engine treats as opaque.

use crate::error::StoreError;
use async_trait::async_trait;
use flowforge_core::{CredentialId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A credential as stored; `value` is still encrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub name: String,
    pub value: String,
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Error from decrypting a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptError {
    pub reason: String,
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "credential decryption failed: {}", self.reason)
    }
}

impl std::error::Error for DecryptError {}

/// Reads credentials owned by a user.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the credential, or `None` if it does not exist for this user.
    async fn credential(
        &self,
        user_id: UserId,
        credential_id: CredentialId,
    ) -> Result<Option<StoredCredential>, StoreError>;
}

/// Opaque decrypt operation for stored credential values.
pub trait Cipher: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError>;
}

/// Cipher for deployments that store credentials unencrypted.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextCipher;

impl Cipher for PlaintextCipher {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        Ok(ciphertext.to_string())
    }
}

/// Credential store held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCredentialStore {
    credentials: Arc<Mutex<HashMap<CredentialId, StoredCredential>>>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: StoredCredential) {
        if let Ok(mut credentials) = self.credentials.lock() {
            credentials.insert(credential.id, credential);
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn credential(
        &self,
        user_id: UserId,
        credential_id: CredentialId,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let credentials = self.credentials.lock().map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })?;
        Ok(credentials
            .get(&credential_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(user_id: UserId) -> StoredCredential {
        StoredCredential {
            id: CredentialId::new(),
            user_id,
            name: "api".to_string(),
            value: "s3cret".to_string(),
        }
    }

    #[tokio::test]
    async fn credentials_are_scoped_to_their_owner() {
        let store = InMemoryCredentialStore::new();
        let owner = UserId::new();
        let cred = credential(owner);
        let id = cred.id;
        store.insert(cred);

        assert!(store.credential(owner, id).await.expect("lookup").is_some());
        assert!(store.credential(UserId::new(), id).await.expect("lookup").is_none());
    }

    #[test]
    fn debug_output_redacts_value() {
        let rendered = format!("{:?}", credential(UserId::new()));
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("REDACTED"));
    }
}

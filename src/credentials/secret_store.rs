//! Durable secret storage capability.
//!
//! The concrete medium (OS keychain, encrypted file, cloud secret manager)
//! is supplied by the host. The credential store writes through to it and
//! falls back to it after its in-memory cache has been dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use zeroize::Zeroize;

use crate::credentials::types::{CredentialError, CredentialResult};

/// Opaque blob storage keyed by service id.
pub trait SecretStore: Send + Sync {
    /// Store `secret` under `key`, replacing any previous value.
    fn store(&self, key: &str, secret: &[u8]) -> CredentialResult<()>;

    /// Read the blob stored under `key`, if any.
    fn retrieve(&self, key: &str) -> CredentialResult<Option<Vec<u8>>>;

    /// Delete the blob stored under `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> CredentialResult<()>;
}

/// Process-local secret store, for hosts without a keychain and for tests.
#[derive(Default)]
pub struct InMemorySecretStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for InMemorySecretStore {
    fn store(&self, key: &str, secret: &[u8]) -> CredentialResult<()> {
        let mut blobs = self.blobs.lock().map_err(|_| CredentialError::LockPoisoned)?;
        if let Some(mut previous) = blobs.insert(key.to_string(), secret.to_vec()) {
            previous.zeroize();
        }
        Ok(())
    }

    fn retrieve(&self, key: &str) -> CredentialResult<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| CredentialError::LockPoisoned)?;
        Ok(blobs.get(key).cloned())
    }

    fn delete(&self, key: &str) -> CredentialResult<()> {
        let mut blobs = self.blobs.lock().map_err(|_| CredentialError::LockPoisoned)?;
        if let Some(mut removed) = blobs.remove(key) {
            removed.zeroize();
        }
        Ok(())
    }
}

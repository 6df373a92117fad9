//! Encrypted in-process credential cache.
//!
//! # Responsibilities
//! - Hold each service's active secret encrypted under a per-process key
//! - Decrypt on demand, enforcing expiry
//! - Wipe secret memory on clear, rotation and memory pressure
//! - Write through to an optional durable [`SecretStore`]
//!
//! # Design Decisions
//! - XChaCha20-Poly1305 with a random 24-byte nonce per entry; the service
//!   id is bound as associated data so entries cannot be swapped between services
//! - The cipher key is generated at construction and never leaves the process
//! - Mutations take the write lock only for the map update; encryption and
//!   decryption happen outside it

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::credentials::audit::{AuditOperation, AuditOutcome, AuditRecord, AuditSink};
use crate::credentials::secret_store::SecretStore;
use crate::credentials::types::{
    Credential, CredentialError, CredentialMetadata, CredentialResult, Secret,
};

const NONCE_LEN: usize = 24;

/// A stored credential: descriptor plus encrypted secret.
struct Entry {
    credential: Credential,
    ciphertext: Vec<u8>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.ciphertext.zeroize();
    }
}

/// Overwrite an entry's ciphertext with zeroes and check the result before
/// the allocation is released.
fn wipe_entry(mut entry: Entry) -> CredentialResult<()> {
    entry.ciphertext.as_mut_slice().zeroize();
    if entry.ciphertext.iter().any(|b| *b != 0) {
        return Err(CredentialError::MemoryWipeFailed(entry.credential.service_id.clone()));
    }
    Ok(())
}

/// Secret previously active for a service, handed back by [`SecureCredentialStore::swap_active`].
pub(crate) struct Backup {
    pub credential: Credential,
    pub secret: Secret,
}

/// In-process credential store.
pub struct SecureCredentialStore {
    cipher_key: Zeroizing<[u8; 32]>,
    entries: RwLock<HashMap<String, Entry>>,
    audit: Arc<dyn AuditSink>,
    backing: Option<Arc<dyn SecretStore>>,
}

impl SecureCredentialStore {
    /// Create an empty store with a fresh cipher key.
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut key[..]);
        Self {
            cipher_key: key,
            entries: RwLock::new(HashMap::new()),
            audit,
            backing: None,
        }
    }

    /// Write through to `backing` and fall back to it on cache misses.
    pub fn with_backing(mut self, backing: Arc<dyn SecretStore>) -> Self {
        self.backing = Some(backing);
        self
    }

    /// Encrypt and hold `secret` as the active credential for `service_id`.
    pub fn store(
        &self,
        secret: &[u8],
        service_id: &str,
        metadata: CredentialMetadata,
    ) -> CredentialResult<Credential> {
        let result = self.store_inner(secret, service_id, metadata);
        self.audit_result(service_id, AuditOperation::Store, &result);
        result
    }

    fn store_inner(
        &self,
        secret: &[u8],
        service_id: &str,
        metadata: CredentialMetadata,
    ) -> CredentialResult<Credential> {
        if secret.is_empty() {
            return Err(CredentialError::InvalidInput("secret is empty".to_string()));
        }
        if service_id.is_empty() {
            return Err(CredentialError::InvalidInput("service id is empty".to_string()));
        }

        let credential = Credential::new(service_id, metadata, None);
        let entry = Entry {
            credential: credential.clone(),
            ciphertext: self.encrypt(service_id, secret)?,
        };

        if let Some(backing) = &self.backing {
            backing.store(service_id, secret)?;
        }

        let previous = {
            let mut entries = self.entries.write().map_err(|_| CredentialError::LockPoisoned)?;
            entries.insert(service_id.to_string(), entry)
        };
        if let Some(previous) = previous {
            wipe_entry(previous)?;
        }

        Ok(credential)
    }

    /// Decrypt the active secret for `service_id`.
    pub fn retrieve(&self, service_id: &str) -> CredentialResult<Secret> {
        let result = self.retrieve_inner(service_id);
        self.audit_result(service_id, AuditOperation::Retrieve, &result);
        result
    }

    fn retrieve_inner(&self, service_id: &str) -> CredentialResult<Secret> {
        match self.decrypt_active(service_id) {
            Err(CredentialError::KeyNotFound(_)) => self.reload_from_backing(service_id),
            other => other,
        }
    }

    /// Descriptor of the active credential, without touching the secret.
    pub fn credential(&self, service_id: &str) -> Option<Credential> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(service_id).map(|e| e.credential.clone()))
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.credential(service_id).is_some()
    }

    /// Number of credentials currently cached in memory.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipe and remove the credential for `service_id`, including its copy
    /// in the backing store.
    pub fn clear(&self, service_id: &str) -> CredentialResult<()> {
        let result = self.clear_inner(service_id);
        self.audit_result(service_id, AuditOperation::Clear, &result);
        result
    }

    fn clear_inner(&self, service_id: &str) -> CredentialResult<()> {
        let removed = {
            let mut entries = self.entries.write().map_err(|_| CredentialError::LockPoisoned)?;
            entries.remove(service_id)
        };
        if let Some(entry) = removed {
            wipe_entry(entry)?;
        }
        if let Some(backing) = &self.backing {
            backing.delete(service_id)?;
        }
        Ok(())
    }

    /// Drop every in-memory entry. The backing store is left intact so
    /// credentials can be reloaded on demand.
    pub fn handle_memory_pressure(&self) -> CredentialResult<usize> {
        let drained: Vec<Entry> = {
            let mut entries = self.entries.write().map_err(|_| CredentialError::LockPoisoned)?;
            entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        let mut failure = None;
        for entry in drained {
            if let Err(e) = wipe_entry(entry) {
                failure = Some(e);
            }
        }

        let result = match failure {
            Some(e) => Err(e),
            None => Ok(count),
        };
        self.audit_result("*", AuditOperation::MemoryPressure, &result);
        tracing::info!(cleared = count, "Cleared credential cache under memory pressure");
        result
    }

    /// Atomically replace the active credential, returning the previous one.
    ///
    /// Concurrent readers observe either the old or the new entry. The
    /// previous secret is decrypted under the same write guard before the
    /// insert, so an error leaves the active entry untouched.
    pub(crate) fn swap_active(
        &self,
        service_id: &str,
        secret: &[u8],
        metadata: CredentialMetadata,
        rotation_id: Uuid,
    ) -> CredentialResult<(Credential, Option<Backup>)> {
        if secret.is_empty() {
            return Err(CredentialError::InvalidInput("secret is empty".to_string()));
        }
        let credential = Credential::new(service_id, metadata, Some(rotation_id));
        let entry = Entry {
            credential: credential.clone(),
            ciphertext: self.encrypt(service_id, secret)?,
        };

        let (backup, displaced) = {
            let mut entries = self.entries.write().map_err(|_| CredentialError::LockPoisoned)?;
            let backup = match entries.get(service_id) {
                Some(previous) => Some(Backup {
                    credential: previous.credential.clone(),
                    secret: self.decrypt_entry(service_id, previous)?,
                }),
                None => None,
            };
            (backup, entries.insert(service_id.to_string(), entry))
        };

        if let Some(displaced) = displaced {
            // The backup holds the secret now; a failed wipe must not lose it.
            if let Err(e) = wipe_entry(displaced) {
                tracing::error!(service_id = %service_id, error = %e, "Failed to wipe displaced credential");
                self.audit_result::<()>(service_id, AuditOperation::Wipe, &Err(e));
            }
        }
        Ok((credential, backup))
    }

    /// Put `backup` back as the active credential, or remove the entry if
    /// there was nothing to back up.
    pub(crate) fn restore(&self, service_id: &str, backup: Option<&Backup>) -> CredentialResult<()> {
        let replacement = match backup {
            Some(backup) => Some(Entry {
                credential: backup.credential.clone(),
                ciphertext: self.encrypt(service_id, backup.secret.expose())?,
            }),
            None => None,
        };

        let displaced = {
            let mut entries = self.entries.write().map_err(|_| CredentialError::LockPoisoned)?;
            match replacement {
                Some(entry) => entries.insert(service_id.to_string(), entry),
                None => entries.remove(service_id),
            }
        };
        if let Some(displaced) = displaced {
            wipe_entry(displaced)?;
        }

        if let Some(backing) = &self.backing {
            match backup {
                Some(backup) => backing.store(service_id, backup.secret.expose())?,
                None => backing.delete(service_id)?,
            }
        }
        Ok(())
    }

    /// Write the secret to the backing store, if one is configured.
    pub(crate) fn persist(&self, service_id: &str, secret: &[u8]) -> CredentialResult<()> {
        match &self.backing {
            Some(backing) => backing.store(service_id, secret),
            None => Ok(()),
        }
    }

    /// Decrypt the active secret without emitting an audit record.
    pub(crate) fn decrypt_active(&self, service_id: &str) -> CredentialResult<Secret> {
        let entries = self.entries.read().map_err(|_| CredentialError::LockPoisoned)?;
        let entry = entries
            .get(service_id)
            .ok_or_else(|| CredentialError::KeyNotFound(service_id.to_string()))?;
        if entry.credential.is_expired_at(SystemTime::now()) {
            return Err(CredentialError::KeyExpired(service_id.to_string()));
        }
        self.decrypt_entry(service_id, entry)
    }

    pub(crate) fn audit_sink(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit)
    }

    pub(crate) fn audit_result<T>(
        &self,
        service_id: &str,
        operation: AuditOperation,
        result: &CredentialResult<T>,
    ) {
        let outcome = match result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.kind()),
        };
        self.audit
            .credential_event(AuditRecord::new(service_id, operation, outcome));
    }

    fn reload_from_backing(&self, service_id: &str) -> CredentialResult<Secret> {
        let backing = self
            .backing
            .as_ref()
            .ok_or_else(|| CredentialError::KeyNotFound(service_id.to_string()))?;
        let bytes = backing
            .retrieve(service_id)?
            .ok_or_else(|| CredentialError::KeyNotFound(service_id.to_string()))?;
        let secret = Secret::new(bytes);

        let entry = Entry {
            credential: Credential::new(service_id, CredentialMetadata::default(), None),
            ciphertext: self.encrypt(service_id, secret.expose())?,
        };
        let mut entries = self.entries.write().map_err(|_| CredentialError::LockPoisoned)?;
        entries.entry(service_id.to_string()).or_insert(entry);
        tracing::debug!(service_id = %service_id, "Reloaded credential from backing store");
        Ok(secret)
    }

    fn encrypt(&self, service_id: &str, plaintext: &[u8]) -> CredentialResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.cipher_key[..]));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: service_id.as_bytes(),
                },
            )
            .map_err(|err| CredentialError::Crypto(err.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_entry(&self, service_id: &str, entry: &Entry) -> CredentialResult<Secret> {
        if entry.ciphertext.len() < NONCE_LEN {
            return Err(CredentialError::Crypto("ciphertext too short".to_string()));
        }
        let (nonce_bytes, payload) = entry.ciphertext.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.cipher_key[..]));
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(nonce_bytes),
                Payload {
                    msg: payload,
                    aad: service_id.as_bytes(),
                },
            )
            .map_err(|err| CredentialError::Crypto(err.to_string()))?;
        Ok(Secret::new(plaintext))
    }
}

#[cfg(test)]
impl SecureCredentialStore {
    /// Flip one ciphertext bit so decryption of `service_id` fails; flipping
    /// again restores the entry.
    pub(crate) fn flip_ciphertext_bit(&self, service_id: &str) {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.get_mut(service_id).unwrap();
        let last = entry.ciphertext.len() - 1;
        entry.ciphertext[last] ^= 0x01;
    }
}

impl std::fmt::Debug for SecureCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCredentialStore")
            .field("entries", &self.len())
            .field("backing", &self.backing.is_some())
            .finish()
    }
}

//! Transactional credential rotation with a dual-validity grace window.
//!
//! # Steps
//! ```text
//! validate new key
//!     → back up current credential and activate new one (one atomic swap)
//!     → persist to backing store
//!     → read back and verify
//!     → schedule wipe of the backup after the grace period
//! any failure after the swap → restore backup, mark rolled_back
//! ```
//!
//! During the grace window [`CredentialRotator::accepts`] keeps honoring the
//! superseded secret so requests signed before the swap still validate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::runtime::Handle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::credentials::audit::{AuditOperation, AuditOutcome, AuditRecord};
use crate::credentials::store::{Backup, SecureCredentialStore};
use crate::credentials::types::{
    CredentialError, CredentialMetadata, CredentialResult, RotationResult, RotationState,
    RotationTransaction, Secret,
};
use crate::credentials::validation::{validate_key, KeyFormat};
use crate::observability::metrics;

/// Rotation transactions kept for lookup.
const MAX_TRANSACTION_LOG: usize = 64;

/// A superseded secret still honored until `grace_end`.
struct Superseded {
    service_id: String,
    secret: Secret,
    grace_end: Instant,
}

/// Rotates credentials held by a [`SecureCredentialStore`].
pub struct CredentialRotator {
    store: Arc<SecureCredentialStore>,
    formats: HashMap<String, KeyFormat>,
    superseded: Arc<Mutex<HashMap<Uuid, Superseded>>>,
    transactions: Mutex<HashMap<Uuid, RotationTransaction>>,
    /// Serializes rotations; readers of the store are never blocked by it.
    rotation_lock: Mutex<()>,
}

impl CredentialRotator {
    pub fn new(store: Arc<SecureCredentialStore>) -> Self {
        Self {
            store,
            formats: HashMap::new(),
            superseded: Arc::new(Mutex::new(HashMap::new())),
            transactions: Mutex::new(HashMap::new()),
            rotation_lock: Mutex::new(()),
        }
    }

    /// Register the key format new secrets for `service_id` must match.
    pub fn with_format(mut self, service_id: &str, format: KeyFormat) -> Self {
        self.formats.insert(service_id.to_string(), format);
        self
    }

    pub fn store(&self) -> &Arc<SecureCredentialStore> {
        &self.store
    }

    /// Replace the active credential for `service_id` with `new_secret`.
    ///
    /// Either the new secret becomes visible to every subsequent `retrieve`,
    /// or the previous state is restored and an error is returned. Must be
    /// called inside a Tokio runtime when a credential is being superseded,
    /// since the wipe of the old secret is scheduled on it.
    pub fn rotate(
        &self,
        service_id: &str,
        new_secret: &[u8],
        grace_period: Duration,
    ) -> CredentialResult<RotationResult> {
        let _guard = self
            .rotation_lock
            .lock()
            .map_err(|_| CredentialError::LockPoisoned)?;

        let rotation_id = Uuid::new_v4();
        let grace_period_end = SystemTime::now() + grace_period;

        // 1. Validate
        if let Err(e) = validate_key(new_secret, self.formats.get(service_id)) {
            tracing::warn!(service_id = %service_id, error_kind = e.kind(), "Rejected rotation key");
            self.store
                .audit_result::<()>(service_id, AuditOperation::Rotate, &Err(e.clone()));
            metrics::record_rotation("rejected");
            return Err(e);
        }

        let previous = self.store.credential(service_id);
        let metadata = previous
            .as_ref()
            .map(|c| CredentialMetadata {
                expires_at: None,
                permissions: c.permissions.clone(),
            })
            .unwrap_or_default();

        self.record(RotationTransaction {
            rotation_id,
            service_id: service_id.to_string(),
            old_credential: previous,
            grace_period_end,
            state: RotationState::Pending,
        });

        // 2 + 3. Back up and activate in one swap
        let backup = match self
            .store
            .swap_active(service_id, new_secret, metadata, rotation_id)
        {
            Ok((_, backup)) => backup,
            Err(e) => {
                self.finish(rotation_id, RotationState::RolledBack);
                self.store
                    .audit_result::<()>(service_id, AuditOperation::Rotate, &Err(e.clone()));
                metrics::record_rotation("failed");
                return Err(CredentialError::RotationFailed {
                    rotation_id,
                    reason: e.to_string(),
                });
            }
        };

        // 4. Persist, verify and prepare the grace-period wipe
        let needs_runtime = backup.is_some();
        let outcome = self
            .store
            .persist(service_id, new_secret)
            .and_then(|_| self.verify_active(service_id, new_secret))
            .and_then(|_| {
                if needs_runtime {
                    Handle::try_current()
                        .map(Some)
                        .map_err(|_| CredentialError::NoRuntime)
                } else {
                    Ok(None)
                }
            });

        match outcome {
            Ok(handle) => {
                if let (Some(handle), Some(backup)) = (handle, backup) {
                    self.schedule_wipe(&handle, rotation_id, service_id, backup, grace_period);
                }
                self.finish(rotation_id, RotationState::Committed);
                self.store
                    .audit_result::<()>(service_id, AuditOperation::Rotate, &Ok(()));
                metrics::record_rotation("committed");
                tracing::info!(
                    service_id = %service_id,
                    rotation_id = %rotation_id,
                    grace_secs = grace_period.as_secs(),
                    "Credential rotated"
                );
                Ok(RotationResult {
                    rotation_id,
                    state: RotationState::Committed,
                    grace_period_end,
                })
            }
            Err(cause) => self.roll_back(rotation_id, service_id, backup.as_ref(), cause),
        }
    }

    fn roll_back(
        &self,
        rotation_id: Uuid,
        service_id: &str,
        backup: Option<&Backup>,
        cause: CredentialError,
    ) -> CredentialResult<RotationResult> {
        tracing::warn!(
            service_id = %service_id,
            rotation_id = %rotation_id,
            error = %cause,
            "Rotation failed after activation, rolling back"
        );
        let restored = self.store.restore(service_id, backup);
        self.finish(rotation_id, RotationState::RolledBack);
        self.store
            .audit_result(service_id, AuditOperation::Rollback, &restored);

        match restored {
            Ok(()) => {
                metrics::record_rotation("rolled_back");
                Err(CredentialError::RotationFailed {
                    rotation_id,
                    reason: cause.to_string(),
                })
            }
            Err(rollback_error) => {
                tracing::error!(
                    severity = "fatal",
                    service_id = %service_id,
                    rotation_id = %rotation_id,
                    cause = %cause,
                    error = %rollback_error,
                    "Credential rollback failed; credential state is unconfirmed"
                );
                metrics::record_rotation("rollback_failed");
                Err(CredentialError::RollbackFailed {
                    rotation_id,
                    reason: rollback_error.to_string(),
                })
            }
        }
    }

    fn verify_active(&self, service_id: &str, expected: &[u8]) -> CredentialResult<()> {
        let active = self.store.decrypt_active(service_id)?;
        if active.expose() != expected {
            return Err(CredentialError::Crypto(
                "active credential does not match rotated secret".to_string(),
            ));
        }
        Ok(())
    }

    fn schedule_wipe(
        &self,
        handle: &Handle,
        rotation_id: Uuid,
        service_id: &str,
        backup: Backup,
        grace_period: Duration,
    ) {
        if let Ok(mut superseded) = self.superseded.lock() {
            superseded.insert(
                rotation_id,
                Superseded {
                    service_id: service_id.to_string(),
                    secret: backup.secret,
                    grace_end: Instant::now() + grace_period,
                },
            );
        }

        let superseded = Arc::clone(&self.superseded);
        let audit = self.store.audit_sink();
        handle.spawn(async move {
            tokio::time::sleep(grace_period).await;
            let removed = superseded
                .lock()
                .ok()
                .and_then(|mut map| map.remove(&rotation_id));
            if let Some(entry) = removed {
                audit.credential_event(AuditRecord::new(
                    &entry.service_id,
                    AuditOperation::Wipe,
                    AuditOutcome::Success,
                ));
                tracing::info!(
                    service_id = %entry.service_id,
                    rotation_id = %rotation_id,
                    "Grace period ended, superseded credential wiped"
                );
            }
        });
    }

    /// True if `presented` is the active credential or a superseded one
    /// still inside its grace window.
    pub fn accepts(&self, service_id: &str, presented: &[u8]) -> bool {
        if let Ok(active) = self.store.decrypt_active(service_id) {
            if active.expose() == presented {
                return true;
            }
        }

        self.sweep_expired();
        let now = Instant::now();
        self.superseded
            .lock()
            .map(|map| {
                map.values().any(|s| {
                    s.service_id == service_id && s.grace_end > now && s.secret.expose() == presented
                })
            })
            .unwrap_or(false)
    }

    /// Number of superseded credentials still awaiting their wipe.
    pub fn pending_wipes(&self) -> usize {
        self.sweep_expired();
        self.superseded.lock().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether the active credential is older than `period`.
    pub fn rotation_due(&self, service_id: &str, period: Duration) -> CredentialResult<bool> {
        let credential = self
            .store
            .credential(service_id)
            .ok_or_else(|| CredentialError::KeyNotFound(service_id.to_string()))?;
        let age = SystemTime::now()
            .duration_since(credential.created_at)
            .unwrap_or_default();
        Ok(age >= period)
    }

    /// Look up a rotation by id.
    pub fn transaction(&self, rotation_id: Uuid) -> Option<RotationTransaction> {
        self.transactions
            .lock()
            .ok()
            .and_then(|map| map.get(&rotation_id).cloned())
    }

    /// Drop superseded secrets whose grace window has passed, in case the
    /// scheduled wipe has not run yet.
    fn sweep_expired(&self) {
        let now = Instant::now();
        if let Ok(mut map) = self.superseded.lock() {
            map.retain(|_, s| s.grace_end > now);
        }
    }

    /// Log `transaction`, first dropping terminal transactions whose grace
    /// period has ended and then the oldest terminal ones beyond the cap.
    fn record(&self, transaction: RotationTransaction) {
        if let Ok(mut map) = self.transactions.lock() {
            let now = SystemTime::now();
            map.retain(|_, tx| tx.state == RotationState::Pending || tx.grace_period_end > now);

            if map.len() >= MAX_TRANSACTION_LOG {
                let mut terminal: Vec<(SystemTime, Uuid)> = map
                    .values()
                    .filter(|tx| tx.state != RotationState::Pending)
                    .map(|tx| (tx.grace_period_end, tx.rotation_id))
                    .collect();
                terminal.sort();
                let excess = map.len() + 1 - MAX_TRANSACTION_LOG;
                for (_, id) in terminal.into_iter().take(excess) {
                    map.remove(&id);
                }
            }

            map.insert(transaction.rotation_id, transaction);
        }
    }

    #[cfg(test)]
    fn transaction_count(&self) -> usize {
        self.transactions.lock().map(|map| map.len()).unwrap_or(0)
    }

    fn finish(&self, rotation_id: Uuid, state: RotationState) {
        if let Ok(mut map) = self.transactions.lock() {
            if let Some(tx) = map.get_mut(&rotation_id) {
                tx.state = state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::audit::MemoryAuditSink;
    use crate::credentials::secret_store::{InMemorySecretStore, SecretStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backing store whose writes fail once `fail_after` writes have succeeded.
    struct FlakySecretStore {
        inner: InMemorySecretStore,
        writes: AtomicUsize,
        fail_after: usize,
    }

    impl FlakySecretStore {
        fn new(fail_after: usize) -> Self {
            Self {
                inner: InMemorySecretStore::new(),
                writes: AtomicUsize::new(0),
                fail_after,
            }
        }
    }

    impl SecretStore for FlakySecretStore {
        fn store(&self, key: &str, secret: &[u8]) -> CredentialResult<()> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(CredentialError::Backing("keychain unavailable".into()));
            }
            self.inner.store(key, secret)
        }

        fn retrieve(&self, key: &str) -> CredentialResult<Option<Vec<u8>>> {
            self.inner.retrieve(key)
        }

        fn delete(&self, key: &str) -> CredentialResult<()> {
            self.inner.delete(key)
        }
    }

    fn rotator() -> CredentialRotator {
        let store = SecureCredentialStore::new(Arc::new(MemoryAuditSink::new()));
        CredentialRotator::new(Arc::new(store))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_with_grace_period() {
        let rotator = rotator();
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();

        let result = rotator
            .rotate("gemini", b"AIza_new", Duration::from_secs(300))
            .unwrap();
        assert!(result.success());
        assert_eq!(rotator.store().retrieve("gemini").unwrap().expose(), b"AIza_new");
        assert!(rotator.accepts("gemini", b"AIza_new"));
        assert!(rotator.accepts("gemini", b"AIza_old"));
        assert_eq!(rotator.pending_wipes(), 1);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(rotator.accepts("gemini", b"AIza_old"));

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!rotator.accepts("gemini", b"AIza_old"));
        assert!(rotator.accepts("gemini", b"AIza_new"));
        assert_eq!(rotator.pending_wipes(), 0);

        let tx = rotator.transaction(result.rotation_id).unwrap();
        assert_eq!(tx.state, RotationState::Committed);
        assert!(tx.old_credential.is_some());
    }

    #[tokio::test]
    async fn test_rotation_rejects_placeholder() {
        let rotator = rotator();
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();

        let err = rotator
            .rotate("gemini", b"test_key", Duration::from_secs(60))
            .unwrap_err();
        assert_eq!(err, CredentialError::TestKeyDetected);
        assert_eq!(rotator.store().retrieve("gemini").unwrap().expose(), b"AIza_old");
    }

    #[tokio::test]
    async fn test_rotation_enforces_service_format() {
        let rotator = rotator().with_format("gemini", KeyFormat::new(Some("AIza"), 8));
        let err = rotator
            .rotate("gemini", b"sk-abcdefgh", Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, CredentialError::InvalidFormat(_)));
        assert!(!rotator.store().contains("gemini"));
    }

    #[tokio::test]
    async fn test_failure_after_activation_rolls_back() {
        // First write (initial store) succeeds, the rotation's persist fails,
        // the rollback write succeeds again through the in-memory restore path.
        let backing = Arc::new(FlakySecretStore::new(1));
        let store = SecureCredentialStore::new(Arc::new(MemoryAuditSink::new()))
            .with_backing(backing.clone());
        let rotator = CredentialRotator::new(Arc::new(store));
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();

        let err = rotator
            .rotate("gemini", b"AIza_new", Duration::from_secs(60))
            .unwrap_err();

        // The restore also writes to the failing backing store.
        let rotation_id = match err {
            CredentialError::RollbackFailed { rotation_id, .. } => rotation_id,
            CredentialError::RotationFailed { rotation_id, .. } => rotation_id,
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(rotator.store().retrieve("gemini").unwrap().expose(), b"AIza_old");
        assert_eq!(
            rotator.transaction(rotation_id).unwrap().state,
            RotationState::RolledBack
        );
        assert!(!rotator.accepts("gemini", b"AIza_new"));
    }

    #[tokio::test]
    async fn test_undecryptable_previous_leaves_store_unchanged() {
        let rotator = rotator();
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();
        rotator.store().flip_ciphertext_bit("gemini");

        let err = rotator
            .rotate("gemini", b"AIza_new", Duration::from_secs(60))
            .unwrap_err();
        let rotation_id = match err {
            CredentialError::RotationFailed { rotation_id, .. } => rotation_id,
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(
            rotator.transaction(rotation_id).unwrap().state,
            RotationState::RolledBack
        );
        assert_eq!(rotator.store().credential("gemini").unwrap().rotation_id, None);

        rotator.store().flip_ciphertext_bit("gemini");
        assert_eq!(rotator.store().retrieve("gemini").unwrap().expose(), b"AIza_old");
        assert!(!rotator.accepts("gemini", b"AIza_new"));
        assert_eq!(rotator.pending_wipes(), 0);
    }

    #[tokio::test]
    async fn test_transaction_log_drops_expired_entries() {
        let rotator = rotator();
        let first = rotator
            .rotate("gemini", b"AIza_first", Duration::ZERO)
            .unwrap();
        let second = rotator
            .rotate("gemini", b"AIza_second", Duration::from_secs(60))
            .unwrap();

        assert!(rotator.transaction(first.rotation_id).is_none());
        assert_eq!(
            rotator.transaction(second.rotation_id).unwrap().state,
            RotationState::Committed
        );
    }

    #[tokio::test]
    async fn test_transaction_log_is_capped() {
        let rotator = rotator();
        let mut last = None;
        for i in 0..(MAX_TRANSACTION_LOG + 10) {
            let key = format!("AIza_rotation_{i:04}");
            last = Some(
                rotator
                    .rotate("gemini", key.as_bytes(), Duration::from_secs(3_600))
                    .unwrap(),
            );
        }
        assert_eq!(rotator.transaction_count(), MAX_TRANSACTION_LOG);
        assert!(rotator.transaction(last.unwrap().rotation_id).is_some());
    }

    #[tokio::test]
    async fn test_rollback_succeeds_when_backing_recovers() {
        struct FailOnce {
            inner: InMemorySecretStore,
            failed: std::sync::atomic::AtomicBool,
        }
        impl SecretStore for FailOnce {
            fn store(&self, key: &str, secret: &[u8]) -> CredentialResult<()> {
                if secret == b"AIza_new" && !self.failed.swap(true, Ordering::SeqCst) {
                    return Err(CredentialError::Backing("transient".into()));
                }
                self.inner.store(key, secret)
            }
            fn retrieve(&self, key: &str) -> CredentialResult<Option<Vec<u8>>> {
                self.inner.retrieve(key)
            }
            fn delete(&self, key: &str) -> CredentialResult<()> {
                self.inner.delete(key)
            }
        }

        let backing = Arc::new(FailOnce {
            inner: InMemorySecretStore::new(),
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let store = SecureCredentialStore::new(Arc::new(MemoryAuditSink::new()))
            .with_backing(backing.clone());
        let rotator = CredentialRotator::new(Arc::new(store));
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();

        let err = rotator
            .rotate("gemini", b"AIza_new", Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, CredentialError::RotationFailed { .. }));
        assert_eq!(rotator.store().retrieve("gemini").unwrap().expose(), b"AIza_old");
        assert_eq!(backing.retrieve("gemini").unwrap(), Some(b"AIza_old".to_vec()));
    }

    #[tokio::test]
    async fn test_rollback_failure_is_reported() {
        let backing = Arc::new(FlakySecretStore::new(1));
        let store = SecureCredentialStore::new(Arc::new(MemoryAuditSink::new()))
            .with_backing(backing);
        let rotator = CredentialRotator::new(Arc::new(store));
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();

        let err = rotator
            .rotate("gemini", b"AIza_new", Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, CredentialError::RollbackFailed { .. }));
    }

    #[test]
    fn test_first_rotation_needs_no_runtime() {
        let rotator = rotator();
        let result = rotator
            .rotate("gemini", b"AIza_first", Duration::from_secs(60))
            .unwrap();
        assert!(result.success());
        assert_eq!(rotator.pending_wipes(), 0);
    }

    #[test]
    fn test_superseding_without_runtime_rolls_back() {
        let rotator = rotator();
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();
        let err = rotator
            .rotate("gemini", b"AIza_new", Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, CredentialError::RotationFailed { .. }));
        assert_eq!(rotator.store().retrieve("gemini").unwrap().expose(), b"AIza_old");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_retrieve_never_torn() {
        let rotator = Arc::new(rotator());
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();

        let mut readers = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(rotator.store());
            readers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    seen.push(store.retrieve("gemini").unwrap().expose().to_vec());
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        rotator
            .rotate("gemini", b"AIza_new", Duration::from_secs(60))
            .unwrap();

        for reader in readers {
            for value in reader.await.unwrap() {
                assert!(value == b"AIza_old" || value == b"AIza_new");
            }
        }
    }

    #[test]
    fn test_rotation_due() {
        let rotator = rotator();
        rotator
            .store()
            .store(b"AIza_old", "gemini", CredentialMetadata::default())
            .unwrap();
        assert!(!rotator
            .rotation_due("gemini", Duration::from_secs(90 * 24 * 3600))
            .unwrap());
        assert!(rotator.rotation_due("gemini", Duration::ZERO).unwrap());
        assert!(matches!(
            rotator.rotation_due("tts", Duration::ZERO),
            Err(CredentialError::KeyNotFound(_))
        ));
    }
}

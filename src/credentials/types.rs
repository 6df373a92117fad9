//! Credential data model and error definitions.

use std::collections::HashSet;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

/// What a credential is allowed to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Translate,
    Synthesize,
    DetectLanguage,
}

impl Permission {
    /// Every permission; used when provisioning an unrestricted key.
    pub fn all() -> HashSet<Permission> {
        [Self::Translate, Self::Synthesize, Self::DetectLanguage]
            .into_iter()
            .collect()
    }
}

/// Caller-supplied metadata attached to a stored secret.
#[derive(Debug, Clone, Default)]
pub struct CredentialMetadata {
    /// After this instant `retrieve` fails with `KeyExpired`.
    pub expires_at: Option<SystemTime>,
    pub permissions: HashSet<Permission>,
}

/// Descriptor of a stored credential.
///
/// The secret material itself never lives here; it stays encrypted inside
/// the store and is only handed out as a [`Secret`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub service_id: String,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub permissions: HashSet<Permission>,
    /// Set when the credential became active through a rotation.
    pub rotation_id: Option<Uuid>,
}

impl Credential {
    pub fn new(service_id: &str, metadata: CredentialMetadata, rotation_id: Option<Uuid>) -> Self {
        Self {
            service_id: service_id.to_string(),
            created_at: SystemTime::now(),
            expires_at: metadata.expires_at,
            permissions: metadata.permissions,
            rotation_id,
        }
    }

    /// Check if the credential has expired at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.is_empty() || self.permissions.contains(&permission)
    }
}

/// Decrypted secret material. Zeroed when dropped, never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// View the secret as UTF-8, e.g. to place it in a request header.
    pub fn expose_str(&self) -> CredentialResult<&str> {
        std::str::from_utf8(&self.0)
            .map_err(|_| CredentialError::InvalidFormat("secret is not valid UTF-8".to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Lifecycle of a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    Pending,
    Committed,
    RolledBack,
}

/// Record of one rotation attempt.
#[derive(Debug, Clone)]
pub struct RotationTransaction {
    pub rotation_id: Uuid,
    pub service_id: String,
    /// Descriptor of the credential that was active before the rotation.
    pub old_credential: Option<Credential>,
    pub grace_period_end: SystemTime,
    pub state: RotationState,
}

/// Returned by a committed rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationResult {
    pub rotation_id: Uuid,
    pub state: RotationState,
    pub grace_period_end: SystemTime,
}

impl RotationResult {
    pub fn success(&self) -> bool {
        self.state == RotationState::Committed
    }
}

/// Errors raised by the credential subsystem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no credential stored for service '{0}'")]
    KeyNotFound(String),

    #[error("credential for service '{0}' has expired")]
    KeyExpired(String),

    #[error("rejected a test or sample key")]
    TestKeyDetected,

    #[error("invalid key format: {0}")]
    InvalidFormat(String),

    #[error("encryption failure: {0}")]
    Crypto(String),

    #[error("secret memory for service '{0}' was not fully wiped")]
    MemoryWipeFailed(String),

    #[error("backing secret store error: {0}")]
    Backing(String),

    #[error("credential store lock poisoned")]
    LockPoisoned,

    #[error("no async runtime available to schedule credential wipe")]
    NoRuntime,

    #[error("rotation {rotation_id} failed and was rolled back: {reason}")]
    RotationFailed { rotation_id: Uuid, reason: String },

    /// The store may be inconsistent; never swallowed.
    #[error("rollback of rotation {rotation_id} failed: {reason}")]
    RollbackFailed { rotation_id: Uuid, reason: String },
}

impl CredentialError {
    /// Short stable name used in audit records and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::KeyNotFound(_) => "key_not_found",
            Self::KeyExpired(_) => "key_expired",
            Self::TestKeyDetected => "test_key_detected",
            Self::InvalidFormat(_) => "invalid_format",
            Self::Crypto(_) => "crypto",
            Self::MemoryWipeFailed(_) => "memory_wipe_failed",
            Self::Backing(_) => "backing",
            Self::LockPoisoned => "lock_poisoned",
            Self::NoRuntime => "no_runtime",
            Self::RotationFailed { .. } => "rotation_failed",
            Self::RollbackFailed { .. } => "rollback_failed",
        }
    }
}

/// Result type for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;

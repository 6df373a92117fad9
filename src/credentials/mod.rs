//! Credential subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     provision.rs (read secret from environment)
//!     → validation.rs (reject placeholder/test keys)
//!     → store.rs (encrypt, hold in memory, write through to SecretStore)
//!
//! Every outbound call:
//!     → store.rs retrieve (decrypt on demand, enforce expiry)
//!
//! Operator rotation:
//!     → rotation.rs (validate → swap → persist → verify → schedule wipe)
//!     → on failure: restore backup
//!
//! All operations → audit.rs (service, operation, outcome; never the secret)
//! ```
//!
//! # Design Decisions
//! - The store and rotator exclusively own credential state; other
//!   components only receive decrypted [`Secret`]s per call
//! - A single write lock guards the credential map; rotations hold it only
//!   for the swap
//! - Rollback failure is fatal-severity and always surfaced

pub mod audit;
pub mod provision;
pub mod rotation;
pub mod secret_store;
pub mod store;
pub mod types;
pub mod validation;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use rotation::CredentialRotator;
pub use secret_store::{InMemorySecretStore, SecretStore};
pub use store::SecureCredentialStore;
pub use types::{
    Credential, CredentialError, CredentialMetadata, CredentialResult, Permission, RotationResult,
    RotationState, RotationTransaction, Secret,
};

//! Startup credential provisioning.
//!
//! The secret is read from an environment-style source named by the
//! configuration and is never part of the config file itself.

use crate::config::schema::CredentialsConfig;
use crate::credentials::store::SecureCredentialStore;
use crate::credentials::types::{
    Credential, CredentialError, CredentialMetadata, CredentialResult, Permission,
};
use crate::credentials::validation::validate_key;
use zeroize::Zeroize;

/// Load the configured secret from the process environment into `store`.
pub fn provision_from_env(
    store: &SecureCredentialStore,
    config: &CredentialsConfig,
) -> CredentialResult<Credential> {
    provision_with(store, config, |name| std::env::var(name).ok())
}

/// Load the configured secret through `lookup` into `store`.
pub fn provision_with<F>(
    store: &SecureCredentialStore,
    config: &CredentialsConfig,
    lookup: F,
) -> CredentialResult<Credential>
where
    F: FnOnce(&str) -> Option<String>,
{
    let mut value = lookup(&config.secret_env_var).ok_or_else(|| {
        tracing::error!(
            variable = %config.secret_env_var,
            service_id = %config.service_id,
            "Credential source variable is not set"
        );
        CredentialError::KeyNotFound(config.service_id.clone())
    })?;

    let trimmed = value.trim().to_string();
    value.zeroize();
    let mut secret = trimmed.into_bytes();

    let result = validate_key(&secret, Some(&config.key_format())).and_then(|_| {
        store.store(
            &secret,
            &config.service_id,
            CredentialMetadata {
                expires_at: None,
                permissions: Permission::all(),
            },
        )
    });
    secret.zeroize();

    if result.is_ok() {
        tracing::info!(service_id = %config.service_id, "Credential provisioned");
    }
    result
}

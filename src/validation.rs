//! Secret name and version checks run before any network call.

use crate::{Result, VaultlinkError};

/// Maximum length of a Key Vault secret name.
const MAX_NAME_LENGTH: usize = 127;

/// Maximum length accepted for a version identifier.
const MAX_VERSION_LENGTH: usize = 64;

/// Validates a secret name.
///
/// Names are 1-127 characters of ASCII letters, digits and `-`. Anything else
/// would either be rejected by the store or change the request path.
///
/// # Errors
///
/// Returns [`VaultlinkError::InvalidSecretName`] if validation fails.
///
/// # Example
///
/// ```
/// use vaultlink::validation::validate_secret_name;
///
/// assert!(validate_secret_name("github-token").is_ok());
/// assert!(validate_secret_name("").is_err());
/// assert!(validate_secret_name("../keys").is_err());
/// ```
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VaultlinkError::InvalidSecretName(
            "name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(VaultlinkError::InvalidSecretName(format!(
            "name exceeds maximum length of {} characters",
            MAX_NAME_LENGTH
        )));
    }

    if let Some(c) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(VaultlinkError::InvalidSecretName(format!(
            "name contains invalid character {:?} (allowed: letters, digits, '-')",
            c
        )));
    }

    Ok(())
}

/// Validates a secret version. The empty string means "latest" and is valid.
pub fn validate_secret_version(version: &str) -> Result<()> {
    if version.len() > MAX_VERSION_LENGTH {
        return Err(VaultlinkError::InvalidSecretName(format!(
            "version exceeds maximum length of {} characters",
            MAX_VERSION_LENGTH
        )));
    }

    if !version.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(VaultlinkError::InvalidSecretName(format!(
            "version {:?} must be alphanumeric",
            version
        )));
    }

    Ok(())
}

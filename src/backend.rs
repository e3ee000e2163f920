//! Backend traits for secret retrieval.
//!
//! This module defines [`SecretBackend`], the one read operation every
//! discovered backend exposes, and [`SecretClient`], the remote store seam a
//! backend delegates to. Swapping the client is how tests run a real backend
//! without a network.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A configured, authenticated secret store.
///
/// Implementations must be `Send + Sync`; concurrent `get_secret` calls need
/// no external locking.
///
/// # Example
///
/// ```no_run
/// use vaultlink::SecretBackend;
///
/// async fn read_token(backend: &dyn SecretBackend) -> vaultlink::Result<String> {
///     // An empty version reads the latest one.
///     backend.get_secret("github-token", "").await
/// }
/// ```
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Returns the backend type key (e.g. "azure_key_vault").
    fn name(&self) -> &str;

    /// Fetches the value of secret `name` at `version`.
    ///
    /// An empty `version` selects the latest version. Every call is a live
    /// round-trip; values are never cached.
    ///
    /// # Errors
    ///
    /// - [`VaultlinkError::InvalidSecretName`](crate::VaultlinkError::InvalidSecretName)
    ///   before any network call if the name or version is malformed
    /// - [`VaultlinkError::ContractViolation`](crate::VaultlinkError::ContractViolation)
    ///   if the store answered without a value
    /// - Transport, credential and status errors, wrapped with the secret name
    async fn get_secret(&self, name: &str, version: &str) -> Result<String>;

    /// Fetches the latest version of secret `name`.
    async fn get_latest(&self, name: &str) -> Result<String> {
        self.get_secret(name, "").await
    }
}

/// A secret as returned by the remote store.
///
/// `value` is `None` when the store omitted it, which is distinct from an
/// empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretResponse {
    /// Secret value
    #[serde(default)]
    pub value: Option<String>,
    /// Full identifier of the secret version
    #[serde(default)]
    pub id: Option<String>,
    /// Content type recorded with the secret
    #[serde(default, rename = "contentType")]
    pub content_type: Option<String>,
}

impl SecretResponse {
    /// A response carrying `value`.
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }
}

/// Client for a remote secret store.
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Fetches secret `name` at `version` (empty for latest).
    async fn get_secret(&self, name: &str, version: &str) -> Result<SecretResponse>;
}

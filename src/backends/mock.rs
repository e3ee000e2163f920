//! Mock secret-store client for testing.
//!
//! This client keeps secrets in memory and supports error injection, so a real
//! backend can be exercised end to end without a network.

use crate::backend::{SecretClient, SecretResponse};
use crate::{Result, VaultlinkError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Builds the error returned on every `get_secret()` call.
pub type ErrorFactory = fn() -> VaultlinkError;

#[derive(Default)]
struct Stored {
    latest: Option<String>,
    versions: HashMap<String, Option<String>>,
}

/// In-memory [`SecretClient`].
///
/// # Example
///
/// ```
/// use vaultlink::backend::SecretClient;
/// use vaultlink::backends::mock::MockSecretClient;
/// use vaultlink::VaultlinkError;
///
/// #[tokio::main]
/// async fn main() -> vaultlink::Result<()> {
///     let mut client = MockSecretClient::new();
///     client.set_secret("api-key", "sk-123").await;
///
///     let response = client.get_secret("api-key", "").await?;
///     assert_eq!(response.value.as_deref(), Some("sk-123"));
///
///     // Test error conditions
///     client.get_error = Some(|| VaultlinkError::PermissionDenied("test".to_string()));
///     assert!(matches!(
///         client.get_secret("api-key", "").await,
///         Err(VaultlinkError::PermissionDenied(_))
///     ));
///
///     Ok(())
/// }
/// ```
pub struct MockSecretClient {
    secrets: Arc<RwLock<HashMap<String, Stored>>>,
    calls: AtomicUsize,

    /// Error to return from `get_secret()`
    pub get_error: Option<ErrorFactory>,
}

impl MockSecretClient {
    /// Creates a client with empty storage.
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(RwLock::new(HashMap::new())),
            calls: AtomicUsize::new(0),
            get_error: None,
        }
    }

    /// Sets the latest value of a secret.
    pub async fn set_secret(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut secrets = self.secrets.write().await;
        secrets.entry(name.into()).or_default().latest = Some(value.into());
    }

    /// Stores a specific version of a secret without changing the latest value.
    pub async fn set_version(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        value: impl Into<String>,
    ) {
        let mut secrets = self.secrets.write().await;
        secrets
            .entry(name.into())
            .or_default()
            .versions
            .insert(version.into(), Some(value.into()));
    }

    /// Registers a secret whose responses carry no value.
    pub async fn set_missing_value(&self, name: impl Into<String>) {
        let mut secrets = self.secrets.write().await;
        secrets.entry(name.into()).or_default().latest = None;
    }

    /// Number of `get_secret` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSecretClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretClient for MockSecretClient {
    async fn get_secret(&self, name: &str, version: &str) -> Result<SecretResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(make_error) = self.get_error {
            return Err(make_error());
        }

        let secrets = self.secrets.read().await;
        let stored = secrets
            .get(name)
            .ok_or_else(|| VaultlinkError::NotFound(name.to_string()))?;

        let value = if version.is_empty() {
            stored.latest.clone()
        } else {
            stored
                .versions
                .get(version)
                .cloned()
                .ok_or_else(|| VaultlinkError::NotFound(format!("{name}/{version}")))?
        };

        Ok(SecretResponse {
            value,
            id: Some(format!("mock://secrets/{name}/{version}")),
            content_type: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_and_versions() {
        let client = MockSecretClient::new();
        client.set_secret("db", "v2-value").await;
        client.set_version("db", "v1", "v1-value").await;

        let latest = client.get_secret("db", "").await.unwrap();
        assert_eq!(latest.value.as_deref(), Some("v2-value"));

        let v1 = client.get_secret("db", "v1").await.unwrap();
        assert_eq!(v1.value.as_deref(), Some("v1-value"));

        let missing = client.get_secret("db", "v9").await;
        assert!(matches!(missing, Err(VaultlinkError::NotFound(_))));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_value() {
        let client = MockSecretClient::new();
        client.set_missing_value("ghost").await;

        let response = client.get_secret("ghost", "").await.unwrap();
        assert_eq!(response.value, None);
    }

    #[tokio::test]
    async fn test_unknown_secret() {
        let client = MockSecretClient::new();
        let result = client.get_secret("nope", "").await;
        assert!(matches!(result, Err(VaultlinkError::NotFound(name)) if name == "nope"));
    }

    #[tokio::test]
    async fn test_error_injection() {
        let mut client = MockSecretClient::new();
        client.set_secret("key", "value").await;
        client.get_error = Some(|| VaultlinkError::PermissionDenied("test".to_string()));

        let result = client.get_secret("key", "").await;
        assert!(matches!(result, Err(VaultlinkError::PermissionDenied(msg)) if msg == "test"));

        client.get_error = Some(|| VaultlinkError::NotAuthenticated("expired".to_string()));
        let result = client.get_secret("key", "").await;
        assert!(matches!(result, Err(VaultlinkError::NotAuthenticated(_))));

        client.get_error = None;
        let result = client.get_secret("key", "").await.unwrap();
        assert_eq!(result.value.as_deref(), Some("value"));
    }
}

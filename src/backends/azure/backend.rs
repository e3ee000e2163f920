//! Azure Key Vault backend implementation.

use super::client::KeyVaultClient;
use super::config::AzureKeyVaultConfig;
use crate::backend::{SecretBackend, SecretClient};
use crate::config::{ConfigSource, VAULT_TYPE_AZURE_KEY_VAULT};
use crate::credential::{CredentialKind, CredentialStrategy};
use crate::transport::{HttpTransport, TransportBuilder};
use crate::validation::{validate_secret_name, validate_secret_version};
use crate::{Result, VaultlinkError};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Azure Key Vault backend.
///
/// Construction validates the configuration, derives the credential and
/// builds the retrying transport. No network traffic happens until the
/// first [`get_secret`](SecretBackend::get_secret).
pub struct AzureKeyVault {
    client: Arc<dyn SecretClient>,
    config: AzureKeyVaultConfig,
    credential_kind: Option<CredentialKind>,
}

impl AzureKeyVault {
    /// Creates a backend using the built-in HTTP client.
    ///
    /// # Errors
    ///
    /// - Configuration errors, wrapped with `failed to validate config`
    /// - Credential or transport failures, wrapped with
    ///   `failed to create key vault client from config`
    pub fn new(config: AzureKeyVaultConfig) -> Result<Self> {
        Self::build(config, TransportBuilder::new())
    }

    /// Creates a backend whose requests go through `transport`.
    ///
    /// Retry policy still applies on top of the injected transport. A
    /// configuration with a proxy is rejected.
    pub fn with_transport(
        config: AzureKeyVaultConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        Self::build(config, TransportBuilder::new().with_base(transport))
    }

    /// Like [`with_transport`](Self::with_transport) but with a caller-supplied builder.
    pub fn with_transport_builder(
        config: AzureKeyVaultConfig,
        builder: TransportBuilder,
    ) -> Result<Self> {
        Self::build(config, builder)
    }

    /// Creates a backend over an existing secret-store client.
    ///
    /// The configuration is still validated but no credential is derived.
    pub fn from_client(config: AzureKeyVaultConfig, client: Arc<dyn SecretClient>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| e.context("failed to validate config"))?;

        Ok(Self {
            client,
            config,
            credential_kind: None,
        })
    }

    /// Creates a backend from prefixed variables; see
    /// [`AzureKeyVaultConfig::from_source`].
    pub fn from_source(source: &dyn ConfigSource, prefix: &str) -> Result<Self> {
        Self::new(AzureKeyVaultConfig::from_source(source, prefix))
    }

    /// Creates a backend from a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(AzureKeyVaultConfig::from_path(path)?)
    }

    fn build(config: AzureKeyVaultConfig, builder: TransportBuilder) -> Result<Self> {
        let validated = config
            .clone()
            .into_validated()
            .map_err(|e| e.context("failed to validate config"))?;

        let client_error =
            |e: VaultlinkError| e.context("failed to create key vault client from config");

        let transport = builder
            .with_proxy(validated.proxy.clone())
            .build()
            .map_err(|e| client_error(e.context("failed to instantiate http client")))?;
        let credential =
            CredentialStrategy::derive(&validated, transport.clone()).map_err(client_error)?;
        let credential_kind = credential.kind();

        info!(
            vault = %validated.url,
            tenant_id = %validated.tenant_id,
            client_id = %validated.client_id,
            credential = %credential_kind,
            proxy = validated.proxy.is_some(),
            "created azure key vault backend"
        );

        let client = KeyVaultClient::new(validated.url, Arc::new(credential), transport);
        Ok(Self {
            client: Arc::new(client),
            config,
            credential_kind: Some(credential_kind),
        })
    }

    /// The configuration this backend was built from.
    pub fn config(&self) -> &AzureKeyVaultConfig {
        &self.config
    }

    /// The selected credential variant; `None` when built over an existing client.
    pub fn credential_kind(&self) -> Option<CredentialKind> {
        self.credential_kind
    }
}

#[async_trait]
impl SecretBackend for AzureKeyVault {
    fn name(&self) -> &str {
        VAULT_TYPE_AZURE_KEY_VAULT
    }

    #[instrument(skip(self))]
    async fn get_secret(&self, name: &str, version: &str) -> Result<String> {
        let wrap = |e| VaultlinkError::backend_op(VAULT_TYPE_AZURE_KEY_VAULT, "get", name, e);

        validate_secret_name(name).map_err(wrap)?;
        validate_secret_version(version).map_err(wrap)?;

        let response = self.client.get_secret(name, version).await.map_err(wrap)?;
        let value = response.value.ok_or_else(|| {
            wrap(VaultlinkError::ContractViolation(
                "secret value is nil".to_string(),
            ))
        })?;

        debug!(len = value.len(), "read secret");
        Ok(value)
    }
}

impl fmt::Debug for AzureKeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureKeyVault")
            .field("url", &self.config.url)
            .field("credential_kind", &self.credential_kind)
            .finish_non_exhaustive()
    }
}

//! Key Vault data-plane REST client.

use crate::backend::{SecretClient, SecretResponse};
use crate::credential::{key_vault_scope, TokenCredential};
use crate::transport::HttpTransport;
use crate::{Result, VaultlinkError};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, Request};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Key Vault REST API version.
pub const API_VERSION: &str = "7.4";

/// Reads secrets from one vault with bearer tokens from a [`TokenCredential`].
pub struct KeyVaultClient {
    vault_url: Url,
    scope: String,
    credential: Arc<dyn TokenCredential>,
    transport: Arc<dyn HttpTransport>,
}

impl KeyVaultClient {
    /// Creates a client for the vault at `vault_url`.
    pub fn new(
        vault_url: Url,
        credential: Arc<dyn TokenCredential>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            scope: key_vault_scope(&vault_url),
            vault_url,
            credential,
            transport,
        }
    }

    /// The vault this client reads from.
    pub fn vault_url(&self) -> &Url {
        &self.vault_url
    }

    /// Token scope requested for this vault's cloud.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// `{vault}/secrets/{name}[/{version}]?api-version=7.4`
    fn secret_url(&self, name: &str, version: &str) -> Result<Url> {
        let mut url = self.vault_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                VaultlinkError::config(format!("vault url {} cannot be a base", self.vault_url))
            })?;
            segments.pop_if_empty().push("secrets").push(name);
            if !version.is_empty() {
                segments.push(version);
            }
        }
        url.query_pairs_mut().clear().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl SecretClient for KeyVaultClient {
    #[instrument(skip(self), fields(vault = %self.vault_url))]
    async fn get_secret(&self, name: &str, version: &str) -> Result<SecretResponse> {
        let url = self.secret_url(name, version)?;
        let token = self.credential.get_token(&[self.scope.as_str()]).await?;

        let mut request = Request::new(Method::GET, url);
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.token.expose()))
            .map_err(|e| VaultlinkError::Other(anyhow::anyhow!("invalid access token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self.transport.execute(request).await?;
        let status = response.status();
        let text = response.text().await?;

        match status.as_u16() {
            200..=299 => {}
            401 => {
                return Err(VaultlinkError::NotAuthenticated(error_message(&text, 401)));
            }
            403 => {
                return Err(VaultlinkError::PermissionDenied(error_message(&text, 403)));
            }
            404 => return Err(VaultlinkError::NotFound(name.to_string())),
            other => {
                return Err(VaultlinkError::UnexpectedStatus {
                    status: other,
                    body: text,
                })
            }
        }

        debug!(status = status.as_u16(), "fetched secret");
        serde_json::from_str(&text).map_err(VaultlinkError::from)
    }
}

// Key Vault errors look like {"error":{"code":"Forbidden","message":"..."}}.
fn error_message(body: &str, status: u16) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            let code = error.get("code").and_then(|c| c.as_str()).unwrap_or_default();
            let message = error.get("message").and_then(|m| m.as_str()).unwrap_or_default();
            Some(format!("{code}: {message}"))
        })
        .unwrap_or_else(|| format!("status {status}"))
}

impl fmt::Debug for KeyVaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVaultClient")
            .field("vault_url", &self.vault_url.as_str())
            .finish_non_exhaustive()
    }
}

use super::{AccessToken, TokenCredential, TokenEndpoint};
use crate::error::CredentialStage;
use crate::transport::HttpTransport;
use crate::{Result, SecretString, VaultlinkError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Callback returning the current client assertion.
pub type AssertionFn = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// Authenticates with a client assertion produced by a callback.
///
/// The callback runs on every token exchange, never when a cached token is
/// served.
pub struct ClientAssertionCredential {
    tenant_id: String,
    client_id: String,
    assertion: AssertionFn,
    endpoint: TokenEndpoint,
}

impl ClientAssertionCredential {
    /// Creates a credential that asks `assertion` for the JWT to present.
    pub fn new(
        tenant_id: &str,
        client_id: &str,
        authority_host: &Url,
        assertion: AssertionFn,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            assertion,
            endpoint: TokenEndpoint::new(authority_host, tenant_id, client_id, transport)?,
        })
    }

    /// Creates a credential that always presents the same preissued JWT.
    pub fn from_jwt(
        tenant_id: &str,
        client_id: &str,
        authority_host: &Url,
        jwt: SecretString,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let assertion: AssertionFn = Arc::new(move || Ok(jwt.expose().clone()));
        Self::new(tenant_id, client_id, authority_host, assertion, transport)
    }

    /// Returns the assertion the next token exchange would present.
    pub fn assertion(&self) -> Result<String> {
        (self.assertion)()
    }

    /// Tenant the credential authenticates against.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Client (application) identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl TokenCredential for ClientAssertionCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        if let Some(token) = self.endpoint.cached(scopes).await {
            return Ok(token);
        }

        let assertion = self
            .assertion()
            .map_err(|e| VaultlinkError::credential(CredentialStage::Token, e))?;
        self.endpoint.request(scopes, &assertion).await
    }
}

impl fmt::Debug for ClientAssertionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssertionCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

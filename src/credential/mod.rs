//! Credential strategies and the OAuth2 token exchange behind them.
//!
//! A validated configuration carries exactly one authentication method, and
//! [`CredentialStrategy::derive`] turns it into a token source:
//!
//! - a preissued JWT becomes a [`ClientAssertionCredential`] that presents the
//!   JWT verbatim as its client assertion;
//! - a certificate file becomes a [`ClientCertificateCredential`] that mints
//!   and signs its own assertion from the private key.
//!
//! Both exchange the assertion for an access token at the tenant's token
//! endpoint using the transport the backend was built with, so retry and
//! proxy policy apply to token traffic as well.

mod assertion;
mod certificate;

pub use assertion::{AssertionFn, ClientAssertionCredential};
pub use certificate::{parse_certificates, thumbprint, ClientCertificateCredential};

use crate::backends::azure::{AuthMethod, ValidatedConfig};
use crate::error::CredentialStage;
use crate::transport::HttpTransport;
use crate::{Result, SecretString, VaultlinkError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Request};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

/// Authority used when the configuration does not name one.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Scope requested for Key Vault data-plane calls in the public cloud.
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// DNS suffixes of Key Vault in the national clouds.
const SOVEREIGN_VAULT_SUFFIXES: [&str; 3] = [
    "vault.azure.cn",
    "vault.usgovcloudapi.net",
    "vault.microsoftazure.de",
];

/// Token scope for the vault at `vault_url`.
///
/// Vaults in a national cloud need a token for that cloud's Key Vault
/// audience; any other host gets [`KEY_VAULT_SCOPE`].
pub fn key_vault_scope(vault_url: &Url) -> String {
    let host = vault_url.host_str().unwrap_or_default().to_ascii_lowercase();
    SOVEREIGN_VAULT_SUFFIXES
        .iter()
        .find(|suffix| host.ends_with(&format!(".{suffix}")))
        .map(|suffix| format!("https://{suffix}/.default"))
        .unwrap_or_else(|| KEY_VAULT_SCOPE.to_string())
}

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// A bearer token and its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The bearer token
    pub token: SecretString,
    /// When the token stops being valid
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Returns true while the token is usable and not inside the refresh margin.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// Source of access tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Returns a token valid for `scopes`, from cache when still fresh.
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken>;
}

/// Which credential variant a backend authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Preissued JWT presented as client assertion
    Assertion,
    /// Certificate and private key
    Certificate,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assertion => write!(f, "assertion"),
            Self::Certificate => write!(f, "certificate"),
        }
    }
}

/// The credential a backend authenticates with.
pub enum CredentialStrategy {
    /// Client assertion supplied by a callback.
    Assertion(ClientAssertionCredential),
    /// Certificate chain and private key.
    Certificate(ClientCertificateCredential),
}

impl CredentialStrategy {
    /// Builds the credential matching the configuration's auth method.
    ///
    /// A JWT selects the assertion variant. Otherwise the certificate file is
    /// read and parsed. Certificate failures are reported as a single
    /// [`VaultlinkError::Credential`] naming the stage that failed.
    pub fn derive(config: &ValidatedConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        match &config.auth {
            AuthMethod::Jwt(jwt) => Ok(Self::Assertion(ClientAssertionCredential::from_jwt(
                &config.tenant_id,
                &config.client_id,
                &config.authority_host,
                jwt.clone(),
                transport,
            )?)),
            AuthMethod::Certificate { path, password } => {
                let data = std::fs::read(path).map_err(|e| {
                    VaultlinkError::credential(
                        CredentialStage::Read,
                        anyhow::Error::new(e)
                            .context(format!("failed to read certificate {}", path.display())),
                    )
                })?;

                let (certs, key) =
                    parse_certificates(&data, password.as_ref().map(|p| p.expose().as_str()))?;

                Ok(Self::Certificate(ClientCertificateCredential::new(
                    &config.tenant_id,
                    &config.client_id,
                    &config.authority_host,
                    certs,
                    key,
                    transport,
                )?))
            }
        }
    }

    /// Which variant was selected.
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Assertion(_) => CredentialKind::Assertion,
            Self::Certificate(_) => CredentialKind::Certificate,
        }
    }
}

impl fmt::Debug for CredentialStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assertion(c) => f.debug_tuple("Assertion").field(c).finish(),
            Self::Certificate(c) => f.debug_tuple("Certificate").field(c).finish(),
        }
    }
}

#[async_trait]
impl TokenCredential for CredentialStrategy {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        match self {
            Self::Assertion(c) => c.get_token(scopes).await,
            Self::Certificate(c) => c.get_token(scopes).await,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: SecretString,
    expires_in: ExpiresIn,
}

// Some authorities send expires_in as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Number(i64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Client-credentials token endpoint of one tenant, with a per-scope cache.
pub(crate) struct TokenEndpoint {
    url: Url,
    client_id: String,
    transport: Arc<dyn HttpTransport>,
    cache: RwLock<HashMap<String, AccessToken>>,
}

impl TokenEndpoint {
    pub(crate) fn new(
        authority_host: &Url,
        tenant_id: &str,
        client_id: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let mut url = authority_host.clone();
        url.path_segments_mut()
            .map_err(|_| {
                VaultlinkError::credential(
                    CredentialStage::Construct,
                    anyhow::anyhow!("authority host {} cannot be a base URL", authority_host),
                )
            })?
            .pop_if_empty()
            .extend([tenant_id, "oauth2", "v2.0", "token"]);

        Ok(Self {
            url,
            client_id: client_id.to_string(),
            transport,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// The token endpoint URL, which is also the audience of client assertions.
    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) async fn cached(&self, scopes: &[&str]) -> Option<AccessToken> {
        let cache = self.cache.read().await;
        cache
            .get(&scopes.join(" "))
            .filter(|token| token.is_fresh(Utc::now()))
            .cloned()
    }

    #[instrument(skip(self, assertion), fields(url = %self.url, client_id = %self.client_id))]
    pub(crate) async fn request(&self, scopes: &[&str], assertion: &str) -> Result<AccessToken> {
        let scope = scopes.join(" ");
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &scope)
            .append_pair("client_assertion_type", CLIENT_ASSERTION_TYPE)
            .append_pair("client_assertion", assertion)
            .finish();

        let mut request = Request::new(Method::POST, self.url.clone());
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(body.into());

        let token_error = |e: VaultlinkError| VaultlinkError::credential(CredentialStage::Token, e);

        let response = self.transport.execute(request).await.map_err(token_error)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| token_error(VaultlinkError::Http(e)))?;

        if !status.is_success() {
            let detail: TokenErrorResponse = serde_json::from_str(&text).unwrap_or_default();
            return Err(VaultlinkError::credential(
                CredentialStage::Token,
                anyhow::anyhow!(
                    "token endpoint returned {}: {} {}",
                    status.as_u16(),
                    detail.error,
                    detail.error_description
                ),
            ));
        }

        let parsed: TokenResponse =
            serde_json::from_str(&text).map_err(|e| token_error(VaultlinkError::Json(e)))?;
        let expires_in = parsed.expires_in.seconds().ok_or_else(|| {
            VaultlinkError::credential(
                CredentialStage::Token,
                anyhow::anyhow!("token response has a malformed expires_in"),
            )
        })?;

        let expires_on = Duration::try_seconds(expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                VaultlinkError::credential(
                    CredentialStage::Token,
                    anyhow::anyhow!("token response has a malformed expires_in: {expires_in}"),
                )
            })?;

        let token = AccessToken {
            token: parsed.access_token,
            expires_on,
        };
        debug!(expires_on = %token.expires_on, "acquired access token");

        self.cache.write().await.insert(scope, token.clone());
        Ok(token)
    }
}

impl fmt::Debug for TokenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEndpoint")
            .field("url", &self.url.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

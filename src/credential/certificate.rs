use super::{AccessToken, TokenCredential, TokenEndpoint};
use crate::error::CredentialStage;
use crate::transport::HttpTransport;
use crate::{Result, VaultlinkError};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Lifetime of a self-signed client assertion.
const ASSERTION_LIFETIME_SECS: i64 = 10 * 60;

const PEM_MARKER: &[u8] = b"-----BEGIN ";

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    aud: String,
    iss: String,
    sub: String,
    jti: String,
    nbf: i64,
    iat: i64,
    exp: i64,
}

fn parse_error(err: anyhow::Error) -> VaultlinkError {
    VaultlinkError::credential(CredentialStage::Parse, err)
}

/// Decodes a PEM bundle into DER certificates and an RSA private key.
///
/// The bundle holds one or more `CERTIFICATE` blocks, the first being the
/// leaf, and exactly one `PRIVATE KEY`, `RSA PRIVATE KEY` or
/// `ENCRYPTED PRIVATE KEY` block. `password` decrypts the latter.
///
/// # Errors
///
/// Every failure is a [`CredentialStage::Parse`] error: non-PEM input
/// (PKCS#12 archives included), a missing certificate or key, more than one
/// key, or a wrong or missing password.
pub fn parse_certificates(
    data: &[u8],
    password: Option<&str>,
) -> Result<(Vec<Vec<u8>>, RsaPrivateKey)> {
    if !data.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER) {
        return Err(parse_error(anyhow::anyhow!(
            "no PEM blocks found; only PEM certificates are supported, not PKCS#12"
        )));
    }
    let blocks = pem::parse_many(data)
        .map_err(|e| parse_error(anyhow::anyhow!("failed to decode PEM: {e}")))?;

    let mut certs = Vec::new();
    let mut key = None;

    for block in &blocks {
        let decoded = match block.tag() {
            "CERTIFICATE" => {
                certs.push(block.contents().to_vec());
                continue;
            }
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_der(block.contents())
                .map_err(|e| anyhow::anyhow!("invalid PKCS#8 private key: {e}")),
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(block.contents())
                .map_err(|e| anyhow::anyhow!("invalid PKCS#1 private key: {e}")),
            "ENCRYPTED PRIVATE KEY" => match password.filter(|p| !p.is_empty()) {
                Some(password) => {
                    RsaPrivateKey::from_pkcs8_encrypted_der(block.contents(), password)
                        .map_err(|e| anyhow::anyhow!("failed to decrypt private key: {e}"))
                }
                None => Err(anyhow::anyhow!(
                    "private key is encrypted but no certificate password was provided"
                )),
            },
            other => {
                debug!(tag = other, "ignoring PEM block");
                continue;
            }
        };

        if key.is_some() {
            return Err(parse_error(anyhow::anyhow!(
                "certificate file contains more than one private key"
            )));
        }
        key = Some(decoded.map_err(parse_error)?);
    }

    if certs.is_empty() {
        return Err(parse_error(anyhow::anyhow!(
            "certificate file contains no CERTIFICATE block"
        )));
    }
    let key = key.ok_or_else(|| {
        parse_error(anyhow::anyhow!("certificate file contains no private key"))
    })?;

    Ok((certs, key))
}

/// Base64url SHA-1 thumbprint of a DER certificate, as used in the `x5t` header.
pub fn thumbprint(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha1::digest(der))
}

/// Authenticates with a certificate by signing its own client assertions.
pub struct ClientCertificateCredential {
    tenant_id: String,
    client_id: String,
    certs: Vec<Vec<u8>>,
    thumbprint: String,
    key: EncodingKey,
    endpoint: TokenEndpoint,
}

impl ClientCertificateCredential {
    /// Binds a certificate chain and its private key to a tenant and client.
    ///
    /// `certs[0]` must be the leaf certificate matching `key`.
    pub fn new(
        tenant_id: &str,
        client_id: &str,
        authority_host: &Url,
        certs: Vec<Vec<u8>>,
        key: RsaPrivateKey,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let construct_error =
            |e: anyhow::Error| VaultlinkError::credential(CredentialStage::Construct, e);

        let leaf = certs
            .first()
            .ok_or_else(|| construct_error(anyhow::anyhow!("certificate chain is empty")))?;
        let thumbprint = thumbprint(leaf);

        let der = key
            .to_pkcs1_der()
            .map_err(|e| construct_error(anyhow::anyhow!("failed to encode private key: {e}")))?;
        let key = EncodingKey::from_rsa_der(der.as_bytes());

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            certs,
            thumbprint,
            key,
            endpoint: TokenEndpoint::new(authority_host, tenant_id, client_id, transport)?,
        })
    }

    /// Mints a signed client assertion for the tenant's token endpoint.
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    pub fn client_assertion(&self) -> Result<String> {
        let now = Utc::now();
        let claims = AssertionClaims {
            aud: self.endpoint.url().to_string(),
            iss: self.client_id.clone(),
            sub: self.client_id.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.x5t = Some(self.thumbprint.clone());

        encode(&header, &claims, &self.key).map_err(|e| {
            VaultlinkError::credential(
                CredentialStage::Token,
                anyhow::anyhow!("failed to sign client assertion: {e}"),
            )
        })
    }

    /// DER certificates, leaf first.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certs
    }

    /// Thumbprint of the leaf certificate.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Tenant the credential authenticates against.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[async_trait]
impl TokenCredential for ClientCertificateCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        if let Some(token) = self.endpoint.cached(scopes).await {
            return Ok(token);
        }
        let assertion = self.client_assertion()?;
        self.endpoint.request(scopes, &assertion).await
    }
}

impl fmt::Debug for ClientCertificateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificateCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("thumbprint", &self.thumbprint)
            .field("chain_len", &self.certs.len())
            .finish_non_exhaustive()
    }
}

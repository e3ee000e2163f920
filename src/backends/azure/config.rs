//! Azure Key Vault configuration: decoding, validation and normalization.

use crate::config::ConfigSource;
use crate::credential::DEFAULT_AUTHORITY_HOST;
use crate::proxy::ProxyConfig;
use crate::{Result, SecretString, VaultlinkError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Nested prefix under which proxy variables live, appended to the backend prefix.
pub const PROXY_ENV_PREFIX: &str = "CONTROLLER_MANAGER_AZURE_VAULT_";

/// Raw Azure Key Vault settings, as read from a JSON file or discrete variables.
///
/// Exactly one of `jwt` and `cert_path` must be set. Call
/// [`validate`](Self::validate) or [`into_validated`](Self::into_validated)
/// before use.
///
/// # Example
///
/// ```
/// use vaultlink::backends::azure::AzureKeyVaultConfig;
///
/// let config = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
///     .with_jwt("abc");
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AzureKeyVaultConfig {
    /// Entra ID tenant
    pub tenant_id: String,
    /// Application (client) identifier
    pub client_id: String,
    /// Vault URL, e.g. `https://myvault.vault.azure.net`
    pub url: String,
    /// PEM file holding the certificate chain and private key
    pub cert_path: String,
    /// Password of an encrypted private key
    pub cert_password: SecretString,
    /// Preissued client assertion
    pub jwt: SecretString,
    /// Token authority; empty means the public cloud
    pub authority_host: String,
    /// Outbound proxy settings
    pub proxy: Option<ProxyConfig>,
}

/// How the backend authenticates, decided once during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Present a preissued JWT as client assertion.
    Jwt(SecretString),
    /// Sign assertions with the certificate at `path`.
    Certificate {
        /// PEM file path
        path: PathBuf,
        /// Private key password, if any
        password: Option<SecretString>,
    },
}

/// Configuration that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    /// Entra ID tenant
    pub tenant_id: String,
    /// Application (client) identifier
    pub client_id: String,
    /// Vault URL
    pub url: Url,
    /// Selected authentication method
    pub auth: AuthMethod,
    /// Token authority
    pub authority_host: Url,
    /// Outbound proxy settings
    pub proxy: Option<ProxyConfig>,
}

impl AzureKeyVaultConfig {
    /// Creates a configuration with the three always-required fields.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Authenticates with a preissued JWT.
    pub fn with_jwt(mut self, jwt: impl Into<SecretString>) -> Self {
        self.jwt = jwt.into();
        self
    }

    /// Authenticates with a PEM certificate file.
    pub fn with_cert_path(mut self, path: impl Into<String>) -> Self {
        self.cert_path = path.into();
        self
    }

    /// Sets the password of an encrypted certificate key.
    pub fn with_cert_password(mut self, password: impl Into<SecretString>) -> Self {
        self.cert_password = password.into();
        self
    }

    /// Overrides the token authority.
    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    /// Routes outbound requests through a proxy.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Assembles a configuration from `<prefix>TENANT_ID`, `<prefix>CLIENT_ID`,
    /// `<prefix>URL`, `<prefix>CERT_PATH`, `<prefix>CERT_PASSWORD`,
    /// `<prefix>JWT` and `<prefix>AUTHORITY_HOST`. Proxy settings are read
    /// under `<prefix>CONTROLLER_MANAGER_AZURE_VAULT_`.
    ///
    /// Unset variables become empty fields; nothing is validated here.
    pub fn from_source(source: &dyn ConfigSource, prefix: &str) -> Self {
        let var = |key: &str| source.get_or_empty(&format!("{prefix}{key}"));

        Self {
            tenant_id: var("TENANT_ID"),
            client_id: var("CLIENT_ID"),
            url: var("URL"),
            cert_path: var("CERT_PATH"),
            cert_password: var("CERT_PASSWORD").into(),
            jwt: var("JWT").into(),
            authority_host: var("AUTHORITY_HOST"),
            proxy: ProxyConfig::from_source(source, &format!("{prefix}{PROXY_ENV_PREFIX}")),
        }
    }

    /// Decodes a JSON configuration file. Missing fields default to empty.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            VaultlinkError::from(e).context(format!("failed to read config file {}", path.display()))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            VaultlinkError::config(format!(
                "failed to decode config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Checks the configuration without building anything.
    ///
    /// # Errors
    ///
    /// A [`VaultlinkError::Config`] with one of:
    /// - `tenant_id is not set` / `client_id is not set`
    /// - `failed to parse url: ...`
    /// - `both jwt and cert_path provided` / `neither jwt nor cert_path provided`
    /// - `failed to stat cert_path: ...` / `cert_path must not be a directory`
    /// - `proxy validation failed: ...`
    pub fn validate(&self) -> Result<()> {
        self.check().map(|_| ())
    }

    /// Validates and normalizes into a [`ValidatedConfig`].
    pub fn into_validated(self) -> Result<ValidatedConfig> {
        let (url, auth, authority_host) = self.check()?;
        Ok(ValidatedConfig {
            tenant_id: self.tenant_id,
            client_id: self.client_id,
            url,
            auth,
            authority_host,
            proxy: self.proxy,
        })
    }

    fn check(&self) -> Result<(Url, AuthMethod, Url)> {
        if self.tenant_id.is_empty() {
            return Err(VaultlinkError::config("tenant_id is not set"));
        }
        if self.client_id.is_empty() {
            return Err(VaultlinkError::config("client_id is not set"));
        }

        let url = parse_base_url(&self.url)
            .map_err(|e| VaultlinkError::config(format!("failed to parse url: {e}")))?;

        let auth = match (self.jwt.is_empty(), self.cert_path.is_empty()) {
            (false, false) => return Err(VaultlinkError::config("both jwt and cert_path provided")),
            (true, true) => {
                return Err(VaultlinkError::config("neither jwt nor cert_path provided"))
            }
            (false, true) => AuthMethod::Jwt(self.jwt.clone()),
            (true, false) => {
                let path = PathBuf::from(&self.cert_path);
                let metadata = std::fs::metadata(&path).map_err(|e| {
                    VaultlinkError::config(format!("failed to stat cert_path: {e}"))
                })?;
                if metadata.is_dir() {
                    return Err(VaultlinkError::config("cert_path must not be a directory"));
                }
                AuthMethod::Certificate {
                    path,
                    password: (!self.cert_password.is_empty()).then(|| self.cert_password.clone()),
                }
            }
        };

        if let Some(proxy) = &self.proxy {
            proxy.validate().map_err(|e| {
                VaultlinkError::config(format!("proxy validation failed: {e}"))
            })?;
        }

        let authority = if self.authority_host.is_empty() {
            DEFAULT_AUTHORITY_HOST
        } else {
            &self.authority_host
        };
        let authority_host = parse_base_url(authority)
            .map_err(|e| VaultlinkError::config(format!("failed to parse authority_host: {e}")))?;

        Ok((url, auth, authority_host))
    }
}

fn parse_base_url(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("{raw:?}: {e}"))?;
    if url.cannot_be_a_base() {
        return Err(format!("{raw:?}: not a hierarchical URL"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvSnapshot;
    use crate::proxy::ProxyServerConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cert_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"-----BEGIN CERTIFICATE-----\n").unwrap();
        file
    }

    fn config_error(config: &AzureKeyVaultConfig) -> String {
        match config.validate() {
            Err(VaultlinkError::Config(msg)) => msg,
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_jwt_config_is_valid() {
        let validated = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_jwt("abc")
            .into_validated()
            .unwrap();

        assert_eq!(validated.auth, AuthMethod::Jwt("abc".into()));
        assert_eq!(validated.url.as_str(), "https://kv.example/");
        assert_eq!(validated.authority_host.as_str(), "https://login.microsoftonline.com/");
    }

    #[test]
    fn test_required_fields() {
        let base = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example").with_jwt("abc");

        let mut missing_tenant = base.clone();
        missing_tenant.tenant_id.clear();
        assert_eq!(config_error(&missing_tenant), "tenant_id is not set");

        let mut missing_client = base.clone();
        missing_client.client_id.clear();
        assert_eq!(config_error(&missing_client), "client_id is not set");

        for url in ["", "not a url", "mailto:ops@example.com"] {
            let mut bad_url = base.clone();
            bad_url.url = url.to_string();
            assert!(config_error(&bad_url).starts_with("failed to parse url"), "url {:?}", url);
        }
    }

    #[test]
    fn test_jwt_and_cert_are_exclusive() {
        let cert = cert_file();
        let both = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_jwt("abc")
            .with_cert_path(cert.path().to_str().unwrap());
        assert_eq!(config_error(&both), "both jwt and cert_path provided");

        let neither = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example");
        assert_eq!(config_error(&neither), "neither jwt nor cert_path provided");
    }

    #[test]
    fn test_cert_path_must_be_existing_file() {
        let cert = cert_file();
        let validated = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_cert_path(cert.path().to_str().unwrap())
            .with_cert_password("hunter2")
            .into_validated()
            .unwrap();
        assert_eq!(
            validated.auth,
            AuthMethod::Certificate {
                path: cert.path().to_path_buf(),
                password: Some("hunter2".into()),
            }
        );

        let missing = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_cert_path("/nonexistent/vaultlink/cert.pem");
        assert!(config_error(&missing).starts_with("failed to stat cert_path"));

        let dir = tempfile::tempdir().unwrap();
        let directory = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_cert_path(dir.path().to_str().unwrap());
        assert_eq!(config_error(&directory), "cert_path must not be a directory");
    }

    #[test]
    fn test_empty_password_is_none() {
        let cert = cert_file();
        let validated = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_cert_path(cert.path().to_str().unwrap())
            .into_validated()
            .unwrap();
        assert!(matches!(validated.auth, AuthMethod::Certificate { password: None, .. }));
    }

    #[test]
    fn test_invalid_proxy_fails_validation() {
        let config = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_jwt("abc")
            .with_proxy(ProxyConfig {
                http: Some(ProxyServerConfig::new("")),
                ..Default::default()
            });
        assert!(config_error(&config).starts_with("proxy validation failed: http:"));
    }

    #[test]
    fn test_bad_authority_host() {
        let config = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_jwt("abc")
            .with_authority_host("login");
        assert!(config_error(&config).starts_with("failed to parse authority_host"));
    }

    #[test]
    fn test_from_source_reads_prefixed_variables() {
        let env = EnvSnapshot::new("test")
            .with_var("APP_AZURE_KEY_VAULT_TENANT_ID", "t1")
            .with_var("APP_AZURE_KEY_VAULT_CLIENT_ID", "c1")
            .with_var("APP_AZURE_KEY_VAULT_URL", "https://kv.example")
            .with_var("APP_AZURE_KEY_VAULT_JWT", "abc")
            .with_var(
                "APP_AZURE_KEY_VAULT_CONTROLLER_MANAGER_AZURE_VAULT_HTTPS_PROXY_URL",
                "http://proxy:3128",
            )
            .with_var("OTHER_TENANT_ID", "ignored");

        let config = AzureKeyVaultConfig::from_source(&env, "APP_AZURE_KEY_VAULT_");

        let expected = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_jwt("abc")
            .with_proxy(ProxyConfig {
                https: Some(ProxyServerConfig::new("http://proxy:3128")),
                ..Default::default()
            });
        assert_eq!(config, expected);
    }

    #[test]
    fn test_from_path_decodes_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tenant_id":"t1","client_id":"c1","url":"https://kv.example","jwt":"abc",
                "proxy":{{"https":{{"url":"http://proxy:3128","username":"u","password":"p"}},"noProxy":["localhost"]}}}}"#
        )
        .unwrap();

        let config = AzureKeyVaultConfig::from_path(file.path()).unwrap();
        assert_eq!(config.tenant_id, "t1");
        assert_eq!(config.jwt.expose(), "abc");
        assert!(config.cert_path.is_empty());

        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.https.unwrap().password.expose(), "p");
        assert_eq!(proxy.no_proxy, vec!["localhost".to_string()]);
    }

    #[test]
    fn test_from_path_errors() {
        assert!(AzureKeyVaultConfig::from_path("/nonexistent/vaultlink.json").is_err());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        let err = AzureKeyVaultConfig::from_path(file.path()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
            .with_jwt("super-secret-jwt")
            .with_cert_password("hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-jwt"));
        assert!(!debug.contains("hunter2"));
    }
}

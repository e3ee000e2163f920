//! GitHub credentials stored as a secret.
//!
//! A credential object holds either a personal access token or GitHub App
//! credentials, never both. It is usually the value of a vault secret (JSON)
//! or the data map of a Kubernetes secret.

use crate::backend::SecretBackend;
use crate::{Result, SecretString, VaultlinkError};
use serde::Deserialize;
use std::collections::BTreeMap;

const BOTH_PROVIDED: &str = "both PAT and GitHub App credentials provided. should only provide one";
const NONE_PROVIDED: &str =
    "no credentials provided: either a PAT or GitHub App credentials should be provided";

/// How to authenticate against GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubCredentials {
    /// Personal access token.
    Token(SecretString),
    /// GitHub App installation.
    App {
        /// Numeric App ID
        app_id: u64,
        /// Numeric installation ID
        installation_id: u64,
        /// PEM private key of the App
        private_key: SecretString,
    },
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAppConfig {
    github_app_id: i64,
    github_app_installation_id: i64,
    github_app_private_key: SecretString,
    github_token: SecretString,
}

impl GitHubCredentials {
    /// Decodes the JSON form:
    /// `{"github_token": "..."}` or
    /// `{"github_app_id": 1, "github_app_installation_id": 2, "github_app_private_key": "..."}`.
    ///
    /// # Errors
    ///
    /// Malformed JSON, both auth modes present, or neither complete.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: RawAppConfig = serde_json::from_str(raw)
            .map_err(|e| VaultlinkError::config(format!("failed to decode credentials: {e}")))?;

        let has_token = !config.github_token.is_empty();
        let has_app = config.github_app_id > 0
            && config.github_app_installation_id > 0
            && !config.github_app_private_key.is_empty();

        match (has_token, has_app) {
            (true, true) => Err(VaultlinkError::config(BOTH_PROVIDED)),
            (false, false) => Err(VaultlinkError::config(NONE_PROVIDED)),
            (true, false) => Ok(Self::Token(config.github_token)),
            (false, true) => Ok(Self::App {
                app_id: config.github_app_id.unsigned_abs(),
                installation_id: config.github_app_installation_id.unsigned_abs(),
                private_key: config.github_app_private_key,
            }),
        }
    }

    /// Decodes a Kubernetes secret data map with the same keys as the JSON
    /// form; IDs are decimal strings.
    ///
    /// # Errors
    ///
    /// Both auth modes present, neither complete, non-UTF-8 values, or IDs
    /// that are not positive integers.
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let field = |key: &str| -> Result<String> {
            match data.get(key) {
                Some(bytes) => String::from_utf8(bytes.clone())
                    .map_err(|_| VaultlinkError::config(format!("{key} is not valid UTF-8"))),
                None => Ok(String::new()),
            }
        };

        let token = field("github_token")?;
        let app_id = field("github_app_id")?;
        let installation_id = field("github_app_installation_id")?;
        let private_key = field("github_app_private_key")?;

        let has_token = !token.is_empty();
        let has_app = !app_id.is_empty() && !installation_id.is_empty() && !private_key.is_empty();

        match (has_token, has_app) {
            (true, true) => Err(VaultlinkError::config(BOTH_PROVIDED)),
            (false, false) => Err(VaultlinkError::config(NONE_PROVIDED)),
            (true, false) => Ok(Self::Token(token.into())),
            (false, true) => Ok(Self::App {
                app_id: parse_id("github_app_id", &app_id)?,
                installation_id: parse_id("github_app_installation_id", &installation_id)?,
                private_key: private_key.into(),
            }),
        }
    }

    /// Reads the latest version of secret `name` and decodes it as JSON.
    pub async fn from_backend(backend: &dyn SecretBackend, name: &str) -> Result<Self> {
        let raw = SecretString::from(backend.get_latest(name).await?);
        Self::from_json(raw.expose())
            .map_err(|e| e.context(format!("failed to read github credentials from {name}")))
    }

    /// True for the GitHub App variant.
    pub fn is_app(&self) -> bool {
        matches!(self, Self::App { .. })
    }
}

fn parse_id(key: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        Ok(_) => Err(VaultlinkError::config(format!("{key} must be positive"))),
        Err(e) => Err(VaultlinkError::config(format!("failed to parse {key}: {e}"))),
    }
}

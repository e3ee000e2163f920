//! Backend type identifiers and configuration sources.
//!
//! Discovery never reads the process environment directly. It is handed a
//! [`ConfigSource`]: usually an [`EnvSnapshot`] captured once at startup, or a
//! [`ProviderChain`] that layers several named sources in priority order.

use std::collections::BTreeMap;
use std::fmt;

/// Registry key of the Azure Key Vault backend.
pub const VAULT_TYPE_AZURE_KEY_VAULT: &str = "azure_key_vault";

/// Backend type identifier.
///
/// Each variant corresponds to a backend family the registry can discover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// Azure Key Vault
    AzureKeyVault,
}

impl BackendType {
    /// Returns the registry key for this backend type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureKeyVault => VAULT_TYPE_AZURE_KEY_VAULT,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A read-only view of key/value configuration.
pub trait ConfigSource: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Looks up a single key. `None` means unset, which is distinct from empty.
    fn get(&self, key: &str) -> Option<String>;

    /// Lists every key this source knows about.
    fn keys(&self) -> Vec<String>;

    /// Looks up a key, treating unset as the empty string.
    fn get_or_empty(&self, key: &str) -> String {
        self.get(key).unwrap_or_default()
    }
}

/// An immutable snapshot of environment-style variables.
///
/// ```
/// use vaultlink::config::{ConfigSource, EnvSnapshot};
///
/// let env = EnvSnapshot::new("test")
///     .with_var("APP_AZURE_KEY_VAULT_TENANT_ID", "t1");
///
/// assert_eq!(env.get("APP_AZURE_KEY_VAULT_TENANT_ID").as_deref(), Some("t1"));
/// assert_eq!(env.get_or_empty("APP_AZURE_KEY_VAULT_JWT"), "");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    name: String,
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Creates an empty snapshot.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: BTreeMap::new(),
        }
    }

    /// Captures the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self {
            name: "process-env".to_string(),
            vars,
        }
    }

    /// Adds or replaces a variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Number of variables in the snapshot.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true when the snapshot holds no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for EnvSnapshot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            name: "snapshot".to_string(),
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl ConfigSource for EnvSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }
}

/// An ordered list of named sources; the first source holding a key wins.
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Box<dyn ConfigSource>>,
}

impl ProviderChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source with lower priority than those already present.
    pub fn with_provider(mut self, provider: impl ConfigSource + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Names of the providers in priority order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

impl ConfigSource for ProviderChain {
    fn name(&self) -> &str {
        "provider-chain"
    }

    fn get(&self, key: &str) -> Option<String> {
        self.providers.iter().find_map(|p| p.get(key))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.iter().flat_map(|p| p.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

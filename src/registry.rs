//! Backend discovery from prefixed configuration variables.
//!
//! Each [`BackendFamily`] owns a variable namespace under the caller's
//! prefix. [`VaultRegistry::init_all`] probes every family once; a family
//! with at least one variable present is built and registered under its
//! vault type key. Any failure aborts discovery, so the result is either
//! complete or an error.

use crate::backend::SecretBackend;
use crate::config::{ConfigSource, EnvSnapshot};
use crate::{Result, VaultlinkError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(feature = "azure")]
use crate::backends::azure::{AzureKeyVault, AzureKeyVaultConfig};
#[cfg(feature = "azure")]
use crate::config::VAULT_TYPE_AZURE_KEY_VAULT;
#[cfg(feature = "azure")]
use crate::transport::HttpTransport;
#[cfg(feature = "azure")]
use std::path::PathBuf;

/// Discovered backends keyed by vault type.
pub type Vaults = HashMap<String, Arc<dyn SecretBackend>>;

/// A kind of backend the registry can discover.
pub trait BackendFamily: Send + Sync {
    /// Key the backend is registered under (e.g. "azure_key_vault").
    fn vault_type(&self) -> &str;

    /// Namespace appended to the caller's prefix (e.g. "AZURE_KEY_VAULT_").
    fn env_marker(&self) -> &str;

    /// Builds the backend from variables under `prefix`.
    fn build(&self, prefix: &str, source: &dyn ConfigSource) -> Result<Arc<dyn SecretBackend>>;
}

/// Ordered set of backend families.
///
/// ```
/// use vaultlink::config::EnvSnapshot;
/// use vaultlink::registry::VaultRegistry;
///
/// let env = EnvSnapshot::new("empty");
/// let vaults = VaultRegistry::default().init_all("APP_", &env)?;
/// assert!(vaults.is_empty());
/// # Ok::<(), vaultlink::VaultlinkError>(())
/// ```
pub struct VaultRegistry {
    families: Vec<Box<dyn BackendFamily>>,
}

impl VaultRegistry {
    /// Creates a registry with no families.
    pub fn empty() -> Self {
        Self {
            families: Vec::new(),
        }
    }

    /// Adds a family. Families are probed in the order they were added.
    pub fn with_family(mut self, family: impl BackendFamily + 'static) -> Self {
        self.families.push(Box::new(family));
        self
    }

    /// Vault types of the registered families.
    pub fn vault_types(&self) -> Vec<&str> {
        self.families.iter().map(|f| f.vault_type()).collect()
    }

    /// Discovers and builds every backend configured under `prefix`.
    ///
    /// # Errors
    ///
    /// - Two families claim the same vault type
    /// - Any discovered backend fails to build; no partial map is returned
    pub fn init_all(&self, prefix: &str, source: &dyn ConfigSource) -> Result<Vaults> {
        let mut seen = HashSet::new();
        for family in &self.families {
            if !seen.insert(family.vault_type()) {
                return Err(VaultlinkError::config(format!(
                    "vault type {} is registered by more than one backend family",
                    family.vault_type()
                )));
            }
        }

        let keys = source.keys();
        let mut vaults = Vaults::new();

        for family in &self.families {
            let marker = format!("{prefix}{}", family.env_marker());
            if !keys.iter().any(|key| key.starts_with(&marker)) {
                debug!(vault_type = family.vault_type(), %marker, "no variables found, skipping");
                continue;
            }

            let backend = family.build(prefix, source)?;
            info!(
                vault_type = family.vault_type(),
                source = source.name(),
                "registered vault backend"
            );
            vaults.insert(family.vault_type().to_string(), backend);
        }

        Ok(vaults)
    }

    /// Looks up a discovered backend by vault type.
    ///
    /// # Errors
    ///
    /// `vault type not set` for an empty type, `vault type unknown` when no
    /// backend of that type was discovered.
    pub fn lookup(vaults: &Vaults, vault_type: &str) -> Result<Arc<dyn SecretBackend>> {
        if vault_type.is_empty() {
            return Err(VaultlinkError::config("vault type not set"));
        }
        vaults
            .get(vault_type)
            .cloned()
            .ok_or_else(|| VaultlinkError::config(format!("vault type unknown: {vault_type}")))
    }
}

impl Default for VaultRegistry {
    /// A registry with every family compiled into the crate.
    fn default() -> Self {
        let registry = Self::empty();
        #[cfg(feature = "azure")]
        let registry = registry.with_family(AzureKeyVaultFamily::new());
        registry
    }
}

/// Discovers backends with the default families.
pub fn init_all(prefix: &str, source: &dyn ConfigSource) -> Result<Vaults> {
    VaultRegistry::default().init_all(prefix, source)
}

/// Discovers backends from a snapshot of the process environment.
pub fn init_all_from_env(prefix: &str) -> Result<Vaults> {
    init_all(prefix, &EnvSnapshot::capture())
}

/// Variable namespace of the Azure Key Vault family.
#[cfg(feature = "azure")]
pub const AZURE_KEY_VAULT_ENV_MARKER: &str = "AZURE_KEY_VAULT_";

/// Where a discovered configuration came from.
#[cfg(feature = "azure")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// JSON file named by `<prefix>AZURE_KEY_VAULT_CONFIG_PATH`
    File(PathBuf),
    /// Discrete `<prefix>AZURE_KEY_VAULT_*` variables
    Env,
}

/// Discovers Azure Key Vault from `<prefix>AZURE_KEY_VAULT_*` variables.
///
/// `<prefix>AZURE_KEY_VAULT_CONFIG_PATH`, when set, names a JSON file that
/// is used instead of the discrete variables, with no fallback.
#[cfg(feature = "azure")]
#[derive(Default)]
pub struct AzureKeyVaultFamily {
    transport: Option<Arc<dyn HttpTransport>>,
}

#[cfg(feature = "azure")]
impl AzureKeyVaultFamily {
    /// Builds backends with the built-in HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds backends over an injected transport.
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    /// Loads the raw configuration without validating or building anything.
    pub fn resolve_config(
        &self,
        prefix: &str,
        source: &dyn ConfigSource,
    ) -> Result<(AzureKeyVaultConfig, ConfigOrigin)> {
        let family_prefix = format!("{prefix}{AZURE_KEY_VAULT_ENV_MARKER}");

        match source.get(&format!("{family_prefix}CONFIG_PATH")) {
            Some(path) => {
                let config = AzureKeyVaultConfig::from_path(&path)?;
                Ok((config, ConfigOrigin::File(PathBuf::from(path))))
            }
            None => Ok((
                AzureKeyVaultConfig::from_source(source, &family_prefix),
                ConfigOrigin::Env,
            )),
        }
    }

    fn instantiate(&self, config: AzureKeyVaultConfig) -> Result<AzureKeyVault> {
        match &self.transport {
            Some(transport) => AzureKeyVault::with_transport(config, transport.clone()),
            None => AzureKeyVault::new(config),
        }
    }
}

#[cfg(feature = "azure")]
impl BackendFamily for AzureKeyVaultFamily {
    fn vault_type(&self) -> &str {
        VAULT_TYPE_AZURE_KEY_VAULT
    }

    fn env_marker(&self) -> &str {
        AZURE_KEY_VAULT_ENV_MARKER
    }

    fn build(&self, prefix: &str, source: &dyn ConfigSource) -> Result<Arc<dyn SecretBackend>> {
        let family_prefix = format!("{prefix}{AZURE_KEY_VAULT_ENV_MARKER}");
        let from_file = source.get(&format!("{family_prefix}CONFIG_PATH")).is_some();
        let context = if from_file {
            "failed to instantiate azure key vault from path"
        } else {
            "failed to instantiate azure key vault from env"
        };

        let (config, origin) = self
            .resolve_config(prefix, source)
            .map_err(|e| e.context(context))?;
        debug!(?origin, "resolved azure key vault config");

        let vault = self.instantiate(config).map_err(|e| e.context(context))?;
        Ok(Arc::new(vault))
    }
}

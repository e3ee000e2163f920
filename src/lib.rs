//! Vaultlink - discover, authenticate and read from external secret stores.
//!
//! Vaultlink turns prefixed configuration variables into ready-to-use secret
//! backends and gives every backend the same read operation:
//! `get_secret(name, version)`. Callers never see which credential strategy,
//! transport policy or proxy routing a backend was built with.
//!
//! # Features
//!
//! - **Discovery**: scan a configuration source for `<prefix>AZURE_KEY_VAULT_*`
//!   variables or a `CONFIG_PATH` file and build one backend per family
//! - **Strict validation**: exactly one of JWT or certificate, required IDs,
//!   parseable URLs, all checked before any network traffic
//! - **Credentials**: preissued JWT assertions or PEM certificates, with
//!   access tokens cached until shortly before expiry
//! - **Transport**: bounded retries with backoff, 5 minute timeout, optional
//!   per-request proxy selection with `NO_PROXY` rules
//! - **Secret hygiene**: JWTs, passwords and tokens are redacted in `Debug`
//!   output and zeroized on drop
//!
//! # Quick Start
//!
//! ```no_run
//! use vaultlink::registry::{init_all_from_env, VaultRegistry};
//! use vaultlink::VAULT_TYPE_AZURE_KEY_VAULT;
//!
//! #[tokio::main]
//! async fn main() -> vaultlink::Result<()> {
//!     // APP_AZURE_KEY_VAULT_TENANT_ID, _CLIENT_ID, _URL and _JWT are set.
//!     let vaults = init_all_from_env("APP_")?;
//!
//!     let vault = VaultRegistry::lookup(&vaults, VAULT_TYPE_AZURE_KEY_VAULT)?;
//!     let token = vault.get_secret("github-token", "").await?;
//!     # let _ = token;
//!     Ok(())
//! }
//! ```
//!
//! # Supported Backends
//!
//! | Backend | Feature Flag | Notes |
//! |---------|-------------|-------|
//! | Azure Key Vault | `azure` (default) | JWT assertion or certificate credential |
//! | Mock client | `mock` (default) | In-memory store with error injection |
//!
//! # Feature Flags
//!
//! ```toml
//! [dependencies]
//! vaultlink = { version = "0.1", default-features = false, features = ["azure"] }
//! ```

pub mod appconfig;
pub mod backend;
pub mod backends;
pub mod config;
#[cfg(feature = "azure")]
pub mod credential;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod secret;
pub mod transport;
pub mod validation;

pub use backend::{SecretBackend, SecretClient, SecretResponse};
pub use config::{BackendType, ConfigSource, EnvSnapshot, ProviderChain, VAULT_TYPE_AZURE_KEY_VAULT};
pub use error::{CredentialStage, Result, VaultlinkError};
pub use registry::{init_all, init_all_from_env, BackendFamily, VaultRegistry, Vaults};
pub use secret::{Secret, SecretString};

#[cfg(feature = "azure")]
pub use backends::azure::{AzureKeyVault, AzureKeyVaultConfig};

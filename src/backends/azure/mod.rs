//! Azure Key Vault backend.
//!
//! Talks to the Key Vault REST API directly over the crate's retrying
//! transport and authenticates against Entra ID with a client assertion.
//!
//! # Authentication
//!
//! Exactly one of:
//! - `jwt`: a preissued federated token presented verbatim as the client
//!   assertion (workload identity)
//! - `cert_path`: a PEM file with the certificate chain and RSA private key,
//!   optionally encrypted with `cert_password`
//!
//! # Configuration
//!
//! From a JSON file (`tenant_id`, `client_id`, `url`, `cert_path`,
//! `cert_password`, `jwt`, `authority_host`, `proxy`) or from prefixed
//! variables, see [`AzureKeyVaultConfig::from_source`].
//!
//! # Example
//!
//! ```no_run
//! use vaultlink::backends::azure::{AzureKeyVault, AzureKeyVaultConfig};
//! use vaultlink::SecretBackend;
//!
//! #[tokio::main]
//! async fn main() -> vaultlink::Result<()> {
//!     let config = AzureKeyVaultConfig::new(
//!         "00000000-0000-0000-0000-000000000001",
//!         "00000000-0000-0000-0000-000000000002",
//!         "https://myvault.vault.azure.net",
//!     )
//!     .with_cert_path("/etc/vaultlink/client.pem");
//!
//!     let vault = AzureKeyVault::new(config)?;
//!     let token = vault.get_secret("github-token", "").await?;
//!     # let _ = token;
//!     Ok(())
//! }
//! ```

mod backend;
mod client;
mod config;

pub use backend::AzureKeyVault;
pub use client::{KeyVaultClient, API_VERSION};
pub use config::{AuthMethod, AzureKeyVaultConfig, ValidatedConfig, PROXY_ENV_PREFIX};

//! Error types for vaultlink operations.

use std::fmt;
use thiserror::Error;

/// Result type alias using [`VaultlinkError`].
pub type Result<T> = std::result::Result<T, VaultlinkError>;

/// Stage of credential derivation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStage {
    /// Reading certificate material from disk.
    Read,
    /// Decoding certificates and the private key.
    Parse,
    /// Building the credential from decoded material.
    Construct,
    /// Exchanging the credential for an access token.
    Token,
}

impl fmt::Display for CredentialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Parse => write!(f, "parse"),
            Self::Construct => write!(f, "construct"),
            Self::Token => write!(f, "token"),
        }
    }
}

/// Errors that can occur while discovering backends or reading secrets.
///
/// All errors implement `std::error::Error` and can be chained with `source()`.
/// Use [`VaultlinkError::root_cause`] to look through context layers.
#[derive(Debug, Error)]
pub enum VaultlinkError {
    /// Missing, contradictory or malformed configuration. Never retried.
    #[error("{0}")]
    Config(String),

    /// Certificate material or token exchange failed.
    #[error("credential {stage} failed: {source}")]
    Credential {
        /// Stage that failed
        stage: CredentialStage,
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },

    /// Network-level failure reported by a transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a status the client does not understand.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// A well-formed response was missing the expected value.
    #[error("{0}")]
    ContractViolation(String),

    /// Secret was not found in the store.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The store rejected the presented credential.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// Permission denied for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Secret name or version contains invalid characters.
    #[error("invalid secret name: {0}")]
    InvalidSecretName(String),

    /// Backend operation failed with context.
    #[error("{backend}: {operation} {item}: {source}")]
    BackendOperation {
        /// Backend name
        backend: String,
        /// Operation name
        operation: String,
        /// Secret name
        item: String,
        /// Underlying error
        #[source]
        source: Box<VaultlinkError>,
    },

    /// An error with a human-readable context prefix.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted
        context: String,
        /// Underlying error
        #[source]
        source: Box<VaultlinkError>,
    },

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultlinkError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a credential error for the given stage.
    pub fn credential(stage: CredentialStage, source: impl Into<anyhow::Error>) -> Self {
        Self::Credential {
            stage,
            source: source.into(),
        }
    }

    /// Creates a backend operation error with context.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultlink::VaultlinkError;
    ///
    /// let err = VaultlinkError::NotFound("api-key".to_string());
    /// let wrapped = VaultlinkError::backend_op("azure_key_vault", "get", "api-key", err);
    ///
    /// assert_eq!(
    ///     wrapped.to_string(),
    ///     "azure_key_vault: get api-key: secret not found: api-key"
    /// );
    /// ```
    pub fn backend_op(
        backend: impl Into<String>,
        operation: impl Into<String>,
        item: impl Into<String>,
        err: VaultlinkError,
    ) -> Self {
        Self::BackendOperation {
            backend: backend.into(),
            operation: operation.into(),
            item: item.into(),
            source: Box::new(err),
        }
    }

    /// Wraps this error with a context prefix.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error below any context or backend-operation layers.
    pub fn root_cause(&self) -> &VaultlinkError {
        match self {
            Self::Context { source, .. } | Self::BackendOperation { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Returns true for configuration errors, looking through context layers.
    pub fn is_config(&self) -> bool {
        matches!(self.root_cause(), Self::Config(_))
    }

    /// Whether a transport should retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Self::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

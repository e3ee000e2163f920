//! Redacting wrapper for sensitive values.
//!
//! JWTs, certificate passwords, proxy passwords and access tokens all pass
//! through [`Secret`], so `Debug`/`Display` and structured logging print
//! `[REDACTED]` and the backing memory is zeroized on drop.

use serde::{Deserialize, Deserializer};
use std::fmt;
use zeroize::Zeroize;

/// Placeholder printed instead of a secret value.
pub const REDACTED: &str = "[REDACTED]";

/// A wrapper for sensitive values that prevents accidental exposure.
///
/// There is no `Deref`; call [`Secret::expose`] to read the inner value.
///
/// ```
/// use vaultlink::Secret;
///
/// let jwt = Secret::new("eyJhbGciOi...".to_string());
/// assert_eq!(format!("{jwt:?}"), "Secret(\"[REDACTED]\")");
/// assert_eq!(jwt.expose(), "eyJhbGciOi...");
/// ```
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
    T: Zeroize,
{
    inner: T,
}

/// Convenience alias for secret strings.
pub type SecretString = Secret<String>;

impl<T> Secret<T>
where
    T: Zeroize,
{
    /// Wraps a sensitive value.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Explicitly access the inner value.
    pub fn expose(&self) -> &T {
        &self.inner
    }
}

impl Secret<String> {
    /// Returns true when the wrapped string is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T> Default for Secret<T>
where
    T: Zeroize + Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Clone for Secret<T>
where
    T: Zeroize + Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Secret<T>
where
    T: Zeroize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&REDACTED).finish()
    }
}

impl<T> fmt::Display for Secret<T>
where
    T: Zeroize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> PartialEq for Secret<T>
where
    T: Zeroize + PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

impl<'de, T> Deserialize<'de> for Secret<T>
where
    T: Deserialize<'de> + Zeroize,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Secret::new)
    }
}

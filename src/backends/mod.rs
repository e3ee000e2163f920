//! Backend implementations.

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "azure")]
pub mod azure;

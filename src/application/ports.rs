//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the
//! application layer needs. Infrastructure adapters implement these
//! ports ([`RedisStore`](crate::infrastructure::redis_store::RedisStore),
//! [`SystemClock`](crate::infrastructure::clock::SystemClock), and the
//! mocks used in tests).

use async_trait::async_trait;
use std::fmt;
use std::fmt::Debug;

/// Error surfaced by a [`StoreClient`].
///
/// The limiter needs exactly one discriminant out of the store's error
/// space: "this script is not cached here". Everything else is opaque
/// and propagates unchanged.
#[derive(Debug)]
pub enum StoreError {
    /// The store does not know the script digest (Redis `NOSCRIPT`).
    /// Recoverable: re-evaluate by body.
    UnknownScript,
    /// Any other store-side failure, surfaced as-is.
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an arbitrary store failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownScript => write!(f, "script is not cached on the store"),
            StoreError::Backend(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::UnknownScript => None,
            StoreError::Backend(e) => Some(e.as_ref()),
        }
    }
}

/// Port for the remote key-value store.
///
/// A thin abstraction over the store primitives the limiter consumes:
/// atomic script evaluation (by digest or by body), hash-field reads,
/// set membership mutation and key listing. Implementations perform
/// no algorithmic work; all accounting runs inside the scripts.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Evaluate a cached script by its SHA-1 hex digest.
    ///
    /// # Errors
    /// [`StoreError::UnknownScript`] when the store has not cached the
    /// digest; any other failure as [`StoreError::Backend`].
    async fn eval_by_digest(
        &self,
        digest: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError>;

    /// Evaluate a script by sending its full body.
    ///
    /// The store is expected to cache the body under its SHA-1 digest
    /// as a side effect, so subsequent digest evaluations succeed.
    async fn eval_by_body(
        &self,
        body: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError>;

    /// Read one integer hash field. `None` when the key or field is absent.
    async fn hget_int(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError>;

    /// List keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Add a member to a set.
    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set.
    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError>;
}

/// Port for obtaining the current time.
///
/// The limiter sends the evaluation time to the store, so decisions do
/// not depend on the store-side clock and tests can drive time
/// explicitly. Second granularity is the contract.
pub trait Clock: Send + Sync + Debug {
    /// Current unix time, in whole seconds.
    fn now_secs(&self) -> u64;
}

//! # redis-throttle
//!
//! Distributed sliding-window rate limiting backed by Redis Lua
//! scripts.
//!
//! Clients submit one or more identifiers (an IP address, a user id)
//! and an optional weight; the limiter atomically evaluates a
//! configured ruleset against the identifiers' recent activity on the
//! store and reports whether the action is permitted. Whitelist and
//! blacklist overrides short-circuit the decision, whitelist first.
//!
//! Because the whole check-then-increment runs as one atomic script on
//! the store, any number of limiter instances - across tasks,
//! processes or machines - share limits correctly: two racing
//! increments can never both observe room under a limit and both
//! commit.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use redis_throttle::{RateLimiter, RedisStore, Rule};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RedisStore::connect("redis://127.0.0.1/").await?;
//!
//!     // 10 per second, and 5000 per hour tracked in minute buckets.
//!     let limiter = RateLimiter::builder()
//!         .rule(Rule::new(1, 10)?)
//!         .rule(Rule::with_precision(3600, 5000, 60)?)
//!         .build(store)?;
//!
//!     if limiter.incr(["203.0.113.7"]).await? {
//!         println!("denied");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Rules and buckets
//!
//! A [`Rule`] expresses "at most `limit` units of weight per
//! `interval` seconds". Activity is accounted in buckets of
//! `precision` seconds (default: the whole interval); a bucket ages
//! out of the window in one step once it falls behind by a full
//! window. Smaller precision buys accuracy with store memory. This
//! bucketed approximation - not a per-event sliding log - is the
//! contract, and second granularity is the finest supported.
//!
//! ## Testing
//!
//! The `infrastructure::mocks` module ships a deterministic clock and
//! an in-memory store emulation, so limiter behavior can be tested
//! without a running Redis.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    decision::Decision,
    rule::{ConfigError, Rule, RuleSet, ViolatedRule},
};

pub use application::{
    error::LimiterError,
    limiter::{RateLimiter, RateLimiterBuilder},
    ports::{Clock, StoreClient, StoreError},
    scripts::ScriptCache,
};

pub use infrastructure::{
    clock::SystemClock,
    redis_store::{RedisStore, RedisStoreConfig},
};

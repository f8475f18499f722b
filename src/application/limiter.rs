//! The limiter's public surface.
//!
//! A [`RateLimiter`] is a stateless facade over the store: it holds
//! the validated rules, the key prefixing policy and the script cache,
//! assembles script arguments and interprets the three-valued result.
//! All shared state lives on the store, so any number of limiter
//! instances - in one process or across machines - may operate
//! concurrently against the same prefix.

use crate::application::error::LimiterError;
use crate::application::ports::{Clock, StoreClient};
use crate::application::scripts::ScriptCache;
use crate::domain::decision::Decision;
use crate::domain::keyspace::Keyspace;
use crate::domain::lua;
use crate::domain::rule::{ConfigError, Rule, RuleSet, ViolatedRule};
use crate::infrastructure::clock::SystemClock;

use std::sync::Arc;
use tracing::{debug, trace};

/// Key prefix used when none is configured.
const DEFAULT_PREFIX: &str = "ratelimit";

/// A sliding-window rate limiter backed by a scripting key-value store.
///
/// Decisions and the resulting counter mutations run as one atomic
/// script on the store; two racing increments can never both observe
/// room under a limit and both commit.
///
/// # Example
/// ```no_run
/// use redis_throttle::{RateLimiter, RedisStore, Rule};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisStore::connect("redis://127.0.0.1/").await?;
/// let limiter = RateLimiter::builder()
///     .rule(Rule::new(1, 10)?)
///     .rule(Rule::with_precision(3600, 5000, 60)?)
///     .build(store)?;
///
/// if limiter.incr(["203.0.113.7"]).await? {
///     // denied: no counter was touched
/// }
/// # Ok(())
/// # }
/// ```
pub struct RateLimiter<S> {
    store: S,
    rules: RuleSet,
    keyspace: Keyspace,
    scripts: ScriptCache,
    clock: Arc<dyn Clock>,
}

impl RateLimiter<()> {
    /// Start building a limiter.
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }
}

impl<S: StoreClient> RateLimiter<S> {
    /// Check whether the identifiers are currently limited, without
    /// charging any weight.
    ///
    /// Returns `true` iff the action would be denied (a rule is at its
    /// limit, or an identifier is blacklisted). Never mutates counter
    /// state.
    pub async fn check<I, K>(&self, identifiers: I) -> Result<bool, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = self.script_keys(identifiers)?;
        let decision = self.run_script(lua::CHECK_RATE_LIMIT, &keys, 1).await?;
        Ok(decision.is_denied())
    }

    /// Charge weight 1 against the identifiers if every rule allows it.
    ///
    /// Equivalent to [`incr_by`](Self::incr_by) with a weight of 1.
    pub async fn incr<I, K>(&self, identifiers: I) -> Result<bool, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.incr_by(identifiers, 1).await
    }

    /// Charge `weight` against the identifiers if every rule allows it.
    ///
    /// Returns `true` iff denied; a denial leaves every counter
    /// untouched. On allowance, all applicable rule counters for all
    /// identifiers are incremented within the same atomic unit and the
    /// counter hashes' expiry is refreshed to the longest rule
    /// interval. Weights below 1 are floored to 1.
    pub async fn incr_by<I, K>(&self, identifiers: I, weight: u64) -> Result<bool, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = self.script_keys(identifiers)?;
        let weight = weight.max(1);
        let decision = self.run_script(lua::CHECK_LIMIT_INCR, &keys, weight).await?;
        Ok(decision.is_denied())
    }

    /// Report every rule whose stored window count has reached its
    /// limit for any of the identifiers.
    ///
    /// This is a non-atomic, read-only inspection of the count fields;
    /// it can lag an in-flight increment. Results are ordered by
    /// identifier first, then by rule in rule-set order, and a rule is
    /// reported once per violating identifier.
    ///
    /// The reader mirrors the store-side precision clamp at call time:
    /// changing a rule's precision for keys with existing counters
    /// silently reads stale or missing fields until those keys are
    /// flushed.
    pub async fn violated_rules<I, K>(
        &self,
        identifiers: I,
    ) -> Result<Vec<ViolatedRule>, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = self.script_keys(identifiers)?;
        let mut violated = Vec::new();
        for key in &keys {
            for rule in self.rules.iter() {
                let count = self
                    .store
                    .hget_int(key, &rule.count_field())
                    .await?
                    .unwrap_or(-1);
                if count >= rule.limit() as i64 {
                    violated.push(ViolatedRule {
                        interval_seconds: rule.interval_seconds(),
                        limit: rule.limit(),
                    });
                }
            }
        }
        Ok(violated)
    }

    /// Filter the identifiers down to the ones currently limited.
    ///
    /// Costs one store round trip per identifier; intended for
    /// inspection, not for the hot path.
    pub async fn limited_keys<I, K>(&self, identifiers: I) -> Result<Vec<String>, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let cleaned = Self::cleaned(identifiers)?;
        let mut limited = Vec::new();
        for id in cleaned {
            if self.check([id.as_str()]).await? {
                limited.push(id);
            }
        }
        Ok(limited)
    }

    /// List every identifier known to the store, prefix stripped.
    ///
    /// The whitelist and blacklist set names live under the same
    /// prefix and appear in this listing; callers filter if needed.
    pub async fn keys(&self) -> Result<Vec<String>, LimiterError> {
        let pattern = self.keyspace.match_pattern();
        let found = self.store.keys(&pattern).await?;
        Ok(found
            .iter()
            .map(|key| self.keyspace.strip(key).to_string())
            .collect())
    }

    /// Always allow the identifiers, overriding rules and blacklist.
    ///
    /// Each identifier is removed from the blacklist and added to the
    /// whitelist. The pair of set operations is atomic per identifier
    /// but the list as a whole is not: a mid-list failure propagates
    /// and leaves the identifiers already processed in place.
    pub async fn whitelist<I, K>(&self, identifiers: I) -> Result<(), LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let whitelist = self.keyspace.whitelist_set();
        let blacklist = self.keyspace.blacklist_set();
        for member in self.set_members(identifiers)? {
            self.store.srem(&blacklist, &member).await?;
            self.store.sadd(&whitelist, &member).await?;
            debug!(member = %member, "whitelisted");
        }
        Ok(())
    }

    /// Remove the identifiers from the whitelist.
    pub async fn unwhitelist<I, K>(&self, identifiers: I) -> Result<(), LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let whitelist = self.keyspace.whitelist_set();
        for member in self.set_members(identifiers)? {
            self.store.srem(&whitelist, &member).await?;
        }
        Ok(())
    }

    /// Always deny the identifiers, unless whitelisted.
    ///
    /// Mirror image of [`whitelist`](Self::whitelist): removes from the
    /// whitelist, adds to the blacklist, per identifier, not atomic
    /// across the list.
    pub async fn blacklist<I, K>(&self, identifiers: I) -> Result<(), LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let whitelist = self.keyspace.whitelist_set();
        let blacklist = self.keyspace.blacklist_set();
        for member in self.set_members(identifiers)? {
            self.store.srem(&whitelist, &member).await?;
            self.store.sadd(&blacklist, &member).await?;
            debug!(member = %member, "blacklisted");
        }
        Ok(())
    }

    /// Remove the identifiers from the blacklist.
    pub async fn unblacklist<I, K>(&self, identifiers: I) -> Result<(), LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let blacklist = self.keyspace.blacklist_set();
        for member in self.set_members(identifiers)? {
            self.store.srem(&blacklist, &member).await?;
        }
        Ok(())
    }

    /// The configured rules, in evaluation order.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Trim, validate and prefix identifiers for script KEYS.
    fn script_keys<I, K>(&self, identifiers: I) -> Result<Vec<String>, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        Ok(Self::cleaned(identifiers)?
            .iter()
            .map(|id| self.keyspace.prefixed(id, false))
            .collect())
    }

    /// Trim, validate and fully qualify identifiers for set members.
    fn set_members<I, K>(&self, identifiers: I) -> Result<Vec<String>, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        Ok(Self::cleaned(identifiers)?
            .iter()
            .map(|id| self.keyspace.prefixed(id, true))
            .collect())
    }

    fn cleaned<I, K>(identifiers: I) -> Result<Vec<String>, LimiterError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let cleaned = Keyspace::clean_identifiers(identifiers);
        if cleaned.is_empty() {
            return Err(LimiterError::NoValidKeys);
        }
        Ok(cleaned)
    }

    async fn run_script(
        &self,
        name: &str,
        keys: &[String],
        weight: u64,
    ) -> Result<Decision, LimiterError> {
        let now = self.clock.now_secs();
        let args = vec![
            self.rules.payload().to_string(),
            now.to_string(),
            weight.to_string(),
            self.keyspace.whitelist_set(),
            self.keyspace.blacklist_set(),
        ];

        trace!(script = name, keys = ?keys, now, weight, "evaluating");

        let code = self.scripts.exec(&self.store, name, keys, &args).await?;
        let decision =
            Decision::from_code(code).ok_or(LimiterError::UnexpectedScriptResult(code))?;

        if decision.is_denied() {
            debug!(script = name, keys = ?keys, ?decision, "denied");
        }

        Ok(decision)
    }
}

/// Builder for a [`RateLimiter`].
///
/// Rules are required; everything else has a default: prefix
/// `"ratelimit"`, client prefix mode off, system clock.
#[derive(Debug)]
pub struct RateLimiterBuilder {
    rules: Vec<Rule>,
    prefix: String,
    client_prefix_mode: bool,
    clock: Option<Arc<dyn Clock>>,
}

impl RateLimiterBuilder {
    fn new() -> Self {
        Self {
            rules: Vec::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            client_prefix_mode: false,
            clock: None,
        }
    }

    /// Append one rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append several rules, preserving order.
    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Set the key prefix. Empty is allowed and elides the delimiter.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Hand identifier-key qualification to the store client.
    ///
    /// When enabled, identifier keys are passed to the store
    /// unprefixed and the client is assumed to prepend the prefix
    /// transparently on the wire. Whitelist/blacklist set names stay
    /// fully qualified regardless.
    pub fn client_prefix_mode(mut self, enabled: bool) -> Self {
        self.client_prefix_mode = enabled;
        self
    }

    /// Use a custom clock (mainly for testing).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and assemble the limiter.
    ///
    /// # Errors
    /// [`ConfigError::NoRules`] when no rule was added.
    pub fn build<S: StoreClient>(self, store: S) -> Result<RateLimiter<S>, ConfigError> {
        let rules = RuleSet::new(self.rules)?;
        let scripts = ScriptCache::new([
            (lua::CHECK_RATE_LIMIT, lua::check_rate_limit_body()),
            (lua::CHECK_LIMIT_INCR, lua::check_limit_incr_body()),
        ]);
        Ok(RateLimiter {
            store,
            rules,
            keyspace: Keyspace::new(self.prefix, self.client_prefix_mode),
            scripts,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::{MockClock, MockStore};

    fn limiter(rules: Vec<Rule>) -> (RateLimiter<MockStore>, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(0));
        let store = MockStore::new(clock.clone());
        let limiter = RateLimiter::builder()
            .rules(rules)
            .clock(clock.clone())
            .build(store)
            .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_builder_requires_rules() {
        let clock = Arc::new(MockClock::new(0));
        let store = MockStore::new(clock.clone());
        let result = RateLimiter::builder().build(store);
        assert!(matches!(result, Err(ConfigError::NoRules)));
    }

    #[tokio::test]
    async fn test_empty_identifiers_rejected() {
        let (limiter, _) = limiter(vec![Rule::new(1, 5).unwrap()]);
        let err = limiter.check(["", "  "]).await.unwrap_err();
        assert!(matches!(err, LimiterError::NoValidKeys));
    }

    #[tokio::test]
    async fn test_identifiers_trimmed_to_same_counter() {
        let (limiter, _) = limiter(vec![Rule::new(10, 2).unwrap()]);
        assert!(!limiter.incr([" ip "]).await.unwrap());
        assert!(!limiter.incr(["ip"]).await.unwrap());
        // Both increments landed on the trimmed identifier.
        assert!(limiter.incr(["ip"]).await.unwrap());
    }

    #[tokio::test]
    async fn test_weight_floored_to_one() {
        let (limiter, _) = limiter(vec![Rule::new(10, 3).unwrap()]);
        assert!(!limiter.incr_by(["k"], 0).await.unwrap());
        assert!(!limiter.incr_by(["k"], 0).await.unwrap());
        assert!(!limiter.incr_by(["k"], 0).await.unwrap());
        assert!(limiter.incr_by(["k"], 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_multi_key_increment_charges_all() {
        let (limiter, _) = limiter(vec![Rule::new(10, 2).unwrap()]);
        assert!(!limiter.incr(["a", "b"]).await.unwrap());
        assert!(!limiter.incr(["a"]).await.unwrap());
        // "a" is at its limit now, so the pair is denied...
        assert!(limiter.incr(["a", "b"]).await.unwrap());
        // ...and the denial charged nothing against "b".
        assert!(!limiter.incr(["b"]).await.unwrap());
    }

    #[tokio::test]
    async fn test_violated_rules_reports_in_rule_order() {
        let (limiter, _) = limiter(vec![
            Rule::new(10, 1).unwrap(),
            Rule::new(60, 100).unwrap(),
        ]);
        assert!(!limiter.incr(["ip"]).await.unwrap());
        let violated = limiter.violated_rules(["ip"]).await.unwrap();
        assert_eq!(
            violated,
            vec![ViolatedRule {
                interval_seconds: 10,
                limit: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_violated_rules_empty_without_counters() {
        let (limiter, _) = limiter(vec![Rule::new(10, 1).unwrap()]);
        assert!(limiter.violated_rules(["ghost"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limited_keys_filters() {
        let (limiter, _) = limiter(vec![Rule::new(10, 1).unwrap()]);
        assert!(!limiter.incr(["hot"]).await.unwrap());
        let limited = limiter.limited_keys(["hot", "cold"]).await.unwrap();
        assert_eq!(limited, vec!["hot".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_lists_with_prefix_stripped() {
        let (limiter, _) = limiter(vec![Rule::new(10, 5).unwrap()]);
        limiter.incr(["ip-1"]).await.unwrap();
        limiter.incr(["ip-2"]).await.unwrap();
        let mut keys = limiter.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["ip-1".to_string(), "ip-2".to_string()]);
    }
}

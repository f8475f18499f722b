//! Integration tests for whitelist / blacklist overrides and key
//! listing.

use async_trait::async_trait;
use redis_throttle::infrastructure::mocks::{MockClock, MockStore};
use redis_throttle::{LimiterError, RateLimiter, Rule, StoreClient, StoreError};
use std::sync::Arc;

fn setup(rules: Vec<Rule>) -> (RateLimiter<MockStore>, Arc<MockClock>, MockStore) {
    let clock = Arc::new(MockClock::new(0));
    let store = MockStore::new(clock.clone());
    let limiter = RateLimiter::builder()
        .rules(rules)
        .clock(clock.clone())
        .build(store.clone())
        .unwrap();
    (limiter, clock, store)
}

#[tokio::test]
async fn blacklisted_key_is_always_denied() {
    let (limiter, _, store) = setup(vec![Rule::new(1, 5).unwrap()]);

    limiter.blacklist(["bad"]).await.unwrap();

    assert!(limiter.check(["bad"]).await.unwrap());
    assert!(limiter.incr(["bad"]).await.unwrap());
    assert!(limiter.incr_by(["bad"], 100).await.unwrap());

    // The denial never touched a counter.
    assert!(store.snapshot().hashes.is_empty());
}

#[tokio::test]
async fn whitelist_wins_over_blacklist() {
    let (limiter, _, _) = setup(vec![Rule::new(1, 5).unwrap()]);

    limiter.blacklist(["x"]).await.unwrap();
    limiter.whitelist(["x"]).await.unwrap();

    assert!(!limiter.check(["x"]).await.unwrap());
    assert!(!limiter.incr(["x"]).await.unwrap());
}

#[tokio::test]
async fn whitelisted_key_ignores_rule_limits() {
    let (limiter, _, store) = setup(vec![Rule::new(1, 2).unwrap()]);

    limiter.whitelist(["vip"]).await.unwrap();
    let before = store.snapshot();
    for _ in 0..10 {
        assert!(!limiter.incr(["vip"]).await.unwrap());
    }
    // Whitelisted traffic is not accounted at all.
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn whitelisting_removes_from_blacklist() {
    let (limiter, _, _) = setup(vec![Rule::new(1, 5).unwrap()]);

    limiter.blacklist(["x"]).await.unwrap();
    limiter.whitelist(["x"]).await.unwrap();
    // Dropping the whitelist entry must not resurrect the blacklist one.
    limiter.unwhitelist(["x"]).await.unwrap();

    assert!(!limiter.check(["x"]).await.unwrap());
}

#[tokio::test]
async fn unblacklist_restores_normal_limiting() {
    let (limiter, _, _) = setup(vec![Rule::new(10, 2).unwrap()]);

    limiter.blacklist(["k"]).await.unwrap();
    assert!(limiter.incr(["k"]).await.unwrap());

    limiter.unblacklist(["k"]).await.unwrap();
    assert!(!limiter.incr(["k"]).await.unwrap());
    assert!(!limiter.incr(["k"]).await.unwrap());
    assert!(limiter.incr(["k"]).await.unwrap());
}

#[tokio::test]
async fn mixed_keys_deny_when_any_is_blacklisted() {
    let (limiter, _, _) = setup(vec![Rule::new(1, 5).unwrap()]);

    limiter.blacklist(["bad"]).await.unwrap();
    assert!(limiter.incr(["good", "bad"]).await.unwrap());
    // The blacklisted companion blocked the charge against "good" too.
    assert!(!limiter.incr(["good"]).await.unwrap());
}

#[tokio::test]
async fn whitelisted_companion_admits_the_pair() {
    let (limiter, _, _) = setup(vec![Rule::new(1, 5).unwrap()]);

    limiter.whitelist(["vip"]).await.unwrap();
    limiter.blacklist(["bad"]).await.unwrap();
    // The whitelist check runs first, key by key.
    assert!(!limiter.check(["vip", "bad"]).await.unwrap());
}

#[tokio::test]
async fn list_mutation_requires_valid_keys() {
    let (limiter, _, _) = setup(vec![Rule::new(1, 5).unwrap()]);
    let err = limiter.whitelist(["", "   "]).await.unwrap_err();
    assert!(matches!(err, LimiterError::NoValidKeys));
}

#[tokio::test]
async fn keys_lists_counters_and_leaks_set_names() {
    let (limiter, _, _) = setup(vec![Rule::new(60, 5).unwrap()]);

    limiter.incr(["ip-1"]).await.unwrap();
    limiter.whitelist(["vip"]).await.unwrap();
    limiter.blacklist(["bad"]).await.unwrap();

    let mut listed = limiter.keys().await.unwrap();
    listed.sort();
    // The set names live under the same prefix and show up stripped;
    // callers filter them out if they only want identifiers.
    assert_eq!(
        listed,
        vec![
            "blacklist".to_string(),
            "ip-1".to_string(),
            "whitelist".to_string(),
        ]
    );
}

/// Store wrapper that fails `sadd` for one specific member.
#[derive(Clone)]
struct FaultySadd {
    inner: MockStore,
    poison: String,
}

#[async_trait]
impl StoreClient for FaultySadd {
    async fn eval_by_digest(
        &self,
        digest: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError> {
        self.inner.eval_by_digest(digest, keys, args).await
    }

    async fn eval_by_body(
        &self,
        body: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError> {
        self.inner.eval_by_body(body, keys, args).await
    }

    async fn hget_int(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        self.inner.hget_int(key, field).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(pattern).await
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        if member == self.poison {
            return Err(StoreError::backend(std::io::Error::other("connection reset")));
        }
        self.inner.sadd(set, member).await
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.inner.srem(set, member).await
    }
}

#[tokio::test]
async fn list_mutation_failure_leaves_partial_result() {
    let clock = Arc::new(MockClock::new(0));
    let store = MockStore::new(clock.clone());
    let limiter = RateLimiter::builder()
        .rule(Rule::new(1, 5).unwrap())
        .clock(clock.clone())
        .build(FaultySadd {
            inner: store.clone(),
            poison: "ratelimit:b".to_string(),
        })
        .unwrap();

    let err = limiter.whitelist(["a", "b", "c"]).await.unwrap_err();
    assert!(matches!(err, LimiterError::Store(_)));

    // "a" made it in before the failure, "b" and "c" did not.
    let snapshot = store.snapshot();
    let members = &snapshot.sets["ratelimit:whitelist"];
    assert!(members.contains("ratelimit:a"));
    assert!(!members.contains("ratelimit:b"));
    assert!(!members.contains("ratelimit:c"));
}

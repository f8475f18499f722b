//! Script cache: execution by digest with body fallback.
//!
//! The store addresses cached scripts by the SHA-1 of their body.
//! Sending the digest instead of the body saves bandwidth on the hot
//! path; when the store has dropped its script cache (restart, flush)
//! the digest evaluation fails with a recognizable signal and the
//! cache falls back to sending the body once, after which the store
//! retains it under the same digest again.

use crate::application::error::LimiterError;
use crate::application::ports::{StoreClient, StoreError};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// SHA-1 hex digest of a script body.
pub(crate) fn sha1_hex(body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// One named script: body and its precomputed digest.
#[derive(Debug, Clone)]
struct ScriptRecord {
    digest: String,
    body: String,
}

/// Named atomic scripts, executed by digest with body fallback.
///
/// Populated eagerly at limiter construction and never invalidated
/// client-side; store-side cache eviction is handled transparently by
/// the fallback.
#[derive(Debug)]
pub struct ScriptCache {
    scripts: HashMap<String, ScriptRecord>,
}

impl ScriptCache {
    /// Build a cache from `(name, body)` pairs, hashing each body once.
    pub fn new<I, N, B>(scripts: I) -> Self
    where
        I: IntoIterator<Item = (N, B)>,
        N: Into<String>,
        B: Into<String>,
    {
        let scripts = scripts
            .into_iter()
            .map(|(name, body)| {
                let body = body.into();
                let digest = sha1_hex(&body);
                (name.into(), ScriptRecord { digest, body })
            })
            .collect();
        Self { scripts }
    }

    /// The digest registered for `name`, if any.
    pub fn digest(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(|r| r.digest.as_str())
    }

    /// Execute a named script atomically on the store.
    ///
    /// Evaluation goes by digest first. On the store's unknown-script
    /// signal - and only on that signal - the full body is sent
    /// instead; the store caches it under the same digest as a side
    /// effect. Every other store error propagates unchanged.
    ///
    /// # Errors
    /// [`LimiterError::UnknownScriptName`] if `name` was never
    /// registered; [`LimiterError::Store`] for store failures.
    pub async fn exec<S>(
        &self,
        store: &S,
        name: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, LimiterError>
    where
        S: StoreClient + ?Sized,
    {
        let record = self
            .scripts
            .get(name)
            .ok_or_else(|| LimiterError::UnknownScriptName(name.to_string()))?;

        match store.eval_by_digest(&record.digest, keys, args).await {
            Ok(result) => Ok(result),
            Err(StoreError::UnknownScript) => {
                tracing::debug!(
                    script = name,
                    digest = %record.digest,
                    "script not cached on store, sending body"
                );
                store
                    .eval_by_body(&record.body, keys, args)
                    .await
                    .map_err(LimiterError::from)
            }
            Err(e) => Err(LimiterError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Store stub that only knows scripts it has seen the body of.
    #[derive(Debug, Default)]
    struct ForgetfulStore {
        loaded: Mutex<HashSet<String>>,
        digest_calls: Mutex<u32>,
        body_calls: Mutex<u32>,
    }

    #[async_trait]
    impl StoreClient for ForgetfulStore {
        async fn eval_by_digest(
            &self,
            digest: &str,
            _keys: &[String],
            _args: &[String],
        ) -> Result<i64, StoreError> {
            *self.digest_calls.lock().unwrap() += 1;
            if self.loaded.lock().unwrap().contains(digest) {
                Ok(0)
            } else {
                Err(StoreError::UnknownScript)
            }
        }

        async fn eval_by_body(
            &self,
            body: &str,
            _keys: &[String],
            _args: &[String],
        ) -> Result<i64, StoreError> {
            *self.body_calls.lock().unwrap() += 1;
            self.loaded.lock().unwrap().insert(sha1_hex(body));
            Ok(0)
        }

        async fn hget_int(&self, _key: &str, _field: &str) -> Result<Option<i64>, StoreError> {
            unimplemented!("not used by these tests")
        }

        async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
            unimplemented!("not used by these tests")
        }

        async fn sadd(&self, _set: &str, _member: &str) -> Result<(), StoreError> {
            unimplemented!("not used by these tests")
        }

        async fn srem(&self, _set: &str, _member: &str) -> Result<(), StoreError> {
            unimplemented!("not used by these tests")
        }
    }

    #[test]
    fn test_digest_is_sha1_hex() {
        // sha1("return 0"), precomputed.
        assert_eq!(sha1_hex("return 0"), "06d3d9b2060dd51343d5f19f0e531f15c507e3d1");
    }

    #[test]
    fn test_unknown_name() {
        let cache = ScriptCache::new([("known", "return 0")]);
        assert!(cache.digest("known").is_some());
        assert!(cache.digest("other").is_none());
    }

    #[tokio::test]
    async fn test_exec_falls_back_once_then_sticks() {
        let cache = ScriptCache::new([("noop", "return 0")]);
        let store = ForgetfulStore::default();

        // Cold store: digest misses, body loads it.
        assert_eq!(cache.exec(&store, "noop", &[], &[]).await.unwrap(), 0);
        assert_eq!(*store.digest_calls.lock().unwrap(), 1);
        assert_eq!(*store.body_calls.lock().unwrap(), 1);

        // Warm store: digest hits, no body resend.
        assert_eq!(cache.exec(&store, "noop", &[], &[]).await.unwrap(), 0);
        assert_eq!(*store.digest_calls.lock().unwrap(), 2);
        assert_eq!(*store.body_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exec_unknown_name_fails() {
        let cache = ScriptCache::new([("noop", "return 0")]);
        let store = ForgetfulStore::default();
        let err = cache.exec(&store, "missing", &[], &[]).await.unwrap_err();
        assert!(matches!(err, LimiterError::UnknownScriptName(ref n) if n == "missing"));
    }
}

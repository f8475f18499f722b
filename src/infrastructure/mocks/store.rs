//! In-memory store emulation for testing.
//!
//! `MockStore` implements the store port against process-local state:
//! hashes, sets, per-key expiry evaluated lazily against the supplied
//! clock, and a script cache with the store's unknown-script behavior.
//! The two canonical scripts are recognized by digest and executed as
//! a Rust mirror of their Lua bodies, under one mutex so every
//! evaluation is atomic exactly like on the real store.
//!
//! The mirror exists so limiter behavior is testable deterministically
//! and offline; the Lua bodies themselves are exercised by the
//! Redis-backed integration tests.

use crate::application::ports::{Clock, StoreClient, StoreError};
use crate::application::scripts::sha1_hex;
use crate::domain::lua;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Error for store interactions the mock cannot emulate.
#[derive(Debug)]
pub struct MockStoreError(String);

impl fmt::Display for MockStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock store: {}", self.0)
    }
}

impl std::error::Error for MockStoreError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Program {
    Check,
    Incr,
}

#[derive(Debug, Default)]
struct StoreState {
    hashes: HashMap<String, HashMap<String, i64>>,
    expiries: HashMap<String, u64>,
    sets: HashMap<String, HashSet<String>>,
    loaded_digests: HashSet<String>,
}

impl StoreState {
    /// Drop a key whose expiry has passed, like the store's lazy eviction.
    fn evict_if_expired(&mut self, key: &str, now: u64) {
        if let Some(&deadline) = self.expiries.get(key) {
            if now >= deadline {
                self.hashes.remove(key);
                self.expiries.remove(key);
            }
        }
    }
}

/// Comparable snapshot of the whole store state.
///
/// Useful for asserting that an operation left the store untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Counter hashes: key -> field -> value.
    pub hashes: BTreeMap<String, BTreeMap<String, i64>>,
    /// Sets: name -> members.
    pub sets: BTreeMap<String, BTreeSet<String>>,
    /// Expiry deadlines: key -> unix second.
    pub expiries: BTreeMap<String, u64>,
}

/// In-memory implementation of the store port.
///
/// Clones share state, so a test can hold a handle for inspection
/// while the limiter owns another.
#[derive(Clone)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
    check_digest: String,
    incr_digest: String,
}

impl fmt::Debug for MockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockStore").finish_non_exhaustive()
    }
}

impl MockStore {
    /// Create an empty store whose expiries follow `clock`.
    ///
    /// The script cache starts cold: the first evaluation by digest
    /// fails with the unknown-script signal, exactly like a fresh
    /// store, and succeeds once the body has been sent.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            clock,
            check_digest: sha1_hex(&lua::check_rate_limit_body()),
            incr_digest: sha1_hex(&lua::check_limit_incr_body()),
        }
    }

    /// Forget every cached script, like `SCRIPT FLUSH`.
    pub fn flush_scripts(&self) {
        self.lock().loaded_digests.clear();
    }

    /// Snapshot hashes, sets and expiries for equality assertions.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.lock();
        StoreSnapshot {
            hashes: state
                .hashes
                .iter()
                .map(|(k, h)| (k.clone(), h.iter().map(|(f, v)| (f.clone(), *v)).collect()))
                .collect(),
            sets: state
                .sets
                .iter()
                .map(|(k, s)| (k.clone(), s.iter().cloned().collect()))
                .collect(),
            expiries: state.expiries.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .expect("MockStore mutex poisoned - a test thread panicked while holding the lock")
    }

    fn program_for(&self, digest: &str) -> Option<Program> {
        if digest == self.check_digest {
            Some(Program::Check)
        } else if digest == self.incr_digest {
            Some(Program::Incr)
        } else {
            None
        }
    }

    /// Execute one script program atomically. Mirrors the Lua bodies.
    fn run_program(
        &self,
        program: Program,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError> {
        let rules: Vec<Vec<u64>> = serde_json::from_str(
            args.first().map(String::as_str).unwrap_or_default(),
        )
        .map_err(|e| StoreError::backend(MockStoreError(format!("bad rules payload: {}", e))))?;
        let now: u64 = parse_arg(args, 1, "now")?;
        let weight: i64 = parse_arg(args, 2, "weight")?;
        let whitelist_key = arg(args, 3, "whitelist key")?;
        let blacklist_key = arg(args, 4, "blacklist key")?;

        let mut state = self.lock();

        // Whitelist wins, then blacklist, then the rules.
        for key in keys {
            if state.sets.get(whitelist_key).is_some_and(|s| s.contains(key)) {
                return Ok(0);
            }
            if state.sets.get(blacklist_key).is_some_and(|s| s.contains(key)) {
                return Ok(2);
            }
        }

        // Pure check: stored count minus buckets outside the window.
        for key in keys {
            state.evict_if_expired(key, now);
            let hash = state.hashes.get(key);
            for rule in &rules {
                let (interval, limit, precision) = unpack_rule(rule)?;
                let count = effective_count(hash, interval, precision, now);
                if count >= limit as i64 {
                    return Ok(1);
                }
            }
        }

        if program == Program::Check {
            return Ok(0);
        }

        // Increment, phase one: drop expired buckets, test every
        // (key, rule) pair with the weight applied. No field is
        // created on a denial path.
        let mut pending: Vec<(String, String, String)> = Vec::new();
        for key in keys {
            for rule in &rules {
                let (interval, limit, precision) = unpack_rule(rule)?;
                let count_field = format!("{}:{}:", interval, precision);
                let now_bucket = (now / precision) as i64;
                let oldest_live = now_bucket - interval.div_ceil(precision) as i64 + 1;

                let mut count = 0;
                if let Some(hash) = state.hashes.get_mut(key) {
                    let expired: Vec<String> = hash
                        .keys()
                        .filter(|field| {
                            bucket_index(field, &count_field).is_some_and(|b| b < oldest_live)
                        })
                        .cloned()
                        .collect();
                    if expired.is_empty() {
                        count = hash.get(&count_field).copied().unwrap_or(0);
                    } else {
                        let mut expired_sum = 0;
                        for field in &expired {
                            expired_sum += hash.remove(field).unwrap_or(0);
                        }
                        let entry = hash.entry(count_field.clone()).or_insert(0);
                        *entry -= expired_sum;
                        count = *entry;
                    }
                }
                if count + weight > limit as i64 {
                    return Ok(1);
                }
                pending.push((
                    key.clone(),
                    format!("{}{}", count_field, now_bucket),
                    count_field,
                ));
            }
        }

        // Phase two: nothing denied, commit all increments.
        for (key, bucket_field, count_field) in pending {
            let hash = state.hashes.entry(key).or_default();
            *hash.entry(bucket_field).or_insert(0) += weight;
            *hash.entry(count_field).or_insert(0) += weight;
        }
        let longest = rules.iter().filter_map(|r| r.first().copied()).max();
        if let Some(longest) = longest {
            for key in keys {
                state.expiries.insert(key.clone(), now + longest);
            }
        }
        Ok(0)
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str, StoreError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::backend(MockStoreError(format!("missing {} argument", what))))
}

fn parse_arg<T: std::str::FromStr>(
    args: &[String],
    index: usize,
    what: &str,
) -> Result<T, StoreError> {
    arg(args, index, what)?
        .parse()
        .map_err(|_| StoreError::backend(MockStoreError(format!("malformed {} argument", what))))
}

fn unpack_rule(rule: &[u64]) -> Result<(u64, u64, u64), StoreError> {
    match *rule {
        [interval, limit] => Ok((interval, limit, interval)),
        [interval, limit, precision] => Ok((interval, limit, precision.min(interval))),
        _ => Err(StoreError::backend(MockStoreError(
            "malformed rule entry".to_string(),
        ))),
    }
}

/// Bucket index of a per-bucket field, `None` for anything else.
fn bucket_index(field: &str, count_field: &str) -> Option<i64> {
    field
        .strip_prefix(count_field)
        .filter(|suffix| !suffix.is_empty())
        .and_then(|suffix| suffix.parse().ok())
}

/// Stored cumulative count minus every expired bucket's weight.
fn effective_count(
    hash: Option<&HashMap<String, i64>>,
    interval: u64,
    precision: u64,
    now: u64,
) -> i64 {
    let Some(hash) = hash else { return 0 };
    let count_field = format!("{}:{}:", interval, precision);
    let oldest_live = (now / precision) as i64 - interval.div_ceil(precision) as i64 + 1;
    let mut count = hash.get(&count_field).copied().unwrap_or(0);
    for (field, held) in hash {
        if bucket_index(field, &count_field).is_some_and(|b| b < oldest_live) {
            count -= held;
        }
    }
    count
}

#[async_trait]
impl StoreClient for MockStore {
    async fn eval_by_digest(
        &self,
        digest: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError> {
        let loaded = self.lock().loaded_digests.contains(digest);
        let program = match self.program_for(digest) {
            Some(p) if loaded => p,
            _ => return Err(StoreError::UnknownScript),
        };
        self.run_program(program, keys, args)
    }

    async fn eval_by_body(
        &self,
        body: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError> {
        let digest = sha1_hex(body);
        let program = self.program_for(&digest).ok_or_else(|| {
            StoreError::backend(MockStoreError("unsupported script body".to_string()))
        })?;
        self.lock().loaded_digests.insert(digest);
        self.run_program(program, keys, args)
    }

    async fn hget_int(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        let now = self.clock.now_secs();
        let mut state = self.lock();
        state.evict_if_expired(key, now);
        Ok(state
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .copied())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_secs();
        let mut state = self.lock();
        let known: Vec<String> = state.hashes.keys().chain(state.sets.keys()).cloned().collect();
        for key in &known {
            state.evict_if_expired(key, now);
        }
        let matches = |key: &str| match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        };
        Ok(state
            .hashes
            .keys()
            .chain(state.sets.keys())
            .filter(|key| matches(key))
            .cloned()
            .collect())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.lock()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(members) = state.sets.get_mut(set) {
            members.remove(member);
            // The store drops empty sets.
            if members.is_empty() {
                state.sets.remove(set);
            }
        }
        Ok(())
    }
}

//! Key naming policy for the store.
//!
//! Every counter hash, set name and set member goes through the same
//! prefixing discipline so that several limiters can share one store
//! without colliding, and so that a prefixing store client can take
//! over qualification of identifier keys.

/// Name of the whitelist set, before prefixing.
const WHITELIST_SET: &str = "whitelist";
/// Name of the blacklist set, before prefixing.
const BLACKLIST_SET: &str = "blacklist";

/// Applies the configured prefix policy to identifiers and set names.
///
/// With `client_prefix_mode` enabled, identifier keys are handed to the
/// store unqualified and the store client is expected to prepend the
/// prefix transparently on the wire. Names that travel outside key
/// positions (set names used as script arguments, listing patterns)
/// are always emitted fully qualified.
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
    client_prefix_mode: bool,
}

impl Keyspace {
    /// Create a keyspace with the given prefix and prefixing mode.
    ///
    /// An empty prefix is allowed and elides the `:` delimiter.
    pub fn new(prefix: impl Into<String>, client_prefix_mode: bool) -> Self {
        Self {
            prefix: prefix.into(),
            client_prefix_mode,
        }
    }

    /// Qualify `key` with the configured prefix.
    ///
    /// In client-prefix mode an unforced call returns the key
    /// unchanged; the store client qualifies it on the wire. Forced
    /// calls always qualify, regardless of mode.
    pub fn prefixed(&self, key: &str, force: bool) -> String {
        if self.client_prefix_mode && !force {
            return key.to_string();
        }
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    /// Fully qualified whitelist set name.
    pub fn whitelist_set(&self) -> String {
        self.prefixed(WHITELIST_SET, true)
    }

    /// Fully qualified blacklist set name.
    pub fn blacklist_set(&self) -> String {
        self.prefixed(BLACKLIST_SET, true)
    }

    /// Pattern matching every key under the configured prefix.
    pub fn match_pattern(&self) -> String {
        if self.prefix.is_empty() {
            "*".to_string()
        } else {
            format!("{}:*", self.prefix)
        }
    }

    /// Remove the configured prefix from a fully qualified key.
    ///
    /// Keys not carrying the prefix are returned unchanged.
    pub fn strip<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        match key.strip_prefix(&self.prefix) {
            Some(rest) => rest.strip_prefix(':').unwrap_or(key),
            None => key,
        }
    }

    /// Trim the raw identifiers and drop the ones left empty.
    ///
    /// Returns the surviving identifiers in input order, untouched
    /// beyond trimming. Callers decide what an empty result means.
    pub fn clean_identifiers<I, K>(identifiers: I) -> Vec<String>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        identifiers
            .into_iter()
            .filter_map(|id| {
                let trimmed = id.as_ref().trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect()
    }
}

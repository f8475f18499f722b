//! Rate limiting rules and their wire representation.
//!
//! A [`Rule`] expresses "at most `limit` units of weight per `interval`
//! seconds, measured in buckets of `precision` seconds". Rules are
//! validated on construction and immutable afterwards. A [`RuleSet`]
//! carries the ordered rules of one limiter together with the JSON
//! payload sent to the store on every evaluation.

use std::fmt;

/// Error returned when rule or rule-set construction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Interval must be greater than zero seconds
    ZeroInterval,
    /// Limit must be greater than zero
    ZeroLimit,
    /// Precision, when given, must be greater than zero seconds
    ZeroPrecision,
    /// A limiter needs at least one rule
    NoRules,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroInterval => write!(f, "rule interval must be greater than 0"),
            ConfigError::ZeroLimit => write!(f, "rule limit must be greater than 0"),
            ConfigError::ZeroPrecision => write!(f, "rule precision must be greater than 0"),
            ConfigError::NoRules => write!(f, "at least one rule is required"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A single sliding-window rule.
///
/// # Example
/// ```
/// use redis_throttle::Rule;
///
/// // At most 100 requests per minute, tracked in 5-second buckets.
/// let rule = Rule::with_precision(60, 100, 5).unwrap();
/// assert_eq!(rule.interval_seconds(), 60);
/// assert_eq!(rule.limit(), 100);
/// assert_eq!(rule.precision_seconds(), 5);
///
/// // Precision defaults to the interval (one bucket per window).
/// let coarse = Rule::new(60, 100).unwrap();
/// assert_eq!(coarse.precision_seconds(), 60);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    interval: u64,
    limit: u64,
    precision: Option<u64>,
}

impl Rule {
    /// Create a rule with one bucket spanning the whole interval.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if `interval_seconds` or `limit` is zero.
    pub fn new(interval_seconds: u64, limit: u64) -> Result<Self, ConfigError> {
        Self::build(interval_seconds, limit, None)
    }

    /// Create a rule with an explicit bucket width.
    ///
    /// Smaller precision means finer buckets, more memory on the store
    /// and better accuracy. A precision larger than the interval is
    /// clamped to the interval when the rule is evaluated.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if any argument is zero.
    pub fn with_precision(
        interval_seconds: u64,
        limit: u64,
        precision_seconds: u64,
    ) -> Result<Self, ConfigError> {
        if precision_seconds == 0 {
            return Err(ConfigError::ZeroPrecision);
        }
        Self::build(interval_seconds, limit, Some(precision_seconds))
    }

    fn build(interval: u64, limit: u64, precision: Option<u64>) -> Result<Self, ConfigError> {
        if interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        Ok(Self {
            interval,
            limit,
            precision,
        })
    }

    /// Width of the sliding window, in seconds.
    pub fn interval_seconds(&self) -> u64 {
        self.interval
    }

    /// Maximum cumulative weight permitted within the window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Effective bucket width in seconds, clamped to the interval.
    pub fn precision_seconds(&self) -> u64 {
        self.precision
            .map_or(self.interval, |p| p.min(self.interval))
    }

    /// Name of the hash field holding the cumulative window count.
    ///
    /// Per-bucket fields append the bucket index to this name.
    pub(crate) fn count_field(&self) -> String {
        format!("{}:{}:", self.interval, self.precision_seconds())
    }

    /// Wire form: `[interval, limit]` or `[interval, limit, precision]`.
    ///
    /// The raw precision is carried verbatim; clamping happens on the
    /// store so one serialized payload stays valid for every call.
    fn wire(&self) -> Vec<u64> {
        match self.precision {
            Some(p) => vec![self.interval, self.limit, p],
            None => vec![self.interval, self.limit],
        }
    }
}

/// A rule that an identifier is currently violating, as reported by
/// [`violated_rules`](crate::RateLimiter::violated_rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolatedRule {
    /// Width of the violated rule's window, in seconds.
    pub interval_seconds: u64,
    /// The violated rule's weight limit.
    pub limit: u64,
}

/// The ordered, validated rules of one limiter.
///
/// The JSON payload sent to the store is serialized once at
/// construction and reused verbatim on every call.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    payload: String,
    longest_interval: u64,
}

impl RuleSet {
    /// Build a rule set from a non-empty list of rules.
    ///
    /// # Errors
    /// Returns [`ConfigError::NoRules`] if `rules` is empty.
    pub fn new(rules: Vec<Rule>) -> Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(ConfigError::NoRules);
        }
        let wire: Vec<Vec<u64>> = rules.iter().map(Rule::wire).collect();
        let payload = serde_json::to_string(&wire)
            .expect("a list of integer arrays always serializes to JSON");
        let longest_interval = rules
            .iter()
            .map(Rule::interval_seconds)
            .max()
            .expect("rule set is non-empty");
        Ok(Self {
            rules,
            payload,
            longest_interval,
        })
    }

    /// The UTF-8 JSON rules payload: an array of numeric arrays.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Rules in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// The largest rule interval, used as the counter-hash expiry.
    pub fn longest_interval(&self) -> u64 {
        self.longest_interval
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules. Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

//! Decoding of the three-valued script protocol.

/// Outcome of one atomic evaluation on the store.
///
/// The scripts answer with a single integer: `0` allowed, `1` denied
/// by a rule, `2` denied by the blacklist. Callers that only need a
/// yes/no collapse the two denial codes with [`Decision::is_denied`];
/// the richer signal is kept so a later caller can distinguish plain
/// limiting from blacklisting without a protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action is permitted.
    Allowed,
    /// A rule's limit was reached.
    Limited,
    /// The identifier is blacklisted.
    Blacklisted,
}

impl Decision {
    /// Decode a script result. Returns `None` for any code outside
    /// `{0, 1, 2}`; such a result is a protocol violation and fatal.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Decision::Allowed),
            1 => Some(Decision::Limited),
            2 => Some(Decision::Blacklisted),
            _ => None,
        }
    }

    /// True iff the action must be refused.
    pub fn is_denied(self) -> bool {
        !matches!(self, Decision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(Decision::from_code(0), Some(Decision::Allowed));
        assert_eq!(Decision::from_code(1), Some(Decision::Limited));
        assert_eq!(Decision::from_code(2), Some(Decision::Blacklisted));
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(Decision::from_code(3), None);
        assert_eq!(Decision::from_code(-1), None);
    }

    #[test]
    fn test_denial_collapse() {
        assert!(!Decision::Allowed.is_denied());
        assert!(Decision::Limited.is_denied());
        assert!(Decision::Blacklisted.is_denied());
    }
}

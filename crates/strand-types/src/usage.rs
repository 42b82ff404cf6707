use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Additive token counters.
///
/// Used both for a single response and as a session-wide running total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Per-field saturating sum.
    #[must_use]
    pub fn merge(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            cached_tokens: self.cached_tokens.saturating_add(other.cached_tokens),
            reasoning_tokens: self.reasoning_tokens.saturating_add(other.reasoning_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        self.merge(rhs)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = self.merge(rhs);
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), TokenUsage::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_each_field() {
        let a = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cached_tokens: 2,
            reasoning_tokens: 1,
            total_tokens: 15,
        };
        let b = TokenUsage {
            input_tokens: 1,
            output_tokens: 1,
            total_tokens: 2,
            ..TokenUsage::default()
        };
        let mut total = a;
        total += b;
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 6);
        assert_eq!(total.cached_tokens, 2);
        assert_eq!(total.total_tokens, 17);
        assert_eq!([a, b].into_iter().sum::<TokenUsage>(), total);
    }

    #[test]
    fn test_merge_saturates() {
        let big = TokenUsage {
            total_tokens: u64::MAX,
            ..TokenUsage::default()
        };
        assert_eq!((big + big).total_tokens, u64::MAX);
        assert!(TokenUsage::default().is_empty());
    }
}

use serde::{Deserialize, Serialize};

const DEFAULT_MIN_MATCH_DIGITS: usize = 5;
const DEFAULT_SUFFIX_MATCH_DIGITS: usize = 10;

/// Tunable knobs for fuzzy number comparison.
///
/// Suffix matching tolerates country-code and trunk-prefix variance, at the
/// cost of matching unrelated numbers that share a long tail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchPolicy {
    pub min_digits: usize,
    pub suffix_digits: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            min_digits: DEFAULT_MIN_MATCH_DIGITS,
            suffix_digits: DEFAULT_SUFFIX_MATCH_DIGITS,
        }
    }
}

/// Canonical form: ASCII digits with an optional single leading `+`.
///
/// The `+` survives only when it is the first digit-or-plus character of the
/// input, so `"(+91) 98765-43210"` becomes `"+919876543210"`. Input without
/// any digit yields an empty string.
pub fn normalize(raw: &str) -> String {
    let leading_plus = raw
        .chars()
        .find(|character| character.is_ascii_digit() || *character == '+')
        .is_some_and(|character| character == '+');
    let digits = digits_only(raw);
    if digits.is_empty() {
        return String::new();
    }
    if leading_plus {
        format!("+{digits}")
    } else {
        digits
    }
}

pub fn digits_only(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_digit)
        .collect()
}

pub fn matches(left: &str, right: &str) -> bool {
    matches_with(left, right, &MatchPolicy::default())
}

pub fn matches_with(left: &str, right: &str, policy: &MatchPolicy) -> bool {
    let left = digits_only(&normalize(left));
    let right = digits_only(&normalize(right));
    if left.len() < policy.min_digits || right.len() < policy.min_digits {
        return false;
    }

    left == right
        || left.ends_with(&right)
        || right.ends_with(&left)
        || tail(&left, policy.suffix_digits) == tail(&right, policy.suffix_digits)
}

fn tail(digits: &str, count: usize) -> &str {
    // digits are ASCII, byte offsets are char offsets
    &digits[digits.len().saturating_sub(count)..]
}

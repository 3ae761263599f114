//! Comparison operators for condition nodes.
//!
//! Operands are compared as rendered strings. Numeric operators parse both
//! sides as `f64`; a side that does not parse makes the comparison false.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Self::Equals,
        Self::NotEquals,
        Self::Contains,
        Self::NotContains,
        Self::GreaterThan,
        Self::LessThan,
        Self::StartsWith,
        Self::EndsWith,
        Self::IsEmpty,
        Self::IsNotEmpty,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        }
    }

    /// Applies the operator to rendered operands.
    ///
    /// A missing right operand never equals anything, reads as `""` for the
    /// substring operators and as `"0"` for the numeric ones.
    #[must_use]
    pub fn evaluate(&self, left: &str, right: Option<&str>) -> bool {
        let right_or_empty = right.unwrap_or("");
        match self {
            Self::Equals => right == Some(left),
            Self::NotEquals => right != Some(left),
            Self::Contains => left.contains(right_or_empty),
            Self::NotContains => !left.contains(right_or_empty),
            Self::GreaterThan => compare_numbers(left, right, |l, r| l > r),
            Self::LessThan => compare_numbers(left, right, |l, r| l < r),
            Self::StartsWith => left.starts_with(right_or_empty),
            Self::EndsWith => left.ends_with(right_or_empty),
            Self::IsEmpty => left.is_empty(),
            Self::IsNotEmpty => !left.is_empty(),
        }
    }
}

fn compare_numbers(left: &str, right: Option<&str>, op: impl Fn(f64, f64) -> bool) -> bool {
    let right = right.filter(|r| !r.trim().is_empty()).unwrap_or("0");
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => op(l, r),
        _ => false,
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an operator name outside the known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperator(pub String);

impl fmt::Display for UnknownOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operator '{}'", self.0)
    }
}

impl std::error::Error for UnknownOperator {}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperator(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_exact_string_match() {
        assert!(Operator::Equals.evaluate("open", Some("open")));
        assert!(!Operator::Equals.evaluate("open", Some("Open")));
        assert!(!Operator::Equals.evaluate("", None));
        assert!(Operator::NotEquals.evaluate("", None));
    }

    #[test]
    fn substring_operators() {
        assert!(Operator::Contains.evaluate("payment failed", Some("fail")));
        assert!(Operator::NotContains.evaluate("payment ok", Some("fail")));
        assert!(Operator::StartsWith.evaluate("refs/heads/main", Some("refs/heads")));
        assert!(Operator::EndsWith.evaluate("report.pdf", Some(".pdf")));
        // An absent needle is the empty string, which every string contains.
        assert!(Operator::Contains.evaluate("anything", None));
    }

    #[test]
    fn numeric_operators_parse_both_sides() {
        assert!(Operator::GreaterThan.evaluate("10", Some("9.5")));
        assert!(!Operator::GreaterThan.evaluate("9", Some("10")));
        assert!(Operator::LessThan.evaluate(" -1 ", None));
        assert!(Operator::GreaterThan.evaluate("3", Some("")));
        assert!(!Operator::GreaterThan.evaluate("abc", Some("1")));
        assert!(!Operator::LessThan.evaluate("1", Some("abc")));
    }

    #[test]
    fn only_the_empty_string_is_empty() {
        assert!(Operator::IsEmpty.evaluate("", None));
        assert!(!Operator::IsEmpty.evaluate("   ", None));
        assert!(Operator::IsNotEmpty.evaluate("   ", None));
        assert!(Operator::IsNotEmpty.evaluate("x", None));
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("greater_than".parse::<Operator>(), Ok(Operator::GreaterThan));
        assert!("matches_regex".parse::<Operator>().is_err());
    }
}

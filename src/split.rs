//! Split rules stored on internal tree nodes.
//!
//! A rule routes an observation left when it evaluates true. Numeric and
//! ordered-categorical features use a threshold; unordered-categorical
//! features use a category subset.

use smallvec::SmallVec;

/// Category set attached to an unordered-categorical split. Small by
/// construction (one entry per category routed left).
pub type CategorySet = SmallVec<[u32; 8]>;

/// Decision rule of an internal node.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitRule {
    /// Route left when `x <= threshold`.
    Numeric(f64),
    /// Route left when `x` is one of the listed categories.
    Categories(CategorySet),
}

impl SplitRule {
    /// Evaluates the rule against a raw feature value.
    #[inline(always)]
    pub fn goes_left(&self, value: f64) -> bool {
        match self {
            SplitRule::Numeric(threshold) => value <= *threshold,
            SplitRule::Categories(categories) => categories.contains(&(value as u32)),
        }
    }

    /// Placeholder rule carried by leaf nodes.
    pub fn none() -> Self {
        SplitRule::Numeric(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_numeric_rule_routes_ties_left() {
        let rule = SplitRule::Numeric(1.5);
        assert!(rule.goes_left(1.5));
        assert!(rule.goes_left(-2.0));
        assert!(!rule.goes_left(1.500001));
    }

    #[test]
    fn test_category_rule_checks_membership() {
        let rule = SplitRule::Categories(smallvec![0, 2]);
        assert!(rule.goes_left(0.0));
        assert!(rule.goes_left(2.0));
        assert!(!rule.goes_left(1.0));
    }
}

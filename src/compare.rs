use crate::model::Outcome;
use serde::{Deserialize, Serialize};

/// How two row sets are judged equivalent.
///
/// `OrderSensitive` reproduces the source behavior: the canonical JSON
/// serializations must be identical, so row order, column order and value
/// formatting all matter. That is deliberately strict — a query without
/// `ORDER BY` has no defined row order — which is why `SetEquality` exists
/// for callers that want bag semantics instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparePolicy {
    #[default]
    OrderSensitive,
    SetEquality,
}

/// Decide whether a candidate outcome grades as equal to the reference
/// outcome. Row sets compare per the policy; non-row statements compare by
/// affected-row count; mixed shapes never match.
pub fn outcomes_match(candidate: &Outcome, reference: &Outcome, policy: ComparePolicy) -> bool {
    match (candidate, reference) {
        (Outcome::Rows(c), Outcome::Rows(r)) => match policy {
            ComparePolicy::OrderSensitive => {
                c.to_json().to_string() == r.to_json().to_string()
            }
            ComparePolicy::SetEquality => {
                let mut cs: Vec<String> = c
                    .to_json()
                    .as_array()
                    .map(|rows| rows.iter().map(|row| row.to_string()).collect())
                    .unwrap_or_default();
                let mut rs: Vec<String> = r
                    .to_json()
                    .as_array()
                    .map(|rows| rows.iter().map(|row| row.to_string()).collect())
                    .unwrap_or_default();
                cs.sort();
                rs.sort();
                cs == rs
            }
        },
        (Outcome::Affected(c), Outcome::Affected(r)) => c == r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cell, RowSet};

    fn rows(values: &[i64]) -> Outcome {
        Outcome::Rows(RowSet {
            columns: vec!["v".into()],
            rows: values.iter().map(|v| vec![Cell::Int(*v)]).collect(),
        })
    }

    #[test]
    fn identical_rows_match() {
        assert!(outcomes_match(
            &rows(&[1, 2, 3]),
            &rows(&[1, 2, 3]),
            ComparePolicy::OrderSensitive
        ));
    }

    #[test]
    fn reordered_rows_mismatch_under_default_policy() {
        assert!(!outcomes_match(
            &rows(&[3, 2, 1]),
            &rows(&[1, 2, 3]),
            ComparePolicy::OrderSensitive
        ));
    }

    #[test]
    fn reordered_rows_match_under_set_equality() {
        assert!(outcomes_match(
            &rows(&[3, 2, 1]),
            &rows(&[1, 2, 3]),
            ComparePolicy::SetEquality
        ));
    }

    #[test]
    fn column_order_matters_in_both_policies() {
        let a = Outcome::Rows(RowSet {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![Cell::Int(1), Cell::Int(2)]],
        });
        let b = Outcome::Rows(RowSet {
            columns: vec!["b".into(), "a".into()],
            rows: vec![vec![Cell::Int(2), Cell::Int(1)]],
        });
        assert!(!outcomes_match(&a, &b, ComparePolicy::OrderSensitive));
        assert!(!outcomes_match(&a, &b, ComparePolicy::SetEquality));
    }

    #[test]
    fn affected_counts_compare_numerically() {
        assert!(outcomes_match(
            &Outcome::Affected(3),
            &Outcome::Affected(3),
            ComparePolicy::OrderSensitive
        ));
        assert!(!outcomes_match(
            &Outcome::Affected(3),
            &Outcome::Affected(0),
            ComparePolicy::OrderSensitive
        ));
    }

    #[test]
    fn mixed_shapes_never_match() {
        assert!(!outcomes_match(
            &rows(&[]),
            &Outcome::Affected(0),
            ComparePolicy::OrderSensitive
        ));
        assert!(!outcomes_match(
            &Outcome::Affected(0),
            &rows(&[]),
            ComparePolicy::SetEquality
        ));
    }
}

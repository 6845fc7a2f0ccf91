//! Resume filters
//!
//! When an ORDER BY query resumes, each reopened partition is asked only for rows at
//! or past a sort-key position. [`RangeFilter`] describes that position; it renders to
//! query text for a remote backend and can be evaluated directly by an in-memory one.

use crate::types::{compare_sort_keys, OrderByColumn, SortOrder};
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Rows whose sort key is past (or at, when inclusive) `key`, in sort direction
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    columns: Vec<OrderByColumn>,
    key: Vec<Value>,
    inclusive: bool,
}

impl RangeFilter {
    /// Filter for rows strictly past `key`
    pub fn after(columns: &[OrderByColumn], key: &[Value]) -> Self {
        Self::new(columns, key, false)
    }

    /// Filter for rows at or past `key`
    pub fn at_or_after(columns: &[OrderByColumn], key: &[Value]) -> Self {
        Self::new(columns, key, true)
    }

    fn new(columns: &[OrderByColumn], key: &[Value], inclusive: bool) -> Self {
        debug_assert_eq!(columns.len(), key.len());
        Self {
            columns: columns.to_vec(),
            key: key.to_vec(),
            inclusive,
        }
    }

    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }

    pub fn key(&self) -> &[Value] {
        &self.key
    }

    /// Evaluate the filter against a row's sort key
    pub fn matches(&self, sort_key: &[Value]) -> bool {
        match compare_sort_keys(&self.columns, sort_key, &self.key) {
            Ordering::Greater => true,
            Ordering::Equal => self.inclusive,
            Ordering::Less => false,
        }
    }

    fn operator(order: SortOrder, inclusive: bool) -> &'static str {
        match (order, inclusive) {
            (SortOrder::Ascending, false) => ">",
            (SortOrder::Ascending, true) => ">=",
            (SortOrder::Descending, false) => "<",
            (SortOrder::Descending, true) => "<=",
        }
    }
}

impl fmt::Display for RangeFilter {
    /// Disjunction over prefix lengths: the prefix ties and its last column is past the
    /// key. Only the full-length prefix may be inclusive.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.columns.len().saturating_sub(1);
        if last == 0 {
            if let (Some(column), Some(value)) = (self.columns.first(), self.key.first()) {
                let op = Self::operator(column.order, self.inclusive);
                return write!(f, "{} {} {}", column.expression, op, value);
            }
            return write!(f, "true");
        }

        for prefix in 0..=last {
            if prefix > 0 {
                write!(f, " OR ")?;
            }
            write!(f, "(")?;
            for (column, value) in self.columns.iter().zip(&self.key).take(prefix) {
                write!(f, "{} = {} AND ", column.expression, value)?;
            }
            let column = &self.columns[prefix];
            let op = Self::operator(column.order, self.inclusive && prefix == last);
            write!(f, "{} {} {})", column.expression, op, self.key[prefix])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_column_rendering() {
        let columns = vec![OrderByColumn::asc("c.age")];
        let key = vec![Value::from(30i64)];
        assert_eq!(RangeFilter::after(&columns, &key).to_string(), "c.age > 30");
        assert_eq!(RangeFilter::at_or_after(&columns, &key).to_string(), "c.age >= 30");

        let columns = vec![OrderByColumn::desc("c.name")];
        let key = vec![Value::from("bob")];
        assert_eq!(
            RangeFilter::at_or_after(&columns, &key).to_string(),
            "c.name <= \"bob\""
        );
    }

    #[test]
    fn test_multi_column_rendering() {
        let columns = vec![OrderByColumn::asc("c.a"), OrderByColumn::desc("c.b")];
        let key = vec![Value::from(1i64), Value::from("x")];
        assert_eq!(
            RangeFilter::at_or_after(&columns, &key).to_string(),
            "(c.a > 1) OR (c.a = 1 AND c.b <= \"x\")"
        );
        assert_eq!(
            RangeFilter::after(&columns, &key).to_string(),
            "(c.a > 1) OR (c.a = 1 AND c.b < \"x\")"
        );
    }

    #[test]
    fn test_matches_follows_sort_direction() {
        let columns = vec![OrderByColumn::asc("c.a"), OrderByColumn::desc("c.b")];
        let key = vec![Value::from(1i64), Value::from("m")];
        let strict = RangeFilter::after(&columns, &key);
        let inclusive = RangeFilter::at_or_after(&columns, &key);

        assert!(strict.matches(&[Value::from(2i64), Value::from("z")]));
        assert!(strict.matches(&[Value::from(1i64), Value::from("a")]));
        assert!(!strict.matches(&[Value::from(1i64), Value::from("z")]));
        assert!(!strict.matches(&key));
        assert!(inclusive.matches(&key));
        assert!(!inclusive.matches(&[Value::from(0i64), Value::from("a")]));
    }
}

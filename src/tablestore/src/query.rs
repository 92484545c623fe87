//! Filter expressions and bounded queries.
//!
//! Filters render to the OData `$filter` syntax understood by the table
//! service and can also be evaluated locally, which is what the in-memory
//! backend does.

use std::fmt;

use crate::{PARTITION_KEY, ROW_KEY, RowId};

/// Comparison operators supported on string columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Ge,
    Gt,
    Eq,
}

impl Comparison {
    fn keyword(self) -> &'static str {
        match self {
            Comparison::Lt => "lt",
            Comparison::Le => "le",
            Comparison::Ge => "ge",
            Comparison::Gt => "gt",
            Comparison::Eq => "eq",
        }
    }

    fn holds(self, lhs: &str, rhs: &str) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Eq => lhs == rhs,
        }
    }
}

/// A boolean filter over the key columns of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Compare {
        field: String,
        op: Comparison,
        value: String,
    },
    And(Box<Filter>, Box<Filter>),
}

impl Filter {
    /// Compare the partition key against a literal.
    pub fn partition_key(op: Comparison, value: impl Into<String>) -> Self {
        Filter::Compare {
            field: PARTITION_KEY.to_string(),
            op,
            value: value.into(),
        }
    }

    /// Combine two filters with a logical `and`.
    pub fn and(self, other: Filter) -> Self {
        Filter::And(Box::new(self), Box::new(other))
    }

    /// Evaluate the filter against a row identifier.
    ///
    /// Comparisons on columns other than the keys never match, since the
    /// identifier carries no other data.
    pub fn matches(&self, row: &RowId) -> bool {
        match self {
            Filter::Compare { field, op, value } => {
                let lhs = match field.as_str() {
                    PARTITION_KEY => &row.partition_key,
                    ROW_KEY => &row.row_key,
                    _ => return false,
                };
                op.holds(lhs, value)
            }
            Filter::And(lhs, rhs) => lhs.matches(row) && rhs.matches(row),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Compare { field, op, value } => {
                write!(f, "{field} {} '{}'", op.keyword(), value.replace('\'', "''"))
            }
            Filter::And(lhs, rhs) => write!(f, "({lhs}) and ({rhs})"),
        }
    }
}

/// A projected query capped at a maximum number of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub filter: Filter,
    pub select: Vec<String>,
    pub take: usize,
}

impl TableQuery {
    /// Query selecting only the key columns.
    pub fn keys_only(filter: Filter, take: usize) -> Self {
        Self {
            filter,
            select: vec![PARTITION_KEY.to_string(), ROW_KEY.to_string()],
            take,
        }
    }

    /// The rendered `$filter` expression.
    pub fn filter_string(&self) -> String {
        self.filter.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_renders_odata() {
        let filter = Filter::partition_key(Comparison::Lt, "2016-01-01 00:00:00");
        assert_eq!(filter.to_string(), "PartitionKey lt '2016-01-01 00:00:00'");

        let range = Filter::partition_key(Comparison::Ge, "a")
            .and(Filter::partition_key(Comparison::Le, "b"));
        assert_eq!(
            range.to_string(),
            "(PartitionKey ge 'a') and (PartitionKey le 'b')"
        );
    }

    #[test]
    fn test_filter_escapes_quotes() {
        let filter = Filter::partition_key(Comparison::Eq, "o'clock");
        assert_eq!(filter.to_string(), "PartitionKey eq 'o''clock'");
    }

    #[test]
    fn test_filter_matches() {
        let range = Filter::partition_key(Comparison::Ge, "b")
            .and(Filter::partition_key(Comparison::Lt, "d"));

        assert!(!range.matches(&RowId::new("a", "1")));
        assert!(range.matches(&RowId::new("b", "1")));
        assert!(range.matches(&RowId::new("c", "1")));
        assert!(!range.matches(&RowId::new("d", "1")));
    }

    #[test]
    fn test_filter_on_unknown_column_never_matches() {
        let filter = Filter::Compare {
            field: "Timestamp".to_string(),
            op: Comparison::Lt,
            value: "z".to_string(),
        };
        assert!(!filter.matches(&RowId::new("a", "b")));
    }

    #[test]
    fn test_keys_only_projection() {
        let query = TableQuery::keys_only(Filter::partition_key(Comparison::Lt, "x"), 100);
        assert_eq!(query.select, vec!["PartitionKey", "RowKey"]);
        assert_eq!(query.take, 100);
    }
}

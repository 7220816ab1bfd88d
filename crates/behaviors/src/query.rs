//! Minimal query model consumed by the object manager
//!
//! Behaviors express the few queries they need (similar slugs, coordinate
//! shifts, closure rows) as a conjunction of conditions plus optional
//! assignments and ordering. Backends translate these into their own query
//! language; the in-memory manager evaluates them directly.

use std::cmp::Ordering;
use std::fmt;

use crate::entity::Row;
use crate::value::FieldValue;

/// Query operator types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    StartsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperator::Equal => write!(f, "="),
            QueryOperator::NotEqual => write!(f, "!="),
            QueryOperator::GreaterThan => write!(f, ">"),
            QueryOperator::GreaterThanOrEqual => write!(f, ">="),
            QueryOperator::LessThan => write!(f, "<"),
            QueryOperator::LessThanOrEqual => write!(f, "<="),
            QueryOperator::StartsWith => write!(f, "LIKE"),
            QueryOperator::In => write!(f, "IN"),
            QueryOperator::NotIn => write!(f, "NOT IN"),
            QueryOperator::IsNull => write!(f, "IS NULL"),
            QueryOperator::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Where clause condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: QueryOperator,
    pub value: FieldValue,
    /// For IN and NOT IN
    pub values: Vec<FieldValue>,
}

impl Condition {
    /// Evaluate the condition against a field value
    pub fn matches(&self, actual: &FieldValue) -> bool {
        match self.operator {
            QueryOperator::IsNull => actual.is_null(),
            QueryOperator::IsNotNull => !actual.is_null(),
            // SQL semantics: comparisons against NULL never match
            _ if actual.is_null() => false,
            QueryOperator::Equal => actual.same_as(&self.value),
            QueryOperator::NotEqual => !actual.same_as(&self.value),
            QueryOperator::GreaterThan => actual.compare(&self.value) == Some(Ordering::Greater),
            QueryOperator::GreaterThanOrEqual => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            QueryOperator::LessThan => actual.compare(&self.value) == Some(Ordering::Less),
            QueryOperator::LessThanOrEqual => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            QueryOperator::StartsWith => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(prefix)) => text.starts_with(prefix),
                _ => false,
            },
            QueryOperator::In => self.values.iter().any(|v| actual.same_as(v)),
            QueryOperator::NotIn => !self.values.iter().any(|v| actual.same_as(v)),
        }
    }
}

/// Conjunction of conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub conditions: Vec<Condition>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: &str, operator: QueryOperator, value: FieldValue) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            operator,
            value,
            values: Vec::new(),
        });
        self
    }

    /// Equality; a null value turns into IS NULL
    pub fn where_eq(self, field: &str, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        if value.is_null() {
            return self.where_null(field);
        }
        self.push(field, QueryOperator::Equal, value)
    }

    pub fn where_ne(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, QueryOperator::NotEqual, value.into())
    }

    pub fn where_gt(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, QueryOperator::GreaterThan, value.into())
    }

    pub fn where_gte(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, QueryOperator::GreaterThanOrEqual, value.into())
    }

    pub fn where_lt(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, QueryOperator::LessThan, value.into())
    }

    pub fn where_lte(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, QueryOperator::LessThanOrEqual, value.into())
    }

    /// Textual prefix match (`LIKE 'prefix%'`)
    pub fn where_starts_with(self, field: &str, prefix: &str) -> Self {
        self.push(field, QueryOperator::StartsWith, FieldValue::from(prefix))
    }

    pub fn where_in(mut self, field: &str, values: Vec<FieldValue>) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            operator: QueryOperator::In,
            value: FieldValue::Null,
            values,
        });
        self
    }

    pub fn where_not_in(mut self, field: &str, values: Vec<FieldValue>) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            operator: QueryOperator::NotIn,
            value: FieldValue::Null,
            values,
        });
        self
    }

    pub fn where_null(self, field: &str) -> Self {
        self.push(field, QueryOperator::IsNull, FieldValue::Null)
    }

    pub fn where_not_null(self, field: &str) -> Self {
        self.push(field, QueryOperator::IsNotNull, FieldValue::Null)
    }

    /// True when every condition holds for the looked-up values
    pub fn matches<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> FieldValue,
    {
        self.conditions
            .iter()
            .all(|condition| condition.matches(&lookup(&condition.field)))
    }

    pub fn matches_row(&self, row: &Row) -> bool {
        self.matches(|field| row.get(field).cloned().unwrap_or_default())
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Ordering clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: OrderDirection::Desc,
        }
    }

    /// Compare two rows by a list of ordering clauses
    pub fn compare_rows(order_by: &[OrderBy], a: &Row, b: &Row) -> Ordering {
        for clause in order_by {
            let left = a.get(&clause.field).cloned().unwrap_or_default();
            let right = b.get(&clause.field).cloned().unwrap_or_default();
            let ordering = left.compare(&right).unwrap_or(Ordering::Equal);
            let ordering = match clause.direction {
                OrderDirection::Asc => ordering,
                OrderDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Assignment operation in an update statement
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOp {
    Set(FieldValue),
    Increment(i64),
}

/// `field = value` or `field = field + delta`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub operation: AssignmentOp,
}

impl Assignment {
    pub fn set(field: &str, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.to_string(),
            operation: AssignmentOp::Set(value.into()),
        }
    }

    pub fn increment(field: &str, delta: i64) -> Self {
        Self {
            field: field.to_string(),
            operation: AssignmentOp::Increment(delta),
        }
    }

    /// New value for a field currently holding `current`
    pub fn apply(&self, current: &FieldValue) -> FieldValue {
        match &self.operation {
            AssignmentOp::Set(value) => value.clone(),
            AssignmentOp::Increment(delta) => match current {
                FieldValue::Int(value) => FieldValue::Int(value + delta),
                FieldValue::Float(value) => FieldValue::Float(value + *delta as f64),
                other => other.clone(),
            },
        }
    }
}

/// Bulk update: `UPDATE class SET assignments WHERE criteria ORDER BY order_by`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStatement {
    pub criteria: Criteria,
    pub assignments: Vec<Assignment>,
    /// Row order in which the backend applies the update
    pub order_by: Vec<OrderBy>,
}

impl UpdateStatement {
    pub fn new(criteria: Criteria) -> Self {
        Self {
            criteria,
            ..Default::default()
        }
    }

    pub fn set(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.assignments.push(Assignment::set(field, value));
        self
    }

    pub fn increment(mut self, field: &str, delta: i64) -> Self {
        self.assignments.push(Assignment::increment(field, delta));
        self
    }

    pub fn assign(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Apply the assignments to a row in place
    pub fn apply_to(&self, row: &mut Row) {
        for assignment in &self.assignments {
            let current = row.get(&assignment.field).cloned().unwrap_or_default();
            row.insert(assignment.field.clone(), assignment.apply(&current));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, FieldValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_criteria_range_match() {
        let criteria = Criteria::new()
            .where_gte("lft", 3)
            .where_lte("rgt", 8)
            .where_eq("root", 1);

        assert!(criteria.matches_row(&row(&[
            ("lft", 3.into()),
            ("rgt", 4.into()),
            ("root", 1.into())
        ])));
        assert!(!criteria.matches_row(&row(&[
            ("lft", 2.into()),
            ("rgt", 4.into()),
            ("root", 1.into())
        ])));
    }

    #[test]
    fn test_null_never_matches_comparisons() {
        let criteria = Criteria::new().where_ne("slug", "a");
        assert!(!criteria.matches_row(&row(&[("slug", FieldValue::Null)])));

        let criteria = Criteria::new().where_eq("parent", FieldValue::Null);
        assert!(criteria.matches_row(&row(&[("parent", FieldValue::Null)])));
    }

    #[test]
    fn test_starts_with_and_in() {
        let criteria = Criteria::new()
            .where_starts_with("path", "1,")
            .where_not_in("id", vec![FieldValue::Int(2)]);
        assert!(criteria.matches_row(&row(&[("path", "1,3".into()), ("id", 3.into())])));
        assert!(!criteria.matches_row(&row(&[("path", "10,3".into()), ("id", 3.into())])));
        assert!(!criteria.matches_row(&row(&[("path", "1,2".into()), ("id", 2.into())])));
    }

    #[test]
    fn test_update_statement_apply() {
        let statement = UpdateStatement::new(Criteria::new())
            .increment("lft", 2)
            .set("root", 5);
        let mut target = row(&[("lft", 4.into()), ("root", 1.into())]);
        statement.apply_to(&mut target);
        assert_eq!(target.get("lft"), Some(&FieldValue::Int(6)));
        assert_eq!(target.get("root"), Some(&FieldValue::Int(5)));
    }

    #[test]
    fn test_order_rows_descending() {
        let mut rows = vec![
            row(&[("lft", 1.into())]),
            row(&[("lft", 5.into())]),
            row(&[("lft", 3.into())]),
        ];
        let order = [OrderBy::desc("lft")];
        rows.sort_by(|a, b| OrderBy::compare_rows(&order, a, b));
        let lefts: Vec<_> = rows.iter().map(|r| r["lft"].clone()).collect();
        assert_eq!(
            lefts,
            vec![FieldValue::Int(5), FieldValue::Int(3), FieldValue::Int(1)]
        );
    }
}

use std::cmp::Ordering;

use crate::execution::error::ExecutionError;
use crate::storage::table::{Schema, Tuple, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// Minimal expression tree: enough to express scan predicates, join
/// conditions, grouping keys and sort keys. Value arithmetic belongs to the
/// external type system.
#[derive(Debug, Clone)]
pub enum Expression {
    /// Reference into the input tuple by column position
    ColumnRef(usize),
    Constant(Value),
    Compare(CompareOp, Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn column(index: usize) -> Self {
        Expression::ColumnRef(index)
    }

    pub fn constant(value: Value) -> Self {
        Expression::Constant(value)
    }

    pub fn compare(op: CompareOp, lhs: Expression, rhs: Expression) -> Self {
        Expression::Compare(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn and(lhs: Expression, rhs: Expression) -> Self {
        Expression::And(Box::new(lhs), Box::new(rhs))
    }

    /// Convenience for the common `col = const` predicate.
    pub fn column_equals(index: usize, value: Value) -> Self {
        Self::compare(
            CompareOp::Equal,
            Self::column(index),
            Self::constant(value),
        )
    }

    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Result<Value, ExecutionError> {
        match self {
            Expression::ColumnRef(index) => {
                if *index >= schema.len() {
                    return Err(ExecutionError::Expression(format!(
                        "column {} out of range",
                        index
                    )));
                }
                Ok(tuple.value(*index).clone())
            }
            Expression::Constant(value) => Ok(value.clone()),
            Expression::Compare(op, lhs, rhs) => {
                let l = lhs.evaluate(tuple, schema)?;
                let r = rhs.evaluate(tuple, schema)?;
                Ok(compare_values(*op, &l, &r))
            }
            Expression::And(lhs, rhs) => {
                let l = lhs.evaluate(tuple, schema)?;
                let r = rhs.evaluate(tuple, schema)?;
                Ok(Value::Boolean(
                    l.as_bool().unwrap_or(false) && r.as_bool().unwrap_or(false),
                ))
            }
        }
    }

    /// Evaluate against a joined pair: column indexes past the left schema
    /// refer into the right tuple.
    pub fn evaluate_join(
        &self,
        left: &Tuple,
        left_schema: &Schema,
        right: &Tuple,
        right_schema: &Schema,
    ) -> Result<Value, ExecutionError> {
        match self {
            Expression::ColumnRef(index) => {
                if *index < left_schema.len() {
                    Ok(left.value(*index).clone())
                } else if *index - left_schema.len() < right_schema.len() {
                    Ok(right.value(*index - left_schema.len()).clone())
                } else {
                    Err(ExecutionError::Expression(format!(
                        "join column {} out of range",
                        index
                    )))
                }
            }
            Expression::Constant(value) => Ok(value.clone()),
            Expression::Compare(op, lhs, rhs) => {
                let l = lhs.evaluate_join(left, left_schema, right, right_schema)?;
                let r = rhs.evaluate_join(left, left_schema, right, right_schema)?;
                Ok(compare_values(*op, &l, &r))
            }
            Expression::And(lhs, rhs) => {
                let l = lhs.evaluate_join(left, left_schema, right, right_schema)?;
                let r = rhs.evaluate_join(left, left_schema, right, right_schema)?;
                Ok(Value::Boolean(
                    l.as_bool().unwrap_or(false) && r.as_bool().unwrap_or(false),
                ))
            }
        }
    }
}

/// SQL-ish comparison: anything against NULL is false.
fn compare_values(op: CompareOp, l: &Value, r: &Value) -> Value {
    if l.is_null() || r.is_null() {
        return Value::Boolean(false);
    }
    let ord = l.cmp(r);
    let result = match op {
        CompareOp::Equal => ord == Ordering::Equal,
        CompareOp::NotEqual => ord != Ordering::Equal,
        CompareOp::LessThan => ord == Ordering::Less,
        CompareOp::LessThanOrEqual => ord != Ordering::Greater,
        CompareOp::GreaterThan => ord == Ordering::Greater,
        CompareOp::GreaterThanOrEqual => ord != Ordering::Less,
    };
    Value::Boolean(result)
}

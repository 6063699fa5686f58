use crate::catalog::IndexOid;
use crate::common::types::TableOid;
use crate::execution::expression::Expression;

/// Join flavors the executors support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// Sort directions; `Default` sorts ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByType {
    Default,
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

// Plan nodes are plain immutable data handed to executors at construction.
// The planner that produces them is an external collaborator.

#[derive(Debug, Clone)]
pub struct SeqScanPlan {
    pub table_oid: TableOid,
    pub predicate: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct IndexScanPlan {
    pub index_oid: IndexOid,
    /// Scan from this key onwards when set; full scan otherwise.
    pub start_key: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub table_oid: TableOid,
}

#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub table_oid: TableOid,
}

#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub table_oid: TableOid,
    /// Per-column replacement expressions, evaluated against the old tuple.
    pub targets: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct NestedLoopJoinPlan {
    pub join_type: JoinType,
    /// Predicate over the concatenated (left, right) column space
    pub predicate: Expression,
}

#[derive(Debug, Clone)]
pub struct HashJoinPlan {
    pub join_type: JoinType,
    pub left_keys: Vec<Expression>,
    pub right_keys: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct AggregationPlan {
    pub group_bys: Vec<Expression>,
    pub aggregates: Vec<(AggregationType, Expression)>,
}

#[derive(Debug, Clone)]
pub struct SortPlan {
    pub order_bys: Vec<(OrderByType, Expression)>,
}

#[derive(Debug, Clone)]
pub struct TopNPlan {
    pub n: usize,
    pub order_bys: Vec<(OrderByType, Expression)>,
}

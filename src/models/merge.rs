use serde::Serialize;

use crate::models::{AggregateFunction, OrderDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStrategy {
    PassThrough,
    Concat,
    OrderBy,
    GroupBy,
    Pagination,
}

/// Locates a result column either by position or by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSelector {
    Index(usize),
    Label(String),
}

impl ColumnSelector {
    /// Resolves against the column labels of a result.
    pub fn resolve(&self, columns: &[String]) -> Option<usize> {
        match self {
            ColumnSelector::Index(index) if *index < columns.len() => Some(*index),
            ColumnSelector::Index(_) => None,
            ColumnSelector::Label(label) => columns.iter().position(|c| {
                c.eq_ignore_ascii_case(label)
                    || c.rsplit('.')
                        .next()
                        .map(|tail| tail.eq_ignore_ascii_case(label))
                        .unwrap_or(false)
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSpec {
    pub column: ColumnSelector,
    pub direction: OrderDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationSpec {
    pub function: AggregateFunction,
    pub column: ColumnSelector,
    /// AVG only: derived COUNT and SUM columns.
    pub derived_count: Option<ColumnSelector>,
    pub derived_sum: Option<ColumnSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationContext {
    pub offset: u64,
    pub row_count: Option<u64>,
}

/// Everything the merge engine needs to recombine per-unit results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeContext {
    pub strategy: MergeStrategy,
    pub order_by: Vec<OrderSpec>,
    pub group_by: Vec<OrderSpec>,
    pub aggregations: Vec<AggregationSpec>,
    pub pagination: Option<PaginationContext>,
    /// `SELECT DISTINCT`: rows collapse on every visible column.
    pub distinct: bool,
    /// Trailing columns added by the rewriter that the client never sees.
    pub derived_column_count: usize,
}

impl MergeContext {
    pub fn pass_through() -> Self {
        Self {
            strategy: MergeStrategy::PassThrough,
            order_by: Vec::new(),
            group_by: Vec::new(),
            aggregations: Vec::new(),
            pagination: None,
            distinct: false,
            derived_column_count: 0,
        }
    }

    pub fn concat() -> Self {
        Self {
            strategy: MergeStrategy::Concat,
            ..Self::pass_through()
        }
    }
}

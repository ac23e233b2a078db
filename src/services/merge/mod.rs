// Result Merge Engine

mod aggregation;
mod group;
mod order;
mod result;

use tracing::debug;

use crate::error::{Result, ShardingError};
use crate::models::{ColumnSelector, MergeContext, MergeStrategy, OrderDirection, OrderSpec};

pub use result::{MemoryQueryResult, QueryResult, Row};

use group::{GroupPlan, ResolvedAggregation};
use order::OrderByStreamResult;
use result::{ConcatResult, PaginationResult, VisibleColumnsResult};

/// Recombines per-unit results according to a merge context.
pub struct MergeEngine<'a> {
    context: &'a MergeContext,
}

impl<'a> MergeEngine<'a> {
    pub fn new(context: &'a MergeContext) -> Self {
        Self { context }
    }

    /// Merges results given in route-unit order. ORDER BY merging streams;
    /// GROUP BY and DISTINCT consume every input first.
    pub fn merge(&self, mut results: Vec<Box<dyn QueryResult>>) -> Result<Box<dyn QueryResult>> {
        let context = self.context;
        if results.is_empty() {
            return Ok(Box::new(MemoryQueryResult::default()));
        }
        let columns = results[0].columns().to_vec();
        if let Some(other) = results.iter().find(|r| r.columns().len() != columns.len()) {
            return Err(ShardingError::MergeColumnNotFound(format!(
                "route units returned {} and {} columns",
                columns.len(),
                other.columns().len()
            )));
        }
        debug!(
            "Merging {} result(s) with {:?} strategy",
            results.len(),
            context.strategy
        );

        let merged: Box<dyn QueryResult> = match context.strategy {
            MergeStrategy::PassThrough if results.len() == 1 => results.remove(0),
            MergeStrategy::PassThrough | MergeStrategy::Concat | MergeStrategy::Pagination => {
                Box::new(ConcatResult::new(columns, results))
            }
            MergeStrategy::OrderBy => {
                let keys = resolve_keys(&context.order_by, &columns)?;
                Box::new(OrderByStreamResult::new(columns, results, keys))
            }
            MergeStrategy::GroupBy => {
                let plan = self.group_plan(&columns)?;
                Box::new(group::merge_groups(columns, results, &plan)?)
            }
        };

        let merged: Box<dyn QueryResult> = match context.pagination {
            Some(page) if context.strategy != MergeStrategy::PassThrough => {
                Box::new(PaginationResult::new(merged, page.offset, page.row_count))
            }
            _ => merged,
        };
        if context.derived_column_count == 0 {
            return Ok(merged);
        }
        Ok(Box::new(VisibleColumnsResult::new(
            merged,
            context.derived_column_count,
        )?))
    }

    fn group_plan(&self, columns: &[String]) -> Result<GroupPlan> {
        let context = self.context;
        let group_keys: Vec<usize> = resolve_keys(&context.group_by, columns)?
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        let mut aggregations = Vec::with_capacity(context.aggregations.len());
        for aggregation in &context.aggregations {
            let derived = match (&aggregation.derived_count, &aggregation.derived_sum) {
                (Some(count), Some(sum)) => Some((resolve(count, columns)?, resolve(sum, columns)?)),
                _ => None,
            };
            aggregations.push(ResolvedAggregation {
                function: aggregation.function,
                index: resolve(&aggregation.column, columns)?,
                derived,
            });
        }
        // grouped rows come back ordered by ORDER BY, else by the grouping itself
        let sort_keys = if context.order_by.is_empty() {
            resolve_keys(&context.group_by, columns)?
        } else {
            resolve_keys(&context.order_by, columns)?
        };
        let distinct_width = context
            .distinct
            .then(|| columns.len().saturating_sub(context.derived_column_count));
        Ok(GroupPlan {
            group_keys,
            aggregations,
            sort_keys,
            distinct_width,
        })
    }
}

fn resolve(selector: &ColumnSelector, columns: &[String]) -> Result<usize> {
    selector.resolve(columns).ok_or_else(|| {
        ShardingError::MergeColumnNotFound(match selector {
            ColumnSelector::Index(index) => format!("column #{}", index + 1),
            ColumnSelector::Label(label) => label.clone(),
        })
    })
}

fn resolve_keys(specs: &[OrderSpec], columns: &[String]) -> Result<Vec<(usize, OrderDirection)>> {
    specs
        .iter()
        .map(|spec| Ok((resolve(&spec.column, columns)?, spec.direction)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregateFunction, AggregationSpec, PaginationContext, Value};
    use rust_decimal::Decimal;

    fn unit(columns: &[&str], rows: Vec<Row>) -> Box<dyn QueryResult> {
        Box::new(MemoryQueryResult::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        ))
    }

    fn int_rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| vec![Value::Integer(*v)]).collect()
    }

    #[test]
    fn test_order_by_merge_interleaves_units() {
        let context = MergeContext {
            strategy: MergeStrategy::OrderBy,
            order_by: vec![OrderSpec {
                column: ColumnSelector::Index(0),
                direction: OrderDirection::Asc,
            }],
            ..MergeContext::concat()
        };
        let row = |id: i64, name: &str| vec![Value::Integer(id), Value::String(name.to_string())];
        let mut merged = MergeEngine::new(&context)
            .merge(vec![
                unit(&["id", "name"], vec![row(1, "a"), row(3, "c")]),
                unit(&["id", "name"], vec![row(2, "b"), row(4, "d")]),
            ])
            .unwrap();
        assert_eq!(
            merged.collect_rows().unwrap(),
            vec![row(1, "a"), row(2, "b"), row(3, "c"), row(4, "d")]
        );
    }

    #[test]
    fn test_avg_merge_hides_derived_columns() {
        let context = MergeContext {
            strategy: MergeStrategy::GroupBy,
            aggregations: vec![AggregationSpec {
                function: AggregateFunction::Avg,
                column: ColumnSelector::Index(0),
                derived_count: Some(ColumnSelector::Label("AVG_DERIVED_COUNT_0".to_string())),
                derived_sum: Some(ColumnSelector::Label("AVG_DERIVED_SUM_0".to_string())),
            }],
            derived_column_count: 2,
            ..MergeContext::concat()
        };
        let columns = ["AVG(amount)", "AVG_DERIVED_COUNT_0", "AVG_DERIVED_SUM_0"];
        let mut merged = MergeEngine::new(&context)
            .merge(vec![
                unit(&columns, vec![vec![Value::Integer(5), Value::Integer(2), Value::Integer(10)]]),
                unit(&columns, vec![vec![Value::Integer(5), Value::Integer(1), Value::Integer(5)]]),
            ])
            .unwrap();
        assert_eq!(merged.columns(), &["AVG(amount)".to_string()]);
        assert_eq!(
            merged.collect_rows().unwrap(),
            vec![vec![Value::Decimal(Decimal::from(5))]]
        );
    }

    #[test]
    fn test_pagination_after_concat() {
        let context = MergeContext {
            strategy: MergeStrategy::Pagination,
            pagination: Some(PaginationContext {
                offset: 7,
                row_count: Some(5),
            }),
            ..MergeContext::concat()
        };
        let merge = |offset| {
            let context = MergeContext {
                pagination: Some(PaginationContext {
                    offset,
                    row_count: Some(5),
                }),
                ..context.clone()
            };
            MergeEngine::new(&context)
                .merge(vec![
                    unit(&["n"], int_rows(&[0, 1, 2, 3, 4])),
                    unit(&["n"], int_rows(&[5, 6, 7, 8, 9])),
                ])
                .and_then(|mut r| r.collect_rows())
                .unwrap()
        };
        assert_eq!(merge(7), int_rows(&[7, 8, 9]));
        assert!(merge(20).is_empty());
    }

    #[test]
    fn test_pass_through_keeps_single_result() {
        let context = MergeContext {
            pagination: Some(PaginationContext {
                offset: 1,
                row_count: Some(1),
            }),
            ..MergeContext::pass_through()
        };
        let mut merged = MergeEngine::new(&context)
            .merge(vec![unit(&["n"], int_rows(&[1, 2, 3]))])
            .unwrap();
        assert_eq!(merged.collect_rows().unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_column_and_width_mismatch() {
        let context = MergeContext {
            strategy: MergeStrategy::OrderBy,
            order_by: vec![OrderSpec {
                column: ColumnSelector::Label("missing".to_string()),
                direction: OrderDirection::Asc,
            }],
            ..MergeContext::concat()
        };
        let err = MergeEngine::new(&context)
            .merge(vec![unit(&["n"], Vec::new()), unit(&["n"], Vec::new())])
            .err()
            .unwrap();
        assert!(matches!(err, ShardingError::MergeColumnNotFound(_)));

        let err = MergeEngine::new(&MergeContext::concat())
            .merge(vec![unit(&["n"], Vec::new()), unit(&["n", "m"], Vec::new())])
            .err()
            .unwrap();
        assert!(matches!(err, ShardingError::MergeColumnNotFound(_)));
    }
}

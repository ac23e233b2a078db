use std::cmp::Ordering;

use indexmap::{IndexMap, IndexSet};

use crate::error::{Result, ShardingError};
use crate::models::{AggregateFunction, OrderDirection, Value, ValueFamily, ValueKey};
use crate::services::merge::aggregation::Accumulator;
use crate::services::merge::order::compare_rows;
use crate::services::merge::result::{MemoryQueryResult, QueryResult, Row};

#[derive(Debug, Clone)]
pub(super) struct ResolvedAggregation {
    pub function: AggregateFunction,
    pub index: usize,
    /// AVG: (derived count, derived sum) column indexes.
    pub derived: Option<(usize, usize)>,
}

/// Column positions a memory group merge works on.
#[derive(Debug, Clone, Default)]
pub(super) struct GroupPlan {
    pub group_keys: Vec<usize>,
    pub aggregations: Vec<ResolvedAggregation>,
    pub sort_keys: Vec<(usize, OrderDirection)>,
    /// `SELECT DISTINCT`: number of leading columns rows collapse on.
    pub distinct_width: Option<usize>,
}

/// Consumes every stream, merges rows sharing a group key and sorts the groups.
pub(super) fn merge_groups(
    columns: Vec<String>,
    streams: Vec<Box<dyn QueryResult>>,
    plan: &GroupPlan,
) -> Result<MemoryQueryResult> {
    let mut groups: IndexMap<Vec<ValueKey>, (Row, Vec<Accumulator>)> = IndexMap::new();
    let mut families: Vec<Option<ValueFamily>> = vec![None; plan.group_keys.len()];
    let label = |index: usize| columns.get(index).map(String::as_str).unwrap_or_default();

    for mut stream in streams {
        while let Some(row) = stream.next_row()? {
            let key = if !plan.group_keys.is_empty() {
                let mut key = Vec::with_capacity(plan.group_keys.len());
                for (position, index) in plan.group_keys.iter().enumerate() {
                    let value = cell(&row, *index);
                    check_family(&mut families[position], value, label(*index))?;
                    key.push(value.key());
                }
                key
            } else if !plan.aggregations.is_empty() {
                Vec::new()
            } else {
                let width = plan.distinct_width.unwrap_or(row.len()).min(row.len());
                row[..width].iter().map(Value::key).collect()
            };

            let (_, accumulators) = groups.entry(key).or_insert_with(|| {
                let accumulators = plan
                    .aggregations
                    .iter()
                    .map(|a| Accumulator::new(a.function))
                    .collect();
                (row.clone(), accumulators)
            });
            for (aggregation, accumulator) in plan.aggregations.iter().zip(accumulators.iter_mut()) {
                let derived = aggregation
                    .derived
                    .map(|(count, sum)| (cell(&row, count), cell(&row, sum)));
                accumulator.merge(cell(&row, aggregation.index), derived, label(aggregation.index))?;
            }
        }
    }

    let mut rows: Vec<Row> = Vec::with_capacity(groups.len());
    for (_, (mut row, accumulators)) in groups {
        for (aggregation, accumulator) in plan.aggregations.iter().zip(&accumulators) {
            set(&mut row, aggregation.index, accumulator.result());
            if let (Some((count, sum)), Some((count_value, sum_value))) =
                (aggregation.derived, accumulator.derived())
            {
                set(&mut row, count, count_value);
                set(&mut row, sum, sum_value);
            }
        }
        rows.push(row);
    }

    if let Some(width) = plan.distinct_width {
        if !plan.group_keys.is_empty() || !plan.aggregations.is_empty() {
            let mut seen = IndexSet::new();
            rows.retain(|row| {
                let width = width.min(row.len());
                seen.insert(row[..width].iter().map(Value::key).collect::<Vec<_>>())
            });
        }
    }

    if !plan.sort_keys.is_empty() {
        let mut failure: Option<ShardingError> = None;
        rows.sort_by(|a, b| match compare_rows(a, b, &plan.sort_keys, &columns) {
            Ok(ordering) => ordering,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
    }
    Ok(MemoryQueryResult::new(columns, rows))
}

fn cell(row: &Row, index: usize) -> &Value {
    const NULL: &Value = &Value::Null;
    row.get(index).unwrap_or(NULL)
}

fn set(row: &mut Row, index: usize, value: Value) {
    if let Some(slot) = row.get_mut(index) {
        *slot = value;
    }
}

/// Group key columns must carry one value family across all shards.
fn check_family(seen: &mut Option<ValueFamily>, value: &Value, column: &str) -> Result<()> {
    let family = value.family();
    if family == ValueFamily::Null {
        return Ok(());
    }
    match seen {
        Some(existing) if *existing != family => Err(ShardingError::MergeTypeMismatch {
            column: column.to_string(),
            left: *existing,
            right: family,
        }),
        Some(_) => Ok(()),
        None => {
            *seen = Some(family);
            Ok(())
        }
    }
}

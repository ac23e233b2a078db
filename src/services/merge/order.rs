use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::error::{Result, ShardingError};
use crate::models::{OrderDirection, Value};
use crate::services::merge::result::{QueryResult, Row};

/// Compares two cells; NULL sorts lowest.
pub(super) fn compare_cells(left: &Value, right: &Value, column: &str) -> Result<Ordering> {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ok(Ordering::Equal),
        (true, false) => Ok(Ordering::Less),
        (false, true) => Ok(Ordering::Greater),
        (false, false) => left.compare(right).ok_or_else(|| ShardingError::MergeTypeMismatch {
            column: column.to_string(),
            left: left.family(),
            right: right.family(),
        }),
    }
}

/// Compares rows on `(column index, direction)` keys.
pub(super) fn compare_rows(
    left: &Row,
    right: &Row,
    keys: &[(usize, OrderDirection)],
    columns: &[String],
) -> Result<Ordering> {
    for (index, direction) in keys {
        let (Some(a), Some(b)) = (left.get(*index), right.get(*index)) else {
            continue;
        };
        let label = columns.get(*index).map(String::as_str).unwrap_or_default();
        let ordering = compare_cells(a, b, label)?;
        let ordering = match direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

struct MergeEntry {
    key: Vec<Value>,
    row: Row,
    stream: usize,
    directions: Arc<Vec<OrderDirection>>,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, b), direction) in self.key.iter().zip(&other.key).zip(self.directions.iter()) {
            // comparability is checked when the entry is pushed
            let ordering = compare_cells(a, b, "").unwrap_or(Ordering::Equal);
            let ordering = match direction {
                OrderDirection::Asc => ordering,
                OrderDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.stream.cmp(&other.stream)
    }
}

/// k-way merge of per-unit streams that are each sorted on the same keys.
/// Holds one buffered row per stream.
pub(super) struct OrderByStreamResult {
    columns: Vec<String>,
    streams: Vec<Box<dyn QueryResult>>,
    indexes: Vec<usize>,
    directions: Arc<Vec<OrderDirection>>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
    /// First non-null key seen per sort column, to detect incomparable shards.
    samples: Vec<Option<Value>>,
    primed: bool,
}

impl OrderByStreamResult {
    pub fn new(
        columns: Vec<String>,
        streams: Vec<Box<dyn QueryResult>>,
        keys: Vec<(usize, OrderDirection)>,
    ) -> Self {
        let (indexes, directions): (Vec<usize>, Vec<OrderDirection>) = keys.into_iter().unzip();
        let samples = vec![None; indexes.len()];
        Self {
            columns,
            heap: BinaryHeap::with_capacity(streams.len()),
            streams,
            indexes,
            directions: Arc::new(directions),
            samples,
            primed: false,
        }
    }

    fn pull(&mut self, stream: usize) -> Result<()> {
        let Some(row) = self.streams[stream].next_row()? else {
            return Ok(());
        };
        let mut key = Vec::with_capacity(self.indexes.len());
        for (position, index) in self.indexes.iter().enumerate() {
            let value = row.get(*index).cloned().unwrap_or(Value::Null);
            let label = self.columns.get(*index).map(String::as_str).unwrap_or_default();
            match &self.samples[position] {
                Some(sample) => {
                    compare_cells(sample, &value, label)?;
                }
                None if !value.is_null() => self.samples[position] = Some(value.clone()),
                None => {}
            }
            key.push(value);
        }
        self.heap.push(Reverse(MergeEntry {
            key,
            row,
            stream,
            directions: Arc::clone(&self.directions),
        }));
        Ok(())
    }
}

impl QueryResult for OrderByStreamResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.primed {
            self.primed = true;
            for stream in 0..self.streams.len() {
                self.pull(stream)?;
            }
        }
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(entry.stream)?;
        Ok(Some(entry.row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::merge::result::MemoryQueryResult;

    fn stream(rows: Vec<(Value, &str)>) -> Box<dyn QueryResult> {
        Box::new(MemoryQueryResult::new(
            vec!["id".to_string(), "name".to_string()],
            rows.into_iter()
                .map(|(id, name)| vec![id, Value::String(name.to_string())])
                .collect(),
        ))
    }

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "name".to_string()]
    }

    #[test]
    fn test_merges_sorted_streams() {
        let mut merged = OrderByStreamResult::new(
            columns(),
            vec![
                stream(vec![(Value::Integer(1), "a"), (Value::Integer(3), "c")]),
                stream(vec![(Value::Integer(2), "b"), (Value::Integer(4), "d")]),
            ],
            vec![(0, OrderDirection::Asc)],
        );
        let names: Vec<Value> = merged
            .collect_rows()
            .unwrap()
            .into_iter()
            .map(|row| row[1].clone())
            .collect();
        assert_eq!(
            names,
            ["a", "b", "c", "d"].iter().map(|s| Value::String(s.to_string())).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_descending_with_nulls_last_and_stable_ties() {
        let mut merged = OrderByStreamResult::new(
            columns(),
            vec![
                stream(vec![(Value::Integer(5), "x"), (Value::Null, "n")]),
                stream(vec![(Value::Decimal(5.into()), "y"), (Value::Float(1.5), "z")]),
            ],
            vec![(0, OrderDirection::Desc)],
        );
        let names: Vec<String> = merged
            .collect_rows()
            .unwrap()
            .into_iter()
            .map(|row| row[1].canonical_string())
            .collect();
        assert_eq!(names, vec!["x", "y", "z", "n"]);
    }

    #[test]
    fn test_incomparable_shards_fail() {
        let mut merged = OrderByStreamResult::new(
            columns(),
            vec![
                stream(vec![(Value::Integer(1), "a")]),
                stream(vec![(Value::String("one".to_string()), "b")]),
            ],
            vec![(0, OrderDirection::Asc)],
        );
        let err = merged.collect_rows().unwrap_err();
        assert!(matches!(err, ShardingError::MergeTypeMismatch { .. }));
    }
}

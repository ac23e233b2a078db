use std::collections::VecDeque;

use crate::error::{Result, ShardingError};
use crate::models::Value;

pub type Row = Vec<Value>;

/// A forward-only stream of result rows, one per route unit or merge stage.
pub trait QueryResult: Send {
    fn columns(&self) -> &[String];

    /// Next row, or `None` once the stream is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Drains the remaining rows.
    fn collect_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Fully materialized result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryQueryResult {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

impl MemoryQueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl QueryResult for MemoryQueryResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}

/// Streams one result after another, in route-unit order.
pub(super) struct ConcatResult {
    columns: Vec<String>,
    streams: VecDeque<Box<dyn QueryResult>>,
}

impl ConcatResult {
    pub fn new(columns: Vec<String>, streams: Vec<Box<dyn QueryResult>>) -> Self {
        Self {
            columns,
            streams: streams.into(),
        }
    }
}

impl QueryResult for ConcatResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        while let Some(stream) = self.streams.front_mut() {
            if let Some(row) = stream.next_row()? {
                return Ok(Some(row));
            }
            self.streams.pop_front();
        }
        Ok(None)
    }
}

/// Skips `offset` rows, then yields at most `row_count`.
pub(super) struct PaginationResult {
    inner: Box<dyn QueryResult>,
    skip: u64,
    remaining: Option<u64>,
}

impl PaginationResult {
    pub fn new(inner: Box<dyn QueryResult>, offset: u64, row_count: Option<u64>) -> Self {
        Self {
            inner,
            skip: offset,
            remaining: row_count,
        }
    }
}

impl QueryResult for PaginationResult {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        while self.skip > 0 {
            if self.inner.next_row()?.is_none() {
                self.skip = 0;
                self.remaining = Some(0);
                return Ok(None);
            }
            self.skip -= 1;
        }
        match self.remaining {
            Some(0) => Ok(None),
            Some(n) => {
                let row = self.inner.next_row()?;
                if row.is_some() {
                    self.remaining = Some(n - 1);
                }
                Ok(row)
            }
            None => self.inner.next_row(),
        }
    }
}

/// Hides the trailing columns that exist only for merging.
pub(super) struct VisibleColumnsResult {
    inner: Box<dyn QueryResult>,
    columns: Vec<String>,
}

impl VisibleColumnsResult {
    pub fn new(inner: Box<dyn QueryResult>, hidden: usize) -> Result<Self> {
        let all = inner.columns();
        if hidden > all.len() {
            return Err(ShardingError::MergeColumnNotFound(format!(
                "{} derived column(s) expected, result has {} column(s)",
                hidden,
                all.len()
            )));
        }
        let columns = all[..all.len() - hidden].to_vec();
        Ok(Self { inner, columns })
    }
}

impl QueryResult for VisibleColumnsResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        let visible = self.columns.len();
        Ok(self.inner.next_row()?.map(|mut row| {
            row.truncate(visible);
            row
        }))
    }
}

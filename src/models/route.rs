use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt;

/// Atomic physical location: one table on one data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
        }
    }

    /// Parses `ds_0.t_order_0`.
    pub fn parse(text: &str) -> Option<Self> {
        let (data_source, table) = text.trim().split_once('.')?;
        if data_source.is_empty() || table.is_empty() {
            return None;
        }
        Some(Self::new(data_source, table))
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RouteMapper {
    pub logic_name: String,
    pub actual_name: String,
}

impl RouteMapper {
    pub fn new(logic_name: impl Into<String>, actual_name: impl Into<String>) -> Self {
        Self {
            logic_name: logic_name.into(),
            actual_name: actual_name.into(),
        }
    }
}

/// One physical destination plus the table renames active on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RouteUnit {
    pub data_source: String,
    pub table_mappers: Vec<RouteMapper>,
}

impl RouteUnit {
    pub fn new(data_source: impl Into<String>, table_mappers: Vec<RouteMapper>) -> Self {
        Self {
            data_source: data_source.into(),
            table_mappers,
        }
    }

    pub fn find_actual_table(&self, logic_name: &str) -> Option<&str> {
        self.table_mappers
            .iter()
            .find(|m| m.logic_name.eq_ignore_ascii_case(logic_name))
            .map(|m| m.actual_name.as_str())
    }
}

/// Which routing path produced a route context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    DatabaseBroadcast,
    InstanceBroadcast,
    TableBroadcast,
    DataSourceGroupBroadcast,
    Unicast,
    Ignore,
    Standard,
    Complex,
    Cursor,
}

/// Ordered, duplicate-free set of route units for one statement execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteContext {
    pub route_type: RouteType,
    units: IndexSet<RouteUnit>,
    /// For INSERT: original row indexes owned by each unit, aligned with `units`.
    row_assignments: Option<Vec<Vec<usize>>>,
}

impl RouteContext {
    pub fn new(route_type: RouteType) -> Self {
        Self {
            route_type,
            units: IndexSet::new(),
            row_assignments: None,
        }
    }

    /// Adds a unit, returning its position. Duplicates keep the first position.
    pub fn add_unit(&mut self, unit: RouteUnit) -> usize {
        let (index, _) = self.units.insert_full(unit);
        if let Some(rows) = self.row_assignments.as_mut() {
            if rows.len() <= index {
                rows.resize(index + 1, Vec::new());
            }
        }
        index
    }

    /// Records that original INSERT row `row` is sent to `unit`.
    pub fn assign_row(&mut self, unit: RouteUnit, row: usize) {
        if self.row_assignments.is_none() {
            self.row_assignments = Some(vec![Vec::new(); self.units.len()]);
        }
        let index = self.add_unit(unit);
        if let Some(rows) = self.row_assignments.as_mut() {
            rows[index].push(row);
        }
    }

    pub fn units(&self) -> impl ExactSizeIterator<Item = &RouteUnit> {
        self.units.iter()
    }

    pub fn unit(&self, index: usize) -> Option<&RouteUnit> {
        self.units.get_index(index)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_single_unit(&self) -> bool {
        self.units.len() == 1
    }

    /// Rows owned by the unit at `index`; `None` when rows are not split.
    pub fn rows_for(&self, index: usize) -> Option<&[usize]> {
        self.row_assignments
            .as_ref()
            .and_then(|rows| rows.get(index))
            .map(|rows| rows.as_slice())
    }

    pub fn has_row_assignments(&self) -> bool {
        self.row_assignments.is_some()
    }

    /// Distinct data sources in unit order.
    pub fn data_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for unit in &self.units {
            if !names.contains(&unit.data_source) {
                names.push(unit.data_source.clone());
            }
        }
        names
    }
}

/// Per-connection state that outlives one statement: routes of open cursors.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    cursors: IndexMap<String, RouteContext>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_cursor(&mut self, name: &str, route: RouteContext) {
        self.cursors.insert(name.to_ascii_lowercase(), route);
    }

    pub fn cursor(&self, name: &str) -> Option<&RouteContext> {
        self.cursors.get(&name.to_ascii_lowercase())
    }

    pub fn close_cursor(&mut self, name: &str) -> Option<RouteContext> {
        self.cursors.shift_remove(&name.to_ascii_lowercase())
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }
}

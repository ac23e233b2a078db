use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::Value;

/// SQL dialect of the incoming statement and the physical databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    MySql,
    PostgreSql,
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseType::MySql),
            "postgresql" | "postgres" => Ok(DatabaseType::PostgreSql),
            other => Err(format!("Unsupported database type: {}", other)),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::MySql => f.write_str("mysql"),
            DatabaseType::PostgreSql => f.write_str("postgresql"),
        }
    }
}

/// Byte range `[start, stop)` of a fragment inside the original SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SqlSpan {
    pub start: usize,
    pub stop: usize,
}

impl SqlSpan {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    /// Zero-width span marking an insertion point.
    pub fn point(at: usize) -> Self {
        Self { start: at, stop: at }
    }

    pub fn len(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, other: &SqlSpan) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }

    pub fn overlaps(&self, other: &SqlSpan) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// Checks that the span lies inside `sql` on character boundaries.
    pub fn validate(&self, sql: &str) -> Result<(), String> {
        if self.start > self.stop {
            return Err(format!("span {}..{} is reversed", self.start, self.stop));
        }
        if self.stop > sql.len() {
            return Err(format!(
                "span {}..{} exceeds statement length {}",
                self.start,
                self.stop,
                sql.len()
            ));
        }
        if !sql.is_char_boundary(self.start) || !sql.is_char_boundary(self.stop) {
            return Err(format!(
                "span {}..{} is not on a character boundary",
                self.start, self.stop
            ));
        }
        Ok(())
    }

    pub fn slice<'a>(&self, sql: &'a str) -> &'a str {
        sql.get(self.start..self.stop).unwrap_or("")
    }
}

/// Closed set of statement shapes the router dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Dql,
    Dml(DmlKind),
    Ddl(DdlKind),
    Dal(DalKind),
    Dcl(DclKind),
    Tcl,
    Cursor(CursorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DdlKind {
    CreateTable,
    AlterTable,
    DropTable,
    TruncateTable,
    CreateIndex,
    DropIndex,
    CreateView,
    DropView,
    Function,
    Procedure,
    Tablespace,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DalKind {
    Use,
    Set,
    Reset,
    ShowDatabases,
    Show,
    Describe,
    Optimize,
    Analyze,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DclKind {
    Grant,
    Revoke,
    CreateUser,
    AlterUser,
    DropUser,
    RenameUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    Declare,
    Fetch,
    Move,
    Close,
}

/// Statement category label used in logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementCategory {
    Dql,
    Dml,
    Ddl,
    Dal,
    Dcl,
    Tcl,
    Cursor,
}

impl fmt::Display for StatementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementCategory::Dql => "DQL",
            StatementCategory::Dml => "DML",
            StatementCategory::Ddl => "DDL",
            StatementCategory::Dal => "DAL",
            StatementCategory::Dcl => "DCL",
            StatementCategory::Tcl => "TCL",
            StatementCategory::Cursor => "CURSOR",
        };
        f.write_str(name)
    }
}

impl StatementKind {
    pub fn category(&self) -> StatementCategory {
        match self {
            StatementKind::Dql => StatementCategory::Dql,
            StatementKind::Dml(_) => StatementCategory::Dml,
            StatementKind::Ddl(_) => StatementCategory::Ddl,
            StatementKind::Dal(_) => StatementCategory::Dal,
            StatementKind::Dcl(_) => StatementCategory::Dcl,
            StatementKind::Tcl => StatementCategory::Tcl,
            StatementKind::Cursor(_) => StatementCategory::Cursor,
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(
            self,
            StatementKind::Dql | StatementKind::Cursor(CursorKind::Declare)
        )
    }
}

/// Why a table name appears at a given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableRole {
    /// FROM/JOIN/INTO/UPDATE/DDL target.
    Source,
    /// Qualifier of a column reference, e.g. `t_order.user_id`.
    ColumnOwner,
}

/// One occurrence of a logical table name in the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSegment {
    pub name: String,
    pub schema: Option<String>,
    pub alias: Option<String>,
    pub span: SqlSpan,
    pub quote: Option<char>,
    pub role: TableRole,
}

impl TableSegment {
    pub fn logic_name(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub owner: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(owner: Option<&str>, name: &str) -> Self {
        Self {
            owner: owner.map(|o| o.to_string()),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}.{}", owner, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Parameter(usize),
    Column(ColumnRef),
    /// Anything the router cannot evaluate (functions, arithmetic, subqueries).
    Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Operator seen from the other side: `5 < a` is `a > 5`.
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => other,
        }
    }
}

/// Predicate tree over the WHERE clause and inner-join ON conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    In {
        column: Operand,
        list: Vec<Operand>,
        negated: bool,
    },
    Between {
        column: Operand,
        low: Operand,
        high: Operand,
        negated: bool,
    },
    /// Predicates the router never narrows on: LIKE, IS NULL, EXISTS, NOT, subqueries.
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterMarker {
    pub span: SqlSpan,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    #[default]
    Question,
    Dollar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunction::Count),
            "SUM" => Some(AggregateFunction::Sum),
            "AVG" => Some(AggregateFunction::Avg),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateProjection {
    pub function: AggregateFunction,
    pub distinct: bool,
    /// Argument text exactly as written, e.g. `o.amount` or `*`.
    pub argument: String,
    pub argument_column: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionKind {
    Column(ColumnRef),
    Star { owner: Option<String> },
    Aggregate(AggregateProjection),
    Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub kind: ProjectionKind,
    pub alias: Option<String>,
    /// Expression text without the alias.
    pub text: String,
    pub span: SqlSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderExpression {
    /// `ORDER BY 2`, one-based.
    Position(usize),
    Column(ColumnRef),
    Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expression: OrderExpression,
    pub direction: OrderDirection,
    /// Expression text without the direction keyword.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationOperand {
    Literal(u64),
    Parameter(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationValue {
    pub span: SqlSpan,
    pub operand: PaginationOperand,
}

impl PaginationValue {
    /// Resolves the literal or bound parameter to a count.
    pub fn resolve(&self, parameters: &[Value]) -> Option<u64> {
        match self.operand {
            PaginationOperand::Literal(v) => Some(v),
            PaginationOperand::Parameter(index) => parameters
                .get(index)
                .and_then(|v| v.as_i64())
                .map(|v| v.max(0) as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationSegment {
    pub offset: Option<PaginationValue>,
    pub row_count: Option<PaginationValue>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub projections: Vec<Projection>,
    /// Byte offset right after the last projection item.
    pub projection_end: usize,
    pub distinct: bool,
    pub group_by: Vec<OrderByItem>,
    pub order_by: Vec<OrderByItem>,
    pub having: bool,
    pub pagination: Option<PaginationSegment>,
    pub has_subquery: bool,
    pub has_union: bool,
}

impl SelectStatement {
    pub fn has_star(&self) -> bool {
        self.projections
            .iter()
            .any(|p| matches!(p.kind, ProjectionKind::Star { .. }))
    }

    pub fn aggregates(&self) -> impl Iterator<Item = (usize, &AggregateProjection)> {
        self.projections
            .iter()
            .enumerate()
            .filter_map(|(i, p)| match &p.kind {
                ProjectionKind::Aggregate(agg) => Some((i, agg)),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    /// Row span; for VALUES rows this includes the parentheses.
    pub span: SqlSpan,
    pub values: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertForm {
    /// `VALUES (..), (..)`, span covers all rows.
    Values { span: SqlSpan },
    /// MySQL `INSERT ... SET a = 1, b = 2`, `end` is right after the last assignment.
    Set { end: usize },
    Select,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    /// Offset of the closing parenthesis of an explicit column list.
    pub column_list_end: Option<usize>,
    pub form: InsertForm,
    pub rows: Vec<InsertRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: ColumnRef,
    pub value: Operand,
}

/// Bound statement: the parsed shape plus every position the rewriter needs.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub sql: String,
    pub database_type: DatabaseType,
    pub kind: StatementKind,
    pub tables: Vec<TableSegment>,
    pub parameter_markers: Vec<ParameterMarker>,
    pub placeholder_style: PlaceholderStyle,
    pub predicate: Option<Predicate>,
    pub select: Option<SelectStatement>,
    pub insert: Option<InsertStatement>,
    pub assignments: Vec<Assignment>,
    pub cursor_name: Option<String>,
    /// DCL target is `*` or `db.*`.
    pub wildcard_target: bool,
}

impl BoundStatement {
    pub fn new(sql: &str, database_type: DatabaseType, kind: StatementKind) -> Self {
        Self {
            sql: sql.to_string(),
            database_type,
            kind,
            tables: Vec::new(),
            parameter_markers: Vec::new(),
            placeholder_style: PlaceholderStyle::default(),
            predicate: None,
            select: None,
            insert: None,
            assignments: Vec::new(),
            cursor_name: None,
            wildcard_target: false,
        }
    }

    pub fn category(&self) -> StatementCategory {
        self.kind.category()
    }

    /// Distinct logical table names in first-seen order, lower-cased.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for table in self.tables.iter().filter(|t| t.role == TableRole::Source) {
            let name = table.logic_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Resolves a column owner (alias or table name) to a logical table name.
    pub fn resolve_owner(&self, owner: &str) -> Option<String> {
        let sources = self.tables.iter().filter(|t| t.role == TableRole::Source);
        for table in sources.clone() {
            if let Some(alias) = &table.alias {
                if alias.eq_ignore_ascii_case(owner) {
                    return Some(table.logic_name());
                }
            }
        }
        sources
            .filter(|t| t.name.eq_ignore_ascii_case(owner))
            .map(|t| t.logic_name())
            .next()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_markers.len()
    }
}

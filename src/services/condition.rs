// Sharding Condition Extraction
//
// Turns the bound predicate tree (or INSERT rows) into per-table sharding
// conditions. Predicates are expanded into OR branches of AND-ed leaves; each
// branch becomes one `ShardingCondition`.

use indexmap::IndexMap;

use crate::error::{Result, ShardingError};
use crate::models::{
    BoundStatement, ColumnRef, CompareOp, ConditionOperator, DmlKind, GeneratedKeyContext,
    InsertForm, InsertStatement, Operand, Predicate, SchemaMetadata, ShardingCondition,
    ShardingConditionValue, ShardingConditions, StatementKind, Value, ValueRange,
};
use crate::services::rule::ShardingRule;

/// Upper bound on OR branches after expansion; larger predicates are not narrowed.
pub const MAX_CONDITION_BRANCHES: usize = 64;

pub struct ShardingConditionEngine<'a> {
    rule: &'a ShardingRule,
    schema: &'a SchemaMetadata,
}

impl<'a> ShardingConditionEngine<'a> {
    pub fn new(rule: &'a ShardingRule, schema: &'a SchemaMetadata) -> Self {
        Self { rule, schema }
    }

    pub fn create_conditions(
        &self,
        statement: &BoundStatement,
        parameters: &[Value],
        generated_keys: Option<&GeneratedKeyContext>,
    ) -> Result<ShardingConditions> {
        match (&statement.insert, statement.kind) {
            (Some(insert), StatementKind::Dml(DmlKind::Insert)) => {
                self.insert_conditions(insert, parameters, generated_keys)
            }
            _ => Ok(self.where_conditions(statement, parameters)),
        }
    }

    fn where_conditions(&self, statement: &BoundStatement, parameters: &[Value]) -> ShardingConditions {
        let Some(predicate) = &statement.predicate else {
            return ShardingConditions::default();
        };
        let branches = match to_dnf(predicate) {
            Some(branches) if !branches.is_empty() => branches,
            Some(_) => return ShardingConditions::default(),
            None => {
                tracing::warn!(
                    "Predicate expands past {} OR branches, sharding conditions are not extracted",
                    MAX_CONDITION_BRANCHES
                );
                return ShardingConditions::default();
            }
        };

        let mut conditions = Vec::new();
        let mut narrowing = false;
        for branch in &branches {
            if let Some(condition) = self.branch_condition(statement, branch, parameters) {
                narrowing |= condition
                    .values
                    .iter()
                    .any(|v| v.operator != ConditionOperator::Unknown);
                conditions.push(condition);
            }
        }
        if conditions.is_empty() {
            tracing::debug!("Every predicate branch is contradictory on sharding columns");
            return ShardingConditions::always_false();
        }
        if !narrowing {
            return ShardingConditions::default();
        }
        ShardingConditions {
            conditions,
            always_false: false,
        }
    }

    /// AND-ed leaves of one branch; `None` when two constraints contradict.
    fn branch_condition(
        &self,
        statement: &BoundStatement,
        branch: &[&Predicate],
        parameters: &[Value],
    ) -> Option<ShardingCondition> {
        let mut constraints: IndexMap<(String, String), ColumnConstraint> = IndexMap::new();
        for leaf in branch {
            let Some((column, constraint)) = leaf_constraint(leaf, parameters) else {
                continue;
            };
            for table in self.resolve_tables(statement, column) {
                let is_sharding_column = self
                    .rule
                    .find_table_rule(&table)
                    .is_some_and(|r| r.is_sharding_column(&column.name));
                if !is_sharding_column {
                    continue;
                }
                let key = (table, column.name.to_ascii_lowercase());
                match constraints.get_mut(&key) {
                    Some(existing) => {
                        if !existing.merge(constraint.clone()) {
                            return None;
                        }
                    }
                    None => {
                        constraints.insert(key, constraint.clone());
                    }
                }
            }
        }
        Some(ShardingCondition {
            values: constraints
                .into_iter()
                .map(|((table, column), constraint)| constraint.into_value(&table, &column))
                .collect(),
            row_index: None,
        })
    }

    /// Logical tables a column can belong to.
    fn resolve_tables(&self, statement: &BoundStatement, column: &ColumnRef) -> Vec<String> {
        if let Some(owner) = &column.owner {
            return statement.resolve_owner(owner).into_iter().collect();
        }
        let tables = statement.table_names();
        if tables.len() <= 1 {
            return tables;
        }
        let by_schema: Vec<String> = tables
            .iter()
            .filter(|t| self.schema.contains_column(t, &column.name))
            .cloned()
            .collect();
        if !by_schema.is_empty() {
            return by_schema;
        }
        tables
            .into_iter()
            .filter(|t| {
                self.rule
                    .find_table_rule(t)
                    .is_some_and(|r| r.is_sharding_column(&column.name))
            })
            .collect()
    }

    /// One condition per row, from VALUES/SET operands and generated keys.
    fn insert_conditions(
        &self,
        insert: &InsertStatement,
        parameters: &[Value],
        generated_keys: Option<&GeneratedKeyContext>,
    ) -> Result<ShardingConditions> {
        let Some(table_rule) = self.rule.find_table_rule(&insert.table) else {
            return Ok(ShardingConditions::default());
        };
        if insert.form == InsertForm::Select || insert.rows.is_empty() {
            return Ok(ShardingConditions::default());
        }
        let columns: Vec<String> = if insert.columns.is_empty() {
            self.schema.column_names(&insert.table)
        } else {
            insert.columns.iter().map(|c| c.to_ascii_lowercase()).collect()
        };
        if columns.is_empty() {
            return Err(ShardingError::unroutable(
                "DML",
                &[insert.table.clone()],
                "INSERT without a column list requires schema metadata for a sharding table",
            ));
        }

        let mut conditions = Vec::with_capacity(insert.rows.len());
        for (row_index, row) in insert.rows.iter().enumerate() {
            let mut values = Vec::new();
            for column in table_rule.sharding_columns() {
                let operand = columns
                    .iter()
                    .position(|c| c == column)
                    .and_then(|p| row.values.get(p));
                let (value, parameter) = match operand {
                    Some(operand) => operand_value(operand, parameters).ok_or_else(|| {
                        ShardingError::unroutable(
                            "DML",
                            &[insert.table.clone()],
                            format!(
                                "sharding value of column '{}' in row {} cannot be determined",
                                column,
                                row_index + 1
                            ),
                        )
                    })?,
                    None => match generated_keys
                        .filter(|keys| keys.column.eq_ignore_ascii_case(column))
                        .and_then(|keys| keys.values.get(row_index))
                    {
                        Some(value) => (value.clone(), None),
                        None => continue,
                    },
                };
                values.push(ShardingConditionValue::list(
                    &table_rule.logic_table,
                    column,
                    vec![value],
                    parameter.into_iter().collect(),
                ));
            }
            conditions.push(ShardingCondition {
                values,
                row_index: Some(row_index),
            });
        }
        Ok(ShardingConditions {
            conditions,
            always_false: false,
        })
    }
}

/// Generates keys for INSERT rows that omit the table's generate-key column.
pub fn generate_keys(statement: &BoundStatement, rule: &ShardingRule) -> Option<GeneratedKeyContext> {
    let insert = statement.insert.as_ref()?;
    let key = rule.find_table_rule(&insert.table)?.key_generate.as_ref()?;
    if insert.form == InsertForm::Select
        || insert.columns.is_empty()
        || insert.columns.iter().any(|c| c.eq_ignore_ascii_case(&key.column))
    {
        return None;
    }
    let values = insert.rows.iter().map(|_| key.generator.generate()).collect();
    tracing::debug!(
        "Generated {} key(s) for {}.{}",
        insert.rows.len(),
        insert.table,
        key.column
    );
    Some(GeneratedKeyContext {
        table: insert.table.clone(),
        column: key.column.clone(),
        values,
    })
}

#[derive(Debug, Clone)]
enum Constraint {
    List(Vec<Value>),
    Range(ValueRange),
    Unknown,
}

#[derive(Debug, Clone)]
struct ColumnConstraint {
    constraint: Constraint,
    parameters: Vec<usize>,
}

impl ColumnConstraint {
    fn new(constraint: Constraint, parameters: Vec<usize>) -> Self {
        Self {
            constraint,
            parameters,
        }
    }

    /// Intersects with another constraint on the same column; false when empty.
    fn merge(&mut self, other: ColumnConstraint) -> bool {
        let merged = match (std::mem::replace(&mut self.constraint, Constraint::Unknown), other.constraint) {
            (Constraint::Unknown, c) | (c, Constraint::Unknown) => Some(c),
            (Constraint::List(left), Constraint::List(right)) => {
                let kept: Vec<Value> = left
                    .into_iter()
                    .filter(|v| right.iter().any(|r| r.key() == v.key()))
                    .collect();
                (!kept.is_empty()).then_some(Constraint::List(kept))
            }
            (Constraint::Range(left), Constraint::Range(right)) => {
                left.intersect(&right).map(Constraint::Range)
            }
            (Constraint::List(list), Constraint::Range(range))
            | (Constraint::Range(range), Constraint::List(list)) => {
                let kept: Vec<Value> = list.into_iter().filter(|v| range.contains(v)).collect();
                (!kept.is_empty()).then_some(Constraint::List(kept))
            }
        };
        for index in other.parameters {
            if !self.parameters.contains(&index) {
                self.parameters.push(index);
            }
        }
        match merged {
            Some(constraint) => {
                self.constraint = constraint;
                true
            }
            None => false,
        }
    }

    fn into_value(self, table: &str, column: &str) -> ShardingConditionValue {
        match self.constraint {
            Constraint::List(values) => {
                ShardingConditionValue::list(table, column, values, self.parameters)
            }
            Constraint::Range(range) => {
                ShardingConditionValue::range(table, column, range, self.parameters)
            }
            Constraint::Unknown => ShardingConditionValue::unknown(table, column),
        }
    }
}

/// Expands into OR branches of AND-ed leaves; `None` past the branch cap.
fn to_dnf(predicate: &Predicate) -> Option<Vec<Vec<&Predicate>>> {
    match predicate {
        Predicate::Or(children) => {
            let mut branches = Vec::new();
            for child in children {
                branches.extend(to_dnf(child)?);
                if branches.len() > MAX_CONDITION_BRANCHES {
                    return None;
                }
            }
            Some(branches)
        }
        Predicate::And(children) => {
            let mut branches: Vec<Vec<&Predicate>> = vec![Vec::new()];
            for child in children {
                let child_branches = to_dnf(child)?;
                if branches.len() * child_branches.len() > MAX_CONDITION_BRANCHES {
                    return None;
                }
                let mut next = Vec::with_capacity(branches.len() * child_branches.len());
                for branch in &branches {
                    for extra in &child_branches {
                        let mut combined = branch.clone();
                        combined.extend(extra.iter().copied());
                        next.push(combined);
                    }
                }
                branches = next;
            }
            Some(branches)
        }
        leaf => Some(vec![vec![leaf]]),
    }
}

fn leaf_constraint<'p>(
    leaf: &'p Predicate,
    parameters: &[Value],
) -> Option<(&'p ColumnRef, ColumnConstraint)> {
    match leaf {
        Predicate::Compare {
            left: Operand::Column(column),
            op,
            right,
        } => {
            let Some((value, parameter)) = operand_value(right, parameters) else {
                return Some((column, ColumnConstraint::new(Constraint::Unknown, Vec::new())));
            };
            let constraint = match op {
                CompareOp::Eq => Constraint::List(vec![value]),
                CompareOp::Lt => Constraint::Range(ValueRange::at_most(value, false)),
                CompareOp::LtEq => Constraint::Range(ValueRange::at_most(value, true)),
                CompareOp::Gt => Constraint::Range(ValueRange::at_least(value, false)),
                CompareOp::GtEq => Constraint::Range(ValueRange::at_least(value, true)),
                CompareOp::NotEq => Constraint::Unknown,
            };
            let indexes = match constraint {
                Constraint::Unknown => Vec::new(),
                _ => parameter.into_iter().collect(),
            };
            Some((column, ColumnConstraint::new(constraint, indexes)))
        }
        Predicate::In {
            column: Operand::Column(column),
            list,
            negated,
        } => {
            let unknown = ColumnConstraint::new(Constraint::Unknown, Vec::new());
            if *negated {
                return Some((column, unknown));
            }
            let mut values = Vec::with_capacity(list.len());
            let mut indexes = Vec::new();
            for item in list {
                let Some((value, parameter)) = operand_value(item, parameters) else {
                    return Some((column, unknown));
                };
                values.push(value);
                indexes.extend(parameter);
            }
            Some((column, ColumnConstraint::new(Constraint::List(values), indexes)))
        }
        Predicate::Between {
            column: Operand::Column(column),
            low,
            high,
            negated,
        } => {
            let bounds = (!*negated)
                .then(|| operand_value(low, parameters).zip(operand_value(high, parameters)))
                .flatten();
            match bounds {
                Some(((low, low_index), (high, high_index))) => Some((
                    column,
                    ColumnConstraint::new(
                        Constraint::Range(ValueRange::closed(low, high)),
                        low_index.into_iter().chain(high_index).collect(),
                    ),
                )),
                None => Some((column, ColumnConstraint::new(Constraint::Unknown, Vec::new()))),
            }
        }
        _ => None,
    }
}

/// Literal or bound parameter value; NULL never narrows.
fn operand_value(operand: &Operand, parameters: &[Value]) -> Option<(Value, Option<usize>)> {
    match operand {
        Operand::Literal(value) if !value.is_null() => Some((value.clone(), None)),
        Operand::Parameter(index) => parameters
            .get(*index)
            .filter(|v| !v.is_null())
            .map(|v| (v.clone(), Some(*index))),
        _ => None,
    }
}

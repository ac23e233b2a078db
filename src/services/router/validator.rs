use crate::error::{Result, ShardingError};
use crate::models::{
    BoundStatement, ConditionOperator, DmlKind, InsertForm, Operand, RouteContext,
    ShardingConditions, StatementKind, Value,
};
use crate::services::rule::ShardingRule;

/// Checks a statement against the rule before routing.
pub fn validate_statement(
    rule: &ShardingRule,
    statement: &BoundStatement,
    conditions: &ShardingConditions,
    parameters: &[Value],
) -> Result<()> {
    match statement.kind {
        StatementKind::Dml(DmlKind::Insert) => validate_insert(rule, statement),
        StatementKind::Dml(DmlKind::Update) => {
            validate_update(rule, statement, conditions, parameters)
        }
        _ => Ok(()),
    }
}

fn validate_insert(rule: &ShardingRule, statement: &BoundStatement) -> Result<()> {
    let Some(insert) = &statement.insert else {
        return Ok(());
    };
    let Some(table_rule) = rule.find_table_rule(&insert.table) else {
        return Ok(());
    };
    if insert.form == InsertForm::Select {
        return Err(ShardingError::unroutable(
            "DML",
            &[insert.table.clone()],
            "INSERT ... SELECT into a sharding table is not supported",
        ));
    }
    if let Some(assignment) = statement
        .assignments
        .iter()
        .find(|a| table_rule.is_sharding_column(&a.column.name))
    {
        return Err(ShardingError::unroutable(
            "DML",
            &[insert.table.clone()],
            format!(
                "ON DUPLICATE KEY UPDATE cannot change sharding column '{}'",
                assignment.column.name
            ),
        ));
    }
    Ok(())
}

/// A sharding column may only be SET to the value the WHERE clause pins it to.
fn validate_update(
    rule: &ShardingRule,
    statement: &BoundStatement,
    conditions: &ShardingConditions,
    parameters: &[Value],
) -> Result<()> {
    if conditions.always_false {
        return Ok(());
    }
    for assignment in &statement.assignments {
        let tables: Vec<String> = match &assignment.column.owner {
            Some(owner) => statement.resolve_owner(owner).into_iter().collect(),
            None => statement.table_names(),
        };
        for table in tables {
            let is_sharding_column = rule
                .find_table_rule(&table)
                .is_some_and(|r| r.is_sharding_column(&assignment.column.name));
            if !is_sharding_column {
                continue;
            }
            let assigned = match &assignment.value {
                Operand::Literal(value) => Some(value),
                Operand::Parameter(index) => parameters.get(*index),
                _ => None,
            };
            let pinned = !conditions.is_empty()
                && conditions.conditions.iter().all(|condition| {
                    condition
                        .value_for(&table, &assignment.column.name)
                        .filter(|v| v.operator == ConditionOperator::Eq)
                        .and_then(|v| v.values.first())
                        .zip(assigned)
                        .is_some_and(|(pinned, assigned)| pinned.key() == assigned.key())
                });
            if !pinned {
                return Err(ShardingError::unroutable(
                    "DML",
                    &[table],
                    format!(
                        "sharding column '{}' can only be updated to the value fixed by the WHERE clause",
                        assignment.column.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Rejects query shapes the merge engine cannot recombine across units.
pub fn validate_route(statement: &BoundStatement, route: &RouteContext) -> Result<()> {
    if route.len() <= 1 {
        return Ok(());
    }
    let Some(select) = &statement.select else {
        return Ok(());
    };
    let reason = if select.has_union {
        "UNION across multiple route units is not supported"
    } else if select.having {
        "HAVING across multiple route units is not supported"
    } else if select.aggregates().any(|(_, aggregate)| aggregate.distinct) {
        "aggregate DISTINCT across multiple route units is not supported"
    } else {
        return Ok(());
    };
    Err(ShardingError::unroutable(
        statement.category().to_string(),
        &statement.table_names(),
        reason,
    ))
}

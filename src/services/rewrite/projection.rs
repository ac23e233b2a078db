use crate::error::{Result, ShardingError};
use crate::models::{
    AggregateFunction, AggregationSpec, BoundStatement, ColumnSelector, MergeContext,
    MergeStrategy, OrderByItem, OrderExpression, OrderSpec, PaginationContext, ProjectionKind,
    RouteUnit, SelectStatement, Value,
};

/// A column appended to the projection list for merging only.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct DerivedColumn {
    pub expression: String,
    /// Table qualifier inside `expression`, localized per unit.
    pub owner: Option<String>,
    pub alias: String,
}

impl DerivedColumn {
    fn render(&self, unit: &RouteUnit) -> String {
        let expression = match &self.owner {
            Some(owner) => localize_owner(&self.expression, owner, unit),
            None => self.expression.clone(),
        };
        format!("{} AS {}", expression, self.alias)
    }
}

#[derive(Debug, Clone, Default)]
pub(super) struct DerivedProjections {
    pub columns: Vec<DerivedColumn>,
    /// (projection index, count alias, sum alias) per AVG.
    avg: Vec<(usize, String, String)>,
    group_by: Vec<Option<String>>,
    order_by: Vec<Option<String>>,
}

impl DerivedProjections {
    /// Text inserted right after the last projection item.
    pub fn render(&self, unit: &RouteUnit) -> Option<String> {
        if self.columns.is_empty() {
            return None;
        }
        let rendered: Vec<String> = self.columns.iter().map(|c| c.render(unit)).collect();
        Some(format!(", {}", rendered.join(", ")))
    }
}

/// Columns a multi-unit query needs in every unit's result for merging.
pub(super) fn derive(select: &SelectStatement) -> DerivedProjections {
    let mut derived = DerivedProjections::default();
    let averages = select
        .aggregates()
        .filter(|(_, aggregate)| aggregate.function == AggregateFunction::Avg);
    for (n, (index, aggregate)) in averages.enumerate() {
        let owner = aggregate
            .argument_column
            .as_ref()
            .and_then(|c| c.owner.clone());
        let count = format!("AVG_DERIVED_COUNT_{}", n);
        let sum = format!("AVG_DERIVED_SUM_{}", n);
        derived.columns.push(DerivedColumn {
            expression: format!("COUNT({})", aggregate.argument),
            owner: owner.clone(),
            alias: count.clone(),
        });
        derived.columns.push(DerivedColumn {
            expression: format!("SUM({})", aggregate.argument),
            owner,
            alias: sum.clone(),
        });
        derived.avg.push((index, count, sum));
    }

    let mut group_count = 0;
    for item in &select.group_by {
        let alias = if is_projected(select, item) {
            None
        } else {
            let alias = format!("GROUP_BY_DERIVED_{}", group_count);
            group_count += 1;
            derived.columns.push(derived_column(item, &alias));
            Some(alias)
        };
        derived.group_by.push(alias);
    }

    let mut order_count = 0;
    for item in &select.order_by {
        let reused = select
            .group_by
            .iter()
            .zip(&derived.group_by)
            .find(|(group, alias)| alias.is_some() && group.text.eq_ignore_ascii_case(&item.text))
            .and_then(|(_, alias)| alias.clone());
        let alias = if reused.is_some() || is_projected(select, item) {
            reused
        } else {
            let alias = format!("ORDER_BY_DERIVED_{}", order_count);
            order_count += 1;
            derived.columns.push(derived_column(item, &alias));
            Some(alias)
        };
        derived.order_by.push(alias);
    }
    derived
}

fn derived_column(item: &OrderByItem, alias: &str) -> DerivedColumn {
    let owner = match &item.expression {
        OrderExpression::Column(column) => column.owner.clone(),
        _ => None,
    };
    DerivedColumn {
        expression: item.text.clone(),
        owner,
        alias: alias.to_string(),
    }
}

/// Whether an ORDER BY / GROUP BY item already appears in the result columns.
fn is_projected(select: &SelectStatement, item: &OrderByItem) -> bool {
    match &item.expression {
        OrderExpression::Position(_) => true,
        OrderExpression::Column(column) => {
            select.has_star()
                || select.projections.iter().any(|p| {
                    let by_column = match &p.kind {
                        ProjectionKind::Column(projected) => {
                            projected.name.eq_ignore_ascii_case(&column.name)
                                && match (&projected.owner, &column.owner) {
                                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                                    _ => true,
                                }
                        }
                        _ => false,
                    };
                    by_column || p.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&column.name))
                })
        }
        OrderExpression::Expression => select.projections.iter().any(|p| {
            p.text.eq_ignore_ascii_case(&item.text)
                || p.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&item.text))
        }),
    }
}

/// Result column of projection `index`: its alias, else its position when no
/// star precedes it, else its column name.
fn projection_selector(select: &SelectStatement, index: usize) -> ColumnSelector {
    let Some(projection) = select.projections.get(index) else {
        return ColumnSelector::Index(index);
    };
    if let Some(alias) = &projection.alias {
        return ColumnSelector::Label(alias.clone());
    }
    let star_before = select.projections[..=index]
        .iter()
        .any(|p| matches!(p.kind, ProjectionKind::Star { .. }));
    if !star_before {
        return ColumnSelector::Index(index);
    }
    match &projection.kind {
        ProjectionKind::Column(column) => ColumnSelector::Label(column.name.clone()),
        _ => ColumnSelector::Label(projection.text.clone()),
    }
}

fn item_selector(select: &SelectStatement, item: &OrderByItem, derived: Option<&String>) -> ColumnSelector {
    if let Some(alias) = derived {
        return ColumnSelector::Label(alias.clone());
    }
    let matched = select.projections.iter().position(|p| match &item.expression {
        OrderExpression::Position(_) => false,
        OrderExpression::Column(column) => {
            p.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&column.name))
                || matches!(&p.kind, ProjectionKind::Column(c) if c.name.eq_ignore_ascii_case(&column.name))
        }
        OrderExpression::Expression => {
            p.text.eq_ignore_ascii_case(&item.text)
                || p.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&item.text))
        }
    });
    match (&item.expression, matched) {
        (OrderExpression::Position(position), _) => ColumnSelector::Index(position.saturating_sub(1)),
        (_, Some(index)) => projection_selector(select, index),
        (OrderExpression::Column(column), None) => ColumnSelector::Label(column.name.clone()),
        (_, None) => ColumnSelector::Label(item.text.clone()),
    }
}

/// Merge strategy and column specs for a statement routed to `unit_count` units.
pub(super) fn merge_context(
    statement: &BoundStatement,
    unit_count: usize,
    derived: &DerivedProjections,
    parameters: &[Value],
) -> Result<MergeContext> {
    if unit_count <= 1 {
        return Ok(MergeContext::pass_through());
    }
    let Some(select) = &statement.select else {
        return Ok(MergeContext::concat());
    };

    let specs = |items: &[OrderByItem], aliases: &[Option<String>]| -> Vec<OrderSpec> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| OrderSpec {
                column: item_selector(select, item, aliases.get(i).and_then(|a| a.as_ref())),
                direction: item.direction,
            })
            .collect()
    };
    let group_by = specs(&select.group_by, &derived.group_by);
    let order_by = specs(&select.order_by, &derived.order_by);

    let aggregations: Vec<AggregationSpec> = select
        .aggregates()
        .map(|(index, aggregate)| {
            let avg = derived.avg.iter().find(|(i, _, _)| *i == index);
            AggregationSpec {
                function: aggregate.function,
                column: projection_selector(select, index),
                derived_count: avg.map(|(_, count, _)| ColumnSelector::Label(count.clone())),
                derived_sum: avg.map(|(_, _, sum)| ColumnSelector::Label(sum.clone())),
            }
        })
        .collect();

    let pagination = match &select.pagination {
        Some(segment) => {
            let resolve = |value: Option<&crate::models::PaginationValue>| -> Result<Option<u64>> {
                value
                    .map(|v| {
                        v.resolve(parameters).ok_or_else(|| {
                            ShardingError::rewrite(&statement.sql, "pagination parameter is not bound")
                        })
                    })
                    .transpose()
            };
            Some(PaginationContext {
                offset: resolve(segment.offset.as_ref())?.unwrap_or(0),
                row_count: resolve(segment.row_count.as_ref())?,
            })
        }
        None => None,
    };

    let strategy = if !group_by.is_empty() || !aggregations.is_empty() || select.distinct {
        MergeStrategy::GroupBy
    } else if !order_by.is_empty() {
        MergeStrategy::OrderBy
    } else if pagination.is_some() {
        MergeStrategy::Pagination
    } else {
        MergeStrategy::Concat
    };

    Ok(MergeContext {
        strategy,
        order_by,
        group_by,
        aggregations,
        pagination,
        distinct: select.distinct,
        derived_column_count: derived.columns.len(),
    })
}

/// Replaces a leading `owner.` qualifier with the unit's actual table name.
fn localize_owner(expression: &str, owner: &str, unit: &RouteUnit) -> String {
    let Some(actual) = unit.find_actual_table(owner) else {
        return expression.to_string();
    };
    for open in ["", "`", "\""] {
        let close = open;
        let prefix = format!("{}{}{}.", open, owner, close);
        if expression.len() >= prefix.len()
            && expression.is_char_boundary(prefix.len())
            && expression[..prefix.len()].eq_ignore_ascii_case(&prefix)
        {
            return format!("{}{}{}.{}", open, actual, close, &expression[prefix.len()..]);
        }
    }
    expression
        .find(&format!("({}.", owner))
        .map(|at| {
            format!(
                "{}({}.{}",
                &expression[..at],
                actual,
                &expression[at + owner.len() + 2..]
            )
        })
        .unwrap_or_else(|| expression.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::StatementBinder;
    use crate::models::{DatabaseType, OrderDirection, RouteMapper};

    fn bind(sql: &str) -> BoundStatement {
        StatementBinder::bind(sql, DatabaseType::MySql).unwrap()
    }

    fn unit() -> RouteUnit {
        RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_1")])
    }

    #[test]
    fn test_avg_derives_count_and_sum() {
        let statement = bind("SELECT user_id, AVG(t_order.amount) FROM t_order GROUP BY user_id");
        let derived = derive(statement.select.as_ref().unwrap());
        assert_eq!(
            derived.render(&unit()).unwrap(),
            ", COUNT(t_order_1.amount) AS AVG_DERIVED_COUNT_0, SUM(t_order_1.amount) AS AVG_DERIVED_SUM_0"
        );

        let merge = merge_context(&statement, 2, &derived, &[]).unwrap();
        assert_eq!(merge.strategy, MergeStrategy::GroupBy);
        assert_eq!(merge.group_by[0].column, ColumnSelector::Index(0));
        assert_eq!(merge.aggregations[0].column, ColumnSelector::Index(1));
        assert_eq!(
            merge.aggregations[0].derived_sum,
            Some(ColumnSelector::Label("AVG_DERIVED_SUM_0".to_string()))
        );
        assert_eq!(merge.derived_column_count, 2);
    }

    #[test]
    fn test_order_by_missing_column_is_derived() {
        let statement = bind("SELECT order_id FROM t_order ORDER BY user_id DESC, order_id");
        let derived = derive(statement.select.as_ref().unwrap());
        assert_eq!(
            derived.render(&unit()).unwrap(),
            ", user_id AS ORDER_BY_DERIVED_0"
        );
        let merge = merge_context(&statement, 2, &derived, &[]).unwrap();
        assert_eq!(merge.strategy, MergeStrategy::OrderBy);
        assert_eq!(
            merge.order_by[0],
            OrderSpec {
                column: ColumnSelector::Label("ORDER_BY_DERIVED_0".to_string()),
                direction: OrderDirection::Desc,
            }
        );
        assert_eq!(merge.order_by[1].column, ColumnSelector::Index(0));
    }

    #[test]
    fn test_group_by_and_order_by_share_derived_column() {
        let statement = bind("SELECT COUNT(*) FROM t_order GROUP BY status ORDER BY status");
        let derived = derive(statement.select.as_ref().unwrap());
        assert_eq!(derived.columns.len(), 1);
        let merge = merge_context(&statement, 2, &derived, &[]).unwrap();
        assert_eq!(merge.group_by[0].column, merge.order_by[0].column);
    }

    #[test]
    fn test_star_and_alias_selectors() {
        let statement = bind("SELECT *, COUNT(*) AS cnt FROM t_order GROUP BY user_id ORDER BY cnt");
        let derived = derive(statement.select.as_ref().unwrap());
        assert!(derived.columns.is_empty());
        let merge = merge_context(&statement, 2, &derived, &[]).unwrap();
        assert_eq!(merge.group_by[0].column, ColumnSelector::Label("user_id".to_string()));
        assert_eq!(merge.order_by[0].column, ColumnSelector::Label("cnt".to_string()));
    }

    #[test]
    fn test_single_unit_passes_through() {
        let statement = bind("SELECT AVG(amount) FROM t_order");
        let derived = DerivedProjections::default();
        let merge = merge_context(&statement, 1, &derived, &[]).unwrap();
        assert_eq!(merge.strategy, MergeStrategy::PassThrough);
    }

    #[test]
    fn test_pagination_only_and_distinct() {
        let statement = bind("SELECT order_id FROM t_order LIMIT ?, 5");
        let merge = merge_context(&statement, 2, &DerivedProjections::default(), &[Value::Integer(3)])
            .unwrap();
        assert_eq!(merge.strategy, MergeStrategy::Pagination);
        assert_eq!(
            merge.pagination,
            Some(PaginationContext {
                offset: 3,
                row_count: Some(5)
            })
        );

        let statement = bind("SELECT DISTINCT user_id FROM t_order");
        let merge = merge_context(&statement, 2, &DerivedProjections::default(), &[]).unwrap();
        assert_eq!(merge.strategy, MergeStrategy::GroupBy);
        assert!(merge.distinct);
    }
}

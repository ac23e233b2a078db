use crate::error::{Result, ShardingError};
use crate::models::{
    BoundStatement, RouteContext, RouteMapper, RouteType, RouteUnit, ShardingCondition,
    ShardingConditions,
};
use crate::services::router::broadcast::identity_mappers;
use crate::services::router::ShardingRouter;
use crate::services::rule::{ColumnValues, TableRule};

impl<'a> ShardingRouter<'a> {
    /// One data source that holds every table; the first in configuration order.
    pub(super) fn unicast(&self, statement: &BoundStatement, tables: &[String]) -> Result<RouteContext> {
        let mut route = RouteContext::new(RouteType::Unicast);
        let mut candidates = self.rule.data_source_names();
        for table in tables {
            let available = self.rule.table_data_sources(table);
            candidates.retain(|ds| available.contains(ds));
        }
        let data_source = candidates.into_iter().next().ok_or_else(|| {
            ShardingError::unroutable(
                statement.category().to_string(),
                tables,
                "tables have no data source in common",
            )
        })?;
        let mappers = tables
            .iter()
            .map(|table| {
                let actual = self
                    .rule
                    .find_table_rule(table)
                    .and_then(|r| r.actual_tables_in(&data_source).into_iter().next())
                    .unwrap_or_else(|| table.clone());
                RouteMapper::new(table.clone(), actual)
            })
            .collect();
        route.add_unit(RouteUnit::new(data_source, mappers));
        Ok(route)
    }

    /// Tables that live on exactly one data source: single tables, broadcast
    /// tables, or unknown tables on the default data source.
    pub(super) fn single(
        &self,
        statement: &BoundStatement,
        tables: &[String],
        strict: bool,
    ) -> Result<RouteContext> {
        let mut target: Option<String> = None;
        for table in tables.iter().filter(|t| !self.rule.is_broadcast_table(t)) {
            let data_source = self
                .rule
                .single_table_data_source(table)
                .or_else(|| self.rule.default_data_source());
            let Some(data_source) = data_source else {
                if !strict {
                    tracing::debug!("Ignoring statement on unconfigured table '{}'", table);
                    return Ok(RouteContext::new(RouteType::Ignore));
                }
                return Err(ShardingError::unroutable(
                    statement.category().to_string(),
                    &[table.clone()],
                    "table has no sharding rule and no default data source is configured",
                ));
            };
            match &target {
                Some(existing) if existing != data_source => {
                    return Err(ShardingError::unroutable(
                        statement.category().to_string(),
                        tables,
                        format!(
                            "tables live on different data sources '{}' and '{}'",
                            existing, data_source
                        ),
                    ));
                }
                Some(_) => {}
                None => target = Some(data_source.to_string()),
            }
        }
        let data_source = match target.or_else(|| self.rule.data_source_names().into_iter().next()) {
            Some(ds) => ds,
            None => return Ok(RouteContext::new(RouteType::Ignore)),
        };
        let mut route = RouteContext::new(RouteType::Unicast);
        route.add_unit(RouteUnit::new(data_source, identity_mappers(tables)));
        Ok(route)
    }

    /// One sharding table or one binding group. The primary table is the first
    /// table carrying a sharding value; bound tables follow its node index.
    pub(super) fn standard(
        &self,
        statement: &BoundStatement,
        tables: &[String],
        conditions: &ShardingConditions,
        broadcast: &[String],
    ) -> Result<RouteContext> {
        self.check_mixed_tables(statement, tables)?;
        let category = statement.category().to_string();
        let primary_name = conditions
            .first_constrained_table()
            .filter(|t| tables.iter().any(|n| n == t))
            .map(|t| t.to_string())
            .or_else(|| tables.first().cloned())
            .ok_or_else(|| ShardingError::unroutable(category.clone(), tables, "no sharding table"))?;
        let primary = self.table_rule(&category, &primary_name)?;
        let others: Vec<&TableRule> = tables
            .iter()
            .filter(|t| **t != primary_name)
            .map(|t| self.table_rule(&category, t))
            .collect::<Result<_>>()?;

        let mut route = RouteContext::new(RouteType::Standard);
        if conditions.is_empty() {
            tracing::warn!(
                "No sharding condition for '{}', routing to all {} data nodes",
                primary_name,
                primary.actual_data_nodes.len()
            );
            for index in 0..primary.actual_data_nodes.len() {
                route.add_unit(self.binding_unit(primary, &others, index, broadcast)?);
            }
            return Ok(route);
        }

        for condition in &conditions.conditions {
            let values = binding_values(primary, &others, condition);
            let indexes = node_indexes(primary, &values)?;
            for other in &others {
                self.check_binding(primary, other, &others, condition, &indexes)?;
            }
            match condition.row_index {
                Some(row) => {
                    let [index] = indexes.as_slice() else {
                        return Err(ShardingError::unroutable(
                            category,
                            &[primary_name],
                            format!(
                                "INSERT row {} routes to {} data nodes, expected exactly one",
                                row + 1,
                                indexes.len()
                            ),
                        ));
                    };
                    route.assign_row(self.binding_unit(primary, &others, *index, broadcast)?, row);
                }
                None => {
                    for index in indexes {
                        route.add_unit(self.binding_unit(primary, &others, index, broadcast)?);
                    }
                }
            }
        }
        Ok(route)
    }

    /// Sharding tables that are not all bound: each binding group (or lone
    /// table) is routed on its own, then combined per data source.
    pub(super) fn complex(
        &self,
        statement: &BoundStatement,
        tables: &[String],
        conditions: &ShardingConditions,
        broadcast: &[String],
    ) -> Result<RouteContext> {
        self.check_mixed_tables(statement, tables)?;
        let mut groups: Vec<Vec<String>> = Vec::new();
        for table in tables {
            if groups.iter().any(|g| g.contains(table)) {
                continue;
            }
            let group = match self.rule.binding_group_of(table) {
                Some(bound) => tables.iter().filter(|t| bound.contains(t)).cloned().collect(),
                None => vec![table.clone()],
            };
            groups.push(group);
        }

        let routes: Vec<RouteContext> = groups
            .iter()
            .map(|group| self.standard(statement, group, conditions, &[]))
            .collect::<Result<_>>()?;
        let data_sources = routes
            .first()
            .map(|r| r.data_source_names())
            .unwrap_or_default();

        let mut route = RouteContext::new(RouteType::Complex);
        for data_source in data_sources {
            let per_group: Vec<Vec<&RouteUnit>> = routes
                .iter()
                .map(|r| r.units().filter(|u| u.data_source == data_source).collect())
                .collect();
            if per_group.iter().any(|units| units.is_empty()) {
                continue;
            }
            for combination in cartesian(&per_group) {
                let mut mappers: Vec<RouteMapper> = combination
                    .iter()
                    .flat_map(|unit| unit.table_mappers.iter().cloned())
                    .collect();
                mappers.extend(identity_mappers(broadcast));
                route.add_unit(RouteUnit::new(data_source.clone(), mappers));
            }
        }
        if route.is_empty() {
            return Err(ShardingError::unroutable(
                statement.category().to_string(),
                tables,
                "sharding tables route to no common data source",
            ));
        }
        Ok(route)
    }

    /// Unit for the primary's node at `index`, with bound tables at the same index.
    pub(super) fn binding_unit(
        &self,
        primary: &TableRule,
        others: &[&TableRule],
        index: usize,
        broadcast: &[String],
    ) -> Result<RouteUnit> {
        let node = primary.actual_data_nodes.get(index).ok_or_else(|| {
            ShardingError::BindingTableInconsistency {
                tables: vec![primary.logic_table.clone()],
                detail: format!("node index {} is out of range", index),
            }
        })?;
        let mut mappers = vec![RouteMapper::new(primary.logic_table.clone(), node.table.clone())];
        for other in others {
            let bound = other
                .actual_data_nodes
                .get(index)
                .filter(|n| n.data_source == node.data_source)
                .ok_or_else(|| ShardingError::BindingTableInconsistency {
                    tables: vec![primary.logic_table.clone(), other.logic_table.clone()],
                    detail: format!("no data node of '{}' matches {}", other.logic_table, node),
                })?;
            mappers.push(RouteMapper::new(other.logic_table.clone(), bound.table.clone()));
        }
        mappers.extend(identity_mappers(broadcast));
        Ok(RouteUnit::new(node.data_source.clone(), mappers))
    }

    /// A bound table routed with its own values must land on the primary's node indexes.
    fn check_binding(
        &self,
        primary: &TableRule,
        other: &TableRule,
        others: &[&TableRule],
        condition: &ShardingCondition,
        expected: &[usize],
    ) -> Result<()> {
        let peers: Vec<&TableRule> = std::iter::once(primary)
            .chain(others.iter().copied().filter(|t| t.logic_table != other.logic_table))
            .collect();
        let values = binding_values(other, &peers, condition);
        let actual = node_indexes(other, &values)?;
        if actual != expected {
            return Err(ShardingError::BindingTableInconsistency {
                tables: vec![primary.logic_table.clone(), other.logic_table.clone()],
                detail: format!(
                    "'{}' routes to node indexes {:?} but '{}' routes to {:?}",
                    primary.logic_table, expected, other.logic_table, actual
                ),
            });
        }
        Ok(())
    }

    fn table_rule(&self, category: &str, table: &str) -> Result<&'a TableRule> {
        self.rule.find_table_rule(table).ok_or_else(|| {
            ShardingError::unroutable(category, &[table.to_string()], "table has no sharding rule")
        })
    }
}

/// A table's own sharding values, completed by same-named columns of bound tables.
fn binding_values(table: &TableRule, peers: &[&TableRule], condition: &ShardingCondition) -> ColumnValues {
    let mut values = table.column_values(condition);
    for column in table.sharding_columns() {
        if values.contains_key(column) {
            continue;
        }
        let borrowed = peers.iter().find_map(|peer| {
            condition
                .value_for(&peer.logic_table, column)
                .and_then(|v| v.sharding_value())
        });
        if let Some(value) = borrowed {
            values.insert(column.to_string(), value);
        }
    }
    values
}

fn node_indexes(table: &TableRule, values: &ColumnValues) -> Result<Vec<usize>> {
    Ok(table
        .route(values)?
        .iter()
        .filter_map(|node| table.data_node_index(node))
        .collect())
}

fn cartesian<'u>(groups: &[Vec<&'u RouteUnit>]) -> Vec<Vec<&'u RouteUnit>> {
    let mut combinations: Vec<Vec<&RouteUnit>> = vec![Vec::new()];
    for group in groups {
        let mut next = Vec::with_capacity(combinations.len() * group.len());
        for combination in &combinations {
            for unit in group {
                let mut extended = combination.clone();
                extended.push(*unit);
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}

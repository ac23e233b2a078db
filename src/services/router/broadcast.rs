use indexmap::IndexSet;
use url::Url;

use crate::error::Result;
use crate::models::{DataSourceConfig, RouteContext, RouteMapper, RouteType, RouteUnit};
use crate::services::router::ShardingRouter;

impl<'a> ShardingRouter<'a> {
    /// Every data source; `tables` keep their logical names.
    pub(super) fn database_broadcast(&self, tables: &[String]) -> RouteContext {
        let mut route = RouteContext::new(RouteType::DatabaseBroadcast);
        for data_source in self.rule.data_source_names() {
            route.add_unit(RouteUnit::new(data_source, identity_mappers(tables)));
        }
        route
    }

    /// First data source of every distinct database instance.
    pub(super) fn instance_broadcast(&self) -> RouteContext {
        let mut route = RouteContext::new(RouteType::InstanceBroadcast);
        let mut seen = IndexSet::new();
        for data_source in self.rule.data_sources() {
            if seen.insert(instance_key(data_source)) {
                route.add_unit(RouteUnit::new(data_source.name.clone(), Vec::new()));
            }
        }
        route
    }

    /// Every data node of the given rule tables. Tables of one binding group
    /// share units by node index.
    pub(super) fn table_broadcast(&self, tables: &[String]) -> Result<RouteContext> {
        let mut route = RouteContext::new(RouteType::TableBroadcast);
        if tables.len() > 1 && self.rule.is_all_binding_tables(tables) {
            let mut rules = tables.iter().filter_map(|t| self.rule.find_table_rule(t));
            if let Some(primary) = rules.next() {
                let others: Vec<_> = rules.collect();
                for index in 0..primary.actual_data_nodes.len() {
                    route.add_unit(self.binding_unit(primary, &others, index, &[])?);
                }
            }
            return Ok(route);
        }
        for table in tables {
            let nodes = match self.rule.find_table_rule(table) {
                Some(rule) => rule.actual_data_nodes.clone(),
                None => self.rule.broadcast_data_nodes(table),
            };
            for node in nodes {
                route.add_unit(RouteUnit::new(
                    node.data_source,
                    vec![RouteMapper::new(table.clone(), node.table)],
                ));
            }
        }
        Ok(route)
    }

    /// One data source out of each group of data sources used by a table rule.
    pub(super) fn data_source_group_broadcast(&self) -> RouteContext {
        let mut route = RouteContext::new(RouteType::DataSourceGroupBroadcast);
        let mut chosen: Vec<String> = Vec::new();
        for table_rule in self.rule.table_rules() {
            let group = table_rule.data_source_names();
            if group.iter().any(|ds| chosen.contains(ds)) {
                continue;
            }
            if let Some(first) = group.into_iter().next() {
                chosen.push(first);
            }
        }
        if chosen.is_empty() {
            chosen = self.rule.data_source_names().into_iter().take(1).collect();
        }
        for data_source in chosen {
            route.add_unit(RouteUnit::new(data_source, Vec::new()));
        }
        route
    }
}

pub(super) fn identity_mappers(tables: &[String]) -> Vec<RouteMapper> {
    tables
        .iter()
        .map(|t| RouteMapper::new(t.clone(), t.clone()))
        .collect()
}

/// `host:port` of a data source URL; data sources without a URL are their own instance.
fn instance_key(data_source: &DataSourceConfig) -> String {
    data_source
        .url
        .as_deref()
        .and_then(|url| Url::parse(url).ok())
        .and_then(|url| {
            let host = url.host_str()?.to_ascii_lowercase();
            Some(match url.port_or_known_default() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            })
        })
        .unwrap_or_else(|| format!("data-source:{}", data_source.name))
}

/// Data source URL with the password replaced, for logs and API output.
pub fn mask_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("****")).is_err() {
                return "<invalid url>".to_string();
            }
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

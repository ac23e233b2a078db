use axum::{extract::State, Json};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::config::load_rules;
use crate::services::router::broadcast::mask_url;

/// Summarise the active rule snapshot
pub async fn get_rules(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = state.kernel.snapshots().load();
    let rule = snapshot.rule.as_ref();

    let data_sources: Vec<serde_json::Value> = rule
        .data_sources()
        .iter()
        .map(|ds| {
            serde_json::json!({
                "name": ds.name,
                "url": ds.url.as_deref().map(mask_url),
            })
        })
        .collect();
    let tables: Vec<serde_json::Value> = rule
        .table_rules()
        .map(|table| {
            serde_json::json!({
                "name": table.logic_table,
                "actual_data_nodes": table
                    .actual_data_nodes
                    .iter()
                    .map(|node| node.to_string())
                    .collect::<Vec<_>>(),
                "key_generate_column": table.key_generate.as_ref().map(|k| k.column.clone()),
            })
        })
        .collect();
    let single_tables: Vec<serde_json::Value> = rule
        .single_tables()
        .map(|(name, data_source)| serde_json::json!({ "name": name, "data_source": data_source }))
        .collect();

    Ok(Json(serde_json::json!({
        "version": snapshot.version,
        "loaded_at": snapshot.loaded_at,
        "data_sources": data_sources,
        "default_data_source": rule.default_data_source(),
        "tables": tables,
        "binding_tables": rule.binding_groups(),
        "broadcast_tables": rule.broadcast_tables().collect::<Vec<_>>(),
        "single_tables": single_tables,
        "schema_tables": snapshot.schema.tables.len(),
    })))
}

/// Reload the rules file and publish a new snapshot
pub async fn reload_rules(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let path = state.config.rules.path.clone();
    tracing::info!("Reloading sharding rules from {}", path);

    let (rule, schema) = tokio::task::spawn_blocking(move || load_rules(path))
        .await
        .map_err(|e| AppError::Internal(format!("Rule reload task failed: {}", e)))??;
    let version = state.kernel.snapshots().swap(rule, schema);

    Ok(Json(serde_json::json!({
        "version": version,
    })))
}

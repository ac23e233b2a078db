use axum::{extract::State, Json};
use serde::Deserialize;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{DatabaseType, Value};

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub sql: String,
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
    #[serde(default)]
    pub database_type: Option<String>,
}

/// Route and rewrite a statement without executing it
pub async fn preview_statement(
    State(state): State<AppState>,
    Json(payload): Json<PreviewRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sql = payload.sql.trim();
    if sql.is_empty() {
        return Err(AppError::Validation("SQL statement cannot be empty".to_string()));
    }

    let database_type: DatabaseType = match payload.database_type.as_deref() {
        Some(name) => name.parse().map_err(AppError::Validation)?,
        None => state.config.database_type()?,
    };
    let parameters: Vec<Value> = payload.parameters.iter().map(Value::from_json).collect();

    tracing::info!("Previewing {} statement with {} parameter(s)", database_type, parameters.len());
    let context = state.kernel.prepare(sql, database_type, &parameters)?;

    Ok(Json(serde_json::json!({
        "preview": context,
    })))
}

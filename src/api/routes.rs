use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{preview, rules, AppState};

/// Create router with application state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/preview", post(preview::preview_statement))
        .route("/api/rules", get(rules::get_rules))
        .route("/api/rules/reload", post(rules::reload_rules))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ExecutorConfig, LoggingConfig, RulesConfig, ServerConfig};
    use crate::models::SchemaMetadata;
    use crate::services::rule::tests::sample_rule;
    use crate::services::{ShardingKernel, SnapshotHolder};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(rules_path: &str) -> AppState {
        AppState {
            kernel: Arc::new(ShardingKernel::new(Arc::new(SnapshotHolder::new(
                sample_rule(),
                SchemaMetadata::default(),
            )))),
            config: Config {
                server: ServerConfig {
                    host: "127.0.0.1".to_string(),
                    port: 3307,
                },
                rules: RulesConfig {
                    path: rules_path.to_string(),
                    database_type: "mysql".to_string(),
                },
                executor: ExecutorConfig {
                    max_parallelism: 2,
                    timeout_secs: 5,
                    fail_fast: true,
                },
                logging: LoggingConfig {
                    level: "info".to_string(),
                    style: "auto".to_string(),
                },
            },
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(test_state("./rules.toml"));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_preview_returns_rewritten_units() {
        let app = create_router(test_state("./rules.toml"));
        let response = app
            .oneshot(post_json(
                "/api/preview",
                serde_json::json!({
                    "sql": "SELECT * FROM t_order WHERE user_id = ? AND order_id = ?",
                    "parameters": [1, 2]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let units = body["preview"]["units"].as_array().unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0]["data_source"], "ds_1");
        assert_eq!(
            units[0]["sql"],
            "SELECT * FROM t_order_0 WHERE user_id = ? AND order_id = ?"
        );
    }

    #[tokio::test]
    async fn test_preview_errors_use_sharding_codes() {
        let app = create_router(test_state("./rules.toml"));
        let response = app
            .clone()
            .oneshot(post_json("/api/preview", serde_json::json!({ "sql": "SELECT * FROM t_missing" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"]["code"], "UNROUTABLE_STATEMENT");

        let response = app
            .oneshot(post_json("/api/preview", serde_json::json!({ "sql": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_rules_summary_masks_credentials() {
        let app = create_router(test_state("./rules.toml"));
        let response = app
            .oneshot(Request::builder().uri("/api/rules").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["version"], 1);
        assert!(!body.to_string().contains("secret"));
        assert!(body["tables"].as_array().unwrap().iter().any(|t| t["name"] == "t_order"));
    }

    #[tokio::test]
    async fn test_reload_missing_file_keeps_snapshot() {
        let state = test_state("/nonexistent/rules.toml");
        let kernel = state.kernel.clone();
        let app = create_router(state);
        let response = app
            .oneshot(post_json("/api/rules/reload", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(kernel.snapshots().load().version, 1);
    }
}

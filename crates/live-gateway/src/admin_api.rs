//! Admin API for the live gateway

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use live_pipeline_core::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::managed_stream::ManagedStream;
use crate::registry::{RuleRegistry, RuleSet, RuleSummary};
use crate::GatewayStats;

/// Admin API state
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<RuleRegistry>,
    pub managed_stream: Arc<ManagedStream>,
    pub stats: Arc<dyn Fn() -> GatewayStats + Send + Sync>,
}

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Stats response
#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: GatewayStats,
    pub suppress_rate: f64,
}

/// Active rule set
#[derive(Serialize)]
pub struct RulesResponse {
    pub loaded_at: DateTime<Utc>,
    pub source: Option<String>,
    pub rules: Vec<RuleSummary>,
    pub remote_write_backends: Vec<String>,
}

impl RulesResponse {
    fn new(set: &RuleSet, registry: &RuleRegistry) -> Self {
        Self {
            loaded_at: set.loaded_at(),
            source: registry.source().map(|p| p.display().to_string()),
            rules: set.rules().iter().map(|r| r.describe()).collect(),
            remote_write_backends: set
                .document()
                .remote_write_backends
                .iter()
                .map(|b| b.uid.clone())
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn live() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AdminState>) -> (StatusCode, &'static str) {
    if state.registry.is_loaded() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "rules not loaded")
    }
}

async fn stats(State(state): State<AdminState>) -> Json<StatsResponse> {
    let s = (state.stats)();
    let suppress_rate = if s.dispatch.frames > 0 {
        s.dispatch.suppressed as f64 / s.dispatch.frames as f64 * 100.0
    } else {
        0.0
    };
    Json(StatsResponse {
        stats: s,
        suppress_rate,
    })
}

async fn rules(State(state): State<AdminState>) -> Json<RulesResponse> {
    let set = state.registry.current().await;
    Json(RulesResponse::new(&set, &state.registry))
}

async fn reload_rules(State(state): State<AdminState>) -> Response {
    match state.registry.reload().await {
        Ok(set) => {
            info!(rules = set.len(), "Rules reloaded via admin API");
            Json(RulesResponse::new(&set, &state.registry)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Rule reload rejected");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e)
        }
    }
}

async fn streams(State(state): State<AdminState>) -> Json<Vec<String>> {
    Json(state.managed_stream.channels().await)
}

async fn stream_last_frame(
    State(state): State<AdminState>,
    Path(channel): Path<String>,
) -> Response {
    match state.managed_stream.last_frame(&channel).await {
        Some(frame) => Json(frame).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("no cached frame for channel {channel}"),
        ),
    }
}

/// Admin routes
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/stats", get(stats))
        .route("/rules", get(rules))
        .route("/rules/reload", post(reload_rules))
        .route("/streams", get(streams))
        .route("/streams/*channel", get(stream_last_frame))
        .with_state(state)
}

/// Run admin server
pub async fn run_admin_server(listen: String, state: AdminState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| PipelineError::transport_with_source(format!("Failed to bind {listen}"), e))?;
    info!(listen, "Admin API started");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| PipelineError::transport_with_source("Admin API server failed", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryBroadcaster;
    use crate::builder::testing::deps;
    use crate::builder::RuleBuilder;
    use crate::dispatcher::DispatchStats;

    fn state(registry: RuleRegistry) -> AdminState {
        let broadcaster = Arc::new(MemoryBroadcaster::new());
        AdminState {
            registry: Arc::new(registry),
            managed_stream: Arc::new(ManagedStream::new(broadcaster)),
            stats: Arc::new(|| GatewayStats {
                received: 10,
                rejected: 1,
                active_channels: 2,
                dispatch: DispatchStats {
                    frames: 8,
                    suppressed: 2,
                    ..Default::default()
                },
            }),
        }
    }

    fn registry() -> RuleRegistry {
        RuleRegistry::new(RuleBuilder::new(deps(Arc::new(MemoryBroadcaster::new()))))
    }

    #[tokio::test]
    async fn test_ready_after_first_load() {
        let state = state(registry());
        assert_eq!(ready(State(state.clone())).await.0, StatusCode::SERVICE_UNAVAILABLE);

        state.registry.load_slice(br#"{"rules": []}"#).await.unwrap();
        assert_eq!(ready(State(state)).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_rate() {
        let Json(response) = stats(State(state(registry()))).await;
        assert_eq!(response.stats.received, 10);
        assert!((response.suppress_rate - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"rules": [{"pattern": "a/b", "settings": {"outputter": {"type": "localSubscribers"}}}]}"#,
        )
        .unwrap();

        let state = state(registry().with_source(&path));
        let response = reload_rules(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        std::fs::write(
            &path,
            r#"{"rules": [{"pattern": "a/b", "settings": {"outputter": {"type": "nope"}}}]}"#,
        )
        .unwrap();
        let response = reload_rules(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let Json(rules) = rules(State(state)).await;
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(rules.rules[0].outputter, Some("localSubscribers"));
    }

    #[tokio::test]
    async fn test_stream_last_frame() {
        let state = state(registry());
        let missing = stream_last_frame(State(state.clone()), Path("a/b".to_string())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let frame = Frame::new(
            "f",
            vec![Field::new("v", FieldValues::Number(vec![Some(1.0)]))],
        )
        .unwrap();
        state.managed_stream.push("a/b", &frame).await.unwrap();

        let found = stream_last_frame(State(state.clone()), Path("a/b".to_string())).await;
        assert_eq!(found.status(), StatusCode::OK);
        let Json(channels) = streams(State(state)).await;
        assert_eq!(channels, vec!["a/b".to_string()]);
    }
}

//! API Handlers
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use rag_agents::AnswerEngine;
use rag_core::{QueryResult, RagError, Turn, ENGINE_VERSION};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<Turn>,
}

/// Engine failure rendered as `{error, kind}`
#[derive(Debug)]
pub struct ApiError(pub RagError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            RagError::EmptyQuery => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

async fn run_engine(
    state: &AppState,
    engine: &dyn AnswerEngine,
    request: AnswerRequest,
) -> Result<Json<QueryResult>, ApiError> {
    let design = engine.design();
    let cancel = CancellationToken::new();
    match engine.answer(&request.query, request.history, &cancel).await {
        Ok(result) => {
            state.metrics.observe(design, &result);
            Ok(Json(result))
        }
        Err(err) => {
            warn!(%design, error = %err, "query failed");
            state.metrics.observe_error(design);
            Err(ApiError(err))
        }
    }
}

pub async fn answer(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    run_engine(&state, state.adaptive.as_ref(), request).await
}

pub async fn answer_linear(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    run_engine(&state, state.linear.as_ref(), request).await
}

pub async fn answer_self_check(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    run_engine(&state, state.self_check.as_ref(), request).await
}

pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": ENGINE_VERSION })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{GenerationResponse, HealthResponse, ModelInfo, ModelRegistry, validate_generation_body},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let state = AppState { registry, config };

    Router::new()
        .route("/", get(health))
        .route("/model-info", get(model_info))
        .route("/generate", post(generate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model: state.config.model_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfo>, ServiceError> {
    Ok(Json(state.registry.info()?))
}

async fn generate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<GenerationResponse>, ServiceError> {
    let request = validate_generation_body(&body, &state.config)?;
    debug!(
        prompt_chars = request.prompt.chars().count(),
        max_new_tokens = request.max_new_tokens,
        do_sample = request.do_sample,
        "generation request"
    );

    let response = state.registry.generate(request).await?;
    Ok(Json(response))
}

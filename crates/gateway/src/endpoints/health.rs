//! # GET /health
//!
//! 認証不要。上流には問い合わせない。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use repobridge_types::HealthResponse;

use crate::state::GatewayState;

pub async fn handle_health(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    let repo = state.gateway.repo();
    Json(HealthResponse {
        status: "ok".to_string(),
        repo: repo.name.clone(),
        branch: repo.branch.clone(),
    })
}

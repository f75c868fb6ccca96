//! Namespace listing handler.

use crate::api::state::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// List namespaces managed by this provider.
#[utoipa::path(
    get,
    path = "/system/namespaces",
    tag = "System",
    responses((status = 200, description = "Provider namespaces", body = [String]))
)]
pub async fn namespaces(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.functions.list_namespaces())
}

//! Function list handler.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{ApiErrorResponse, FunctionStatus, NamespaceQuery};
use crate::api::validation::request_namespace;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;

/// List every deployed function with live replica counts.
#[utoipa::path(
    get,
    path = "/system/functions",
    tag = "Functions",
    params(("namespace" = Option<String>, Query, description = "Namespace")),
    responses(
        (status = 200, description = "Deployed functions", body = [FunctionStatus]),
        (status = 400, description = "Invalid namespace", body = ApiErrorResponse)
    )
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Vec<FunctionStatus>>, ApiError> {
    let namespace = request_namespace(query.namespace.as_deref());
    if !state.functions.validate_namespace(&namespace) {
        return Err(ApiError::BadRequest("namespace not valid".to_string()));
    }

    let mut statuses = Vec::new();
    for function in state.functions.list() {
        let mut status = function.status();
        status.replicas = state.machines.get_replicas(function.service());
        status.available_replicas = state.machines.get_available_replicas(function.service()).await;
        statuses.push(status);
    }
    Ok(Json(statuses))
}

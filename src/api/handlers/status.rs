//! Function status handler.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{ApiErrorResponse, FunctionStatus, NamespaceQuery};
use crate::api::validation::request_namespace;
use axum::extract::{Path, Query, State};
use axum::Json;
use std::sync::Arc;

/// Status of one function, with live replica counts.
#[utoipa::path(
    get,
    path = "/system/function/{name}",
    tag = "Functions",
    params(
        ("name" = String, Path, description = "Service name"),
        ("namespace" = Option<String>, Query, description = "Namespace")
    ),
    responses(
        (status = 200, description = "Function status", body = FunctionStatus),
        (status = 404, description = "Function not found", body = ApiErrorResponse)
    )
)]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<FunctionStatus>, ApiError> {
    let namespace = request_namespace(query.namespace.as_deref());
    if !state.functions.validate_namespace(&namespace) {
        return Err(ApiError::BadRequest("namespace not valid".to_string()));
    }

    let function = state.functions.get(&name)?;
    let mut status = function.status();
    status.replicas = state.machines.get_replicas(&name);
    status.available_replicas = state.machines.get_available_replicas(&name).await;
    Ok(Json(status))
}

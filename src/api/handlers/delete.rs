//! Delete handler: stop every instance, then remove the function.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{ApiErrorResponse, DeleteFunctionRequest};
use crate::api::validation::request_namespace;
use crate::error::ErrorKind;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Delete a function and all of its instances.
#[utoipa::path(
    delete,
    path = "/system/functions",
    tag = "Functions",
    request_body = DeleteFunctionRequest,
    responses(
        (status = 200, description = "Function deleted"),
        (status = 404, description = "Function not found", body = ApiErrorResponse),
        (status = 500, description = "Instance teardown failed", body = ApiErrorResponse)
    )
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteFunctionRequest>,
) -> Result<StatusCode, ApiError> {
    let service = req.function_name;
    tracing::info!(service = %service, "delete requested");

    let namespace = request_namespace(req.namespace.as_deref());
    if !state.functions.validate_namespace(&namespace) {
        return Err(ApiError::BadRequest("namespace not valid".to_string()));
    }
    if !state.functions.exists(&service) {
        return Err(ApiError::NotFound(format!(
            "function not found: {}",
            service
        )));
    }

    // Instances go first; the function entry is only removed once nothing
    // references it.
    state.machines.clone().stop_all_machines(&service).await?;

    if let Err(e) = state.endpoints.delete_service(&service).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(service = %service, error = %e, "failed to drop service routes");
        }
    }

    state.functions.delete(&service);
    tracing::info!(service = %service, "function deleted");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::super::deploy::deploy;
    use super::super::testutil::{test_provider, wait_for_ips};
    use super::*;
    use crate::function::testutil::deployment;

    fn delete_request(service: &str) -> DeleteFunctionRequest {
        DeleteFunctionRequest {
            function_name: service.to_string(),
            namespace: None,
        }
    }

    #[tokio::test]
    async fn delete_unknown_function_is_404() {
        let provider = test_provider();
        let err = delete(State(provider.state.clone()), Json(delete_request("ghost")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_instances_routes_and_entry() {
        let provider = test_provider();
        deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();
        provider
            .state
            .machines
            .clone()
            .scale_machines_to("echo", 2)
            .await
            .unwrap();
        wait_for_ips(&provider.endpoints, "echo", 2).await;

        let status = delete(State(provider.state.clone()), Json(delete_request("echo")))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(!provider.state.functions.exists("echo"));
        assert!(provider.state.machines.is_empty());
        assert!(provider.endpoints.ips("echo").is_empty());
        assert!(!provider.endpoints.table.read().contains_key("echo"));
    }

    #[tokio::test]
    async fn scale_to_zero_then_delete_leaves_no_state() {
        let provider = test_provider();
        deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();

        provider
            .state
            .machines
            .clone()
            .scale_machines_to("echo", 0)
            .await
            .unwrap();
        assert!(provider.state.functions.exists("echo"));
        assert_eq!(provider.state.machines.get_replicas("echo"), 0);

        delete(State(provider.state.clone()), Json(delete_request("echo")))
            .await
            .unwrap();
        assert!(!provider.state.functions.exists("echo"));
        assert!(provider.state.machines.is_empty());
        assert!(!provider.endpoints.table.read().contains_key("echo"));
    }
}

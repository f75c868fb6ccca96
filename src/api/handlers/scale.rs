//! Scale handler: externally driven replica adjustment.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{ApiErrorResponse, ScaleServiceRequest};
use crate::api::validation::request_namespace;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Scale a function to a replica count. A service currently at zero gets
/// its first instance launched from the function image before cloning.
#[utoipa::path(
    post,
    path = "/system/scale-function/{name}",
    tag = "Functions",
    params(("name" = String, Path, description = "Service name")),
    request_body = ScaleServiceRequest,
    responses(
        (status = 200, description = "Function scaled"),
        (status = 404, description = "Function not found", body = ApiErrorResponse),
        (status = 500, description = "Scaling failed", body = ApiErrorResponse)
    )
)]
pub async fn scale(
    State(state): State<Arc<AppState>>,
    Path(_name): Path<String>,
    Json(req): Json<ScaleServiceRequest>,
) -> Result<StatusCode, ApiError> {
    let service = req.service_name;
    tracing::info!(service = %service, replicas = req.replicas, "scale requested");

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

    // Cloning derives from a running instance; a service at zero needs its
    // first instance launched from the function image.
    if req.replicas > 0 && state.machines.get_replicas(&service) == 0 {
        let function = state.functions.get(&service)?;
        state.machines.new_machine(&function).await?;
    }

    state.machines.clone().scale_machines_to(&service, req.replicas).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::super::deploy::deploy;
    use super::super::testutil::{test_provider, wait_for_ips};
    use super::*;
    use crate::function::testutil::deployment;

    fn scale_request(service: &str, replicas: u64) -> ScaleServiceRequest {
        ScaleServiceRequest {
            service_name: service.to_string(),
            replicas,
            namespace: None,
        }
    }

    #[tokio::test]
    async fn scale_unknown_function_is_404() {
        let provider = test_provider();
        let err = scale(
            State(provider.state.clone()),
            Path("ghost".to_string()),
            Json(scale_request("ghost", 2)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn scale_up_and_down() {
        let provider = test_provider();
        deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();

        scale(
            State(provider.state.clone()),
            Path("echo".to_string()),
            Json(scale_request("echo", 3)),
        )
        .await
        .unwrap();
        assert_eq!(provider.state.machines.get_replicas("echo"), 3);
        assert!(wait_for_ips(&provider.endpoints, "echo", 3).await);

        scale(
            State(provider.state.clone()),
            Path("echo".to_string()),
            Json(scale_request("echo", 0)),
        )
        .await
        .unwrap();
        assert_eq!(provider.state.machines.get_replicas("echo"), 0);
        assert!(provider.state.functions.exists("echo"));
    }

    #[tokio::test]
    async fn scale_from_zero_launches_first_instance() {
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
            .stop_all_machines("echo")
            .await
            .unwrap();
        assert_eq!(provider.state.machines.get_replicas("echo"), 0);

        scale(
            State(provider.state.clone()),
            Path("echo".to_string()),
            Json(scale_request("echo", 2)),
        )
        .await
        .unwrap();
        assert_eq!(provider.state.machines.get_replicas("echo"), 2);
    }
}
